//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for production.
//! Config precedence: env vars > .env file > config.toml > defaults

use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global application configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static AppConfig {
    CONFIG
        .get()
        .expect("Config not initialized. Call chorus_common::config::init() first.")
}

/// Initialize the global configuration from environment.
///
/// Should be called once at application startup, before any other code accesses config.
pub fn init() -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        // Defaults
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8082)?
        .set_default("voice.max_room_size", 12)?
        .set_default(
            "voice.stun_urls",
            "stun:stun.l.google.com:19302,stun:stun1.l.google.com:19302",
        )?
        .set_default("voice.turn_url", "")?
        .set_default("voice.turn_username", "")?
        .set_default("voice.turn_credential", "")?
        // Optional config file
        .add_source(config::File::with_name("config").required(false))
        // Environment variables (CHORUS_SERVER__HOST, CHORUS_AUTH__JWT_SECRET, etc.)
        .add_source(
            config::Environment::with_prefix("CHORUS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;
    Ok(CONFIG.get_or_init(|| app_config))
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub voice: VoiceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// Port serving both the voice signaling WebSocket and the REST surface.
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// JWT verification secret (HS256), shared with the identity service
    /// that issues the tokens.
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VoiceConfig {
    /// Hard ceiling on occupants per voice channel. Full-mesh negotiation
    /// cost grows with the square of the room size, so this stays small.
    pub max_room_size: usize,
    /// STUN server URLs — comma-separated, e.g. `stun:a.example:3478,stun:b.example:3478`
    pub stun_urls: String,
    /// TURN relay URL — empty to disable the TURN entry in the handout.
    pub turn_url: String,
    pub turn_username: String,
    pub turn_credential: String,
}

impl VoiceConfig {
    /// The STUN URL list, split and trimmed.
    pub fn stun_url_list(&self) -> Vec<String> {
        self.stun_urls
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }
}
