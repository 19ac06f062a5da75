//! # chorus-voice
//!
//! Voice presence and signaling coordinator for Chorus.
//!
//! Architecture: full-mesh peer-to-peer
//! - Each voice channel is a room of up to `max_room_size` occupants
//! - Every pair of occupants negotiates a direct WebRTC link; media never
//!   touches this server
//! - The server owns presence (who is where, with which flags), relays
//!   negotiation payloads between named peers, and applies moderation
//! - Existing occupants initiate offers toward newcomers — a fixed tie-break
//!   so both sides never offer simultaneously
//!
//! A mesh room of size n costs each member n−1 concurrent negotiations and
//! the relay up to n·(n−1)/2 links, which is why the room ceiling stays in
//! the low double digits. Larger rooms need a forwarding media server, which
//! is a different product.

pub mod bus;
pub mod handler;
pub mod moderation;
pub mod presence;
pub mod relay;
pub mod routes;
pub mod state;

use axum::{Router, routing::get};
use bus::EventBus;
use chorus_common::config::AppConfig;
use chorus_common::wire::IceServerConfig;
use moderation::ModerationChannel;
use presence::Broadcaster;
use relay::SignalingRelay;
use state::SessionRegistry;
use std::sync::Arc;

/// Tunables for a voice server instance.
#[derive(Debug, Clone)]
pub struct VoiceServerOptions {
    /// Secret used to verify `Identify` tokens.
    pub jwt_secret: String,
    /// Occupancy ceiling per voice channel.
    pub max_room_size: usize,
    /// ICE bootstrap config handed to clients on join.
    pub ice_servers: Vec<IceServerConfig>,
}

impl VoiceServerOptions {
    /// Build options from application config. The TURN entry is included
    /// only when a relay URL is configured.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut ice_servers = vec![IceServerConfig {
            urls: config.voice.stun_url_list(),
            username: None,
            credential: None,
        }];
        if !config.voice.turn_url.is_empty() {
            let optional = |s: &str| (!s.is_empty()).then(|| s.to_owned());
            ice_servers.push(IceServerConfig {
                urls: vec![config.voice.turn_url.clone()],
                username: optional(&config.voice.turn_username),
                credential: optional(&config.voice.turn_credential),
            });
        }
        Self {
            jwt_secret: config.auth.jwt_secret.clone(),
            max_room_size: config.voice.max_room_size,
            ice_servers,
        }
    }
}

/// Voice server state — shared across all signaling connections and the REST
/// surface.
pub struct VoiceServer {
    pub registry: SessionRegistry,
    pub bus: EventBus,
    pub broadcaster: Broadcaster,
    pub relay: SignalingRelay,
    pub moderation: ModerationChannel,
    jwt_secret: String,
    ice_servers: Vec<IceServerConfig>,
}

impl VoiceServer {
    pub fn new(options: VoiceServerOptions) -> Self {
        let registry = SessionRegistry::new(options.max_room_size);
        let bus = EventBus::new();
        let broadcaster = Broadcaster::new(registry.clone(), bus.clone());
        let relay = SignalingRelay::new(registry.clone(), bus.clone());
        let moderation =
            ModerationChannel::new(registry.clone(), broadcaster.clone(), bus.clone());
        Self {
            registry,
            bus,
            broadcaster,
            relay,
            moderation,
            jwt_secret: options.jwt_secret,
            ice_servers: options.ice_servers,
        }
    }

    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }

    pub fn ice_servers(&self) -> &[IceServerConfig] {
        &self.ice_servers
    }
}

/// Build the voice router: signaling WebSocket plus the REST surface.
pub fn build_router(server: Arc<VoiceServer>) -> Router {
    Router::new()
        .route("/voice", get(handler::ws_handler))
        .merge(routes::router())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(server)
}
