//! # Chorus Voice Server
//!
//! Single-process voice coordinator:
//! - Signaling WebSocket (join/leave, offer/answer/ICE relay, state sync)
//! - REST surface (occupant queries, stats, moderation command intake)
//!
//! Media never flows through this process — occupants hold direct
//! peer-to-peer links and this server only coordinates them.

use chorus_voice::{VoiceServer, VoiceServerOptions};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = chorus_common::config::init()?;

    // Initialize tracing (structured logging)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chorus=debug,tower_http=debug".into()),
        )
        .with_target(true)
        .init();

    tracing::info!("🎙️  Starting Chorus voice server v{}", env!("CARGO_PKG_VERSION"));

    let options = VoiceServerOptions::from_config(config);
    tracing::info!(
        max_room_size = options.max_room_size,
        ice_entries = options.ice_servers.len(),
        "Voice options loaded"
    );

    let server = Arc::new(VoiceServer::new(options));
    let router = chorus_voice::build_router(server);

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("📡 Voice signaling listening on ws://{addr}/voice");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
