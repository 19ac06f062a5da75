//! The seam between signaling and media.
//!
//! The voice client coordinates *when* to negotiate; a [`MediaSession`]
//! implementation owns the actual WebRTC peer connections and produces and
//! consumes the opaque SDP/ICE payloads. The client never inspects them.
//!
//! The media layer is also the side that knows whether a link actually came
//! up: implementations report connectivity transitions back through
//! [`crate::VoiceClient::link_connected`] / [`crate::VoiceClient::link_failed`].

use crate::error::Result;
use async_trait::async_trait;
use chorus_common::wire::IceServerConfig;
use uuid::Uuid;

/// Media-layer operations the voice client drives during negotiation.
#[async_trait]
pub trait MediaSession: Send + Sync {
    /// Apply the ICE bootstrap config received on join.
    async fn set_ice_servers(&self, servers: Vec<IceServerConfig>);

    /// Create a peer connection toward `peer` (local tracks attached) and
    /// return the SDP offer to send.
    async fn create_offer(&self, peer: Uuid) -> Result<serde_json::Value>;

    /// Accept a remote offer from `peer` and return the SDP answer to send.
    async fn accept_offer(&self, peer: Uuid, sdp: serde_json::Value) -> Result<serde_json::Value>;

    /// Apply a remote answer on the connection toward `peer`.
    async fn apply_answer(&self, peer: Uuid, sdp: serde_json::Value) -> Result<()>;

    /// Apply a trickled remote ICE candidate.
    async fn apply_candidate(&self, peer: Uuid, candidate: serde_json::Value) -> Result<()>;

    /// Enable or disable the local screen-share track. Called before the
    /// client renegotiates every connected link.
    async fn set_screen_share(&self, enabled: bool) -> Result<()>;

    /// Tear down the peer connection toward `peer`.
    async fn close_peer(&self, peer: Uuid);
}
