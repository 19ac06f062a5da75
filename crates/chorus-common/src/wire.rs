//! Voice signaling wire protocol — shared between the voice server and clients.
//!
//! The voice server relays negotiation payloads between peers and broadcasts
//! presence; clients own the actual WebRTC connections. This module lives in
//! `chorus-common` so the server and client crates agree on the protocol
//! without a circular dependency.
//!
//! SDP and ICE payloads are opaque `serde_json::Value`s end to end — the
//! server never parses them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Snapshot of one occupant's voice state, as seen on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Occupant {
    pub user_id: Uuid,
    pub username: String,
    pub channel_id: Uuid,
    pub joined_at: DateTime<Utc>,
    pub flags: VoiceFlags,
}

/// Effective voice-state flags for an occupant.
///
/// `muted`/`deafened` are the *effective* values after moderation overrides;
/// `server_muted`/`server_deafened` tell clients whether the effective value
/// is moderation-forced (so UIs can render the distinct server-mute icon).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceFlags {
    pub muted: bool,
    pub deafened: bool,
    pub screen_sharing: bool,
    pub server_muted: bool,
    pub server_deafened: bool,
    pub speaking: bool,
}

/// ICE server configuration handed to clients on join.
///
/// This is pass-through bootstrap config (STUN/TURN endpoints), not anything
/// the voice core computes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// Default STUN servers (free, public).
    /// In production, add a TURN server for NAT traversal.
    pub fn defaults() -> Vec<Self> {
        vec![Self {
            urls: vec![
                "stun:stun.l.google.com:19302".into(),
                "stun:stun1.l.google.com:19302".into(),
            ],
            username: None,
            credential: None,
        }]
    }
}

/// Why a client was forcibly removed from voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcedDisconnectReason {
    /// A moderator disconnected the user from the voice channel.
    Disconnected,
    /// The user was kicked from the server; voice teardown is a side effect.
    Kicked,
}

/// Voice signaling messages (client ↔ server).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "d")]
pub enum VoiceSignal {
    // === Client → Server ===
    /// Authenticate with a pre-issued access token.
    Identify { token: String },

    /// Join a voice channel. Implicitly leaves any current channel first.
    Join { channel_id: Uuid },

    /// Leave the current voice channel.
    Leave,

    /// Send an SDP offer to a named peer in the same channel.
    Offer {
        target_user_id: Uuid,
        sdp: serde_json::Value,
    },

    /// Send an SDP answer to a named peer in the same channel.
    Answer {
        target_user_id: Uuid,
        sdp: serde_json::Value,
    },

    /// Send an ICE candidate to a named peer in the same channel.
    IceCandidate {
        target_user_id: Uuid,
        candidate: serde_json::Value,
    },

    /// Update own mute/deafen/screen-share flags. Self-reports never
    /// override a moderation-forced value.
    StateUpdate {
        muted: Option<bool>,
        deafened: Option<bool>,
        screen_sharing: Option<bool>,
    },

    /// Voice-activity edge transition. Best-effort; a missed update is
    /// corrected by the next one.
    Speaking { speaking: bool },

    // === Server → Client ===
    /// Authentication successful.
    Ready { session_id: String },

    /// Joined a voice channel — existing occupants and ICE bootstrap config.
    /// Each listed occupant will initiate an offer toward the newcomer.
    Joined {
        channel_id: Uuid,
        occupants: Vec<Occupant>,
        ice_servers: Vec<IceServerConfig>,
    },

    /// Another user joined the channel. Existing occupants respond by
    /// offering to the newcomer.
    UserJoined { session: Occupant },

    /// Another user left the channel. Close the corresponding peer link.
    UserLeft { user_id: Uuid, channel_id: Uuid },

    /// Relayed SDP offer from a peer.
    OfferReceived {
        from_user_id: Uuid,
        sdp: serde_json::Value,
    },

    /// Relayed SDP answer from a peer.
    AnswerReceived {
        from_user_id: Uuid,
        sdp: serde_json::Value,
    },

    /// Relayed ICE candidate from a peer.
    IceCandidateReceived {
        from_user_id: Uuid,
        candidate: serde_json::Value,
    },

    /// An occupant's voice-state flags changed (self-report or moderation).
    VoiceStateChanged { user_id: Uuid, flags: VoiceFlags },

    /// An occupant's speaking state flipped.
    SpeakingChanged { user_id: Uuid, speaking: bool },

    /// This client was removed from voice by a moderator and must tear down
    /// its local media and signaling state immediately.
    ForciblyDisconnected { reason: ForcedDisconnectReason },

    /// Error occurred.
    Error { code: u32, message: String },
}
