//! REST surface beside the signaling WebSocket.
//!
//! - `GET  /voice/channels/{channel_id}/occupants` — who is in a voice
//!   channel, for channel UIs rendering rooms the viewer hasn't joined.
//! - `GET  /voice/stats` — room/occupant counts.
//! - `POST /voice/channels/{channel_id}/moderation` — privileged command
//!   intake. Permission checks happen upstream in the authorization service;
//!   this endpoint consumes an already-verified command and only performs
//!   existence checks.

use crate::VoiceServer;
use crate::moderation::ModerationCommand;
use crate::state::VoiceStats;
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use chorus_common::error::ChorusResult;
use chorus_common::wire::Occupant;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Voice REST routes.
pub fn router() -> Router<Arc<VoiceServer>> {
    Router::new()
        .route(
            "/voice/channels/{channel_id}/occupants",
            get(list_occupants),
        )
        .route(
            "/voice/channels/{channel_id}/moderation",
            post(apply_moderation),
        )
        .route("/voice/stats", get(voice_stats))
}

#[derive(Debug, Serialize)]
pub struct OccupantsResponse {
    pub channel_id: Uuid,
    pub occupant_count: usize,
    pub occupants: Vec<Occupant>,
}

/// GET /voice/channels/{channel_id}/occupants
async fn list_occupants(
    State(server): State<Arc<VoiceServer>>,
    Path(channel_id): Path<Uuid>,
) -> ChorusResult<Json<OccupantsResponse>> {
    let occupants = server.registry.occupants(channel_id).await;
    Ok(Json(OccupantsResponse {
        channel_id,
        occupant_count: occupants.len(),
        occupants,
    }))
}

#[derive(Debug, Serialize)]
pub struct ModerationOutcome {
    /// False when the target had no active session in the channel — an
    /// expected race with voluntary leaves, not an error.
    pub applied: bool,
}

/// POST /voice/channels/{channel_id}/moderation
async fn apply_moderation(
    State(server): State<Arc<VoiceServer>>,
    Path(channel_id): Path<Uuid>,
    Json(command): Json<ModerationCommand>,
) -> ChorusResult<Json<ModerationOutcome>> {
    let applied = server.moderation.apply(channel_id, &command).await;
    Ok(Json(ModerationOutcome { applied }))
}

/// GET /voice/stats
async fn voice_stats(State(server): State<Arc<VoiceServer>>) -> Json<VoiceStats> {
    Json(server.registry.stats().await)
}
