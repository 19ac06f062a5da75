//! Content-blind signaling relay.
//!
//! Forwards offer/answer/ICE payloads between two named occupants of the same
//! room. The relay never parses SDP or ICE internals; it is a typed
//! pass-through keyed by `(channel, from, to)`. A message addressed to or
//! from someone who has left the room is dropped silently — that peer's link
//! is being torn down anyway, so the race is expected, not an error.

use crate::bus::EventBus;
use crate::state::SessionRegistry;
use chorus_common::wire::VoiceSignal;
use uuid::Uuid;

/// The three negotiation payload kinds the relay forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

/// Stateless router for peer negotiation payloads.
#[derive(Clone)]
pub struct SignalingRelay {
    registry: SessionRegistry,
    bus: EventBus,
}

impl SignalingRelay {
    pub fn new(registry: SessionRegistry, bus: EventBus) -> Self {
        Self { registry, bus }
    }

    /// Deliver `payload` from `from_user_id` to `to_user_id`, tagged with the
    /// sender, iff both currently occupy `channel_id`. Returns whether the
    /// message was delivered; callers never surface a miss to the sender.
    pub async fn relay(
        &self,
        kind: SignalKind,
        from_user_id: Uuid,
        to_user_id: Uuid,
        channel_id: Uuid,
        payload: serde_json::Value,
    ) -> bool {
        if !self
            .registry
            .both_in_channel(channel_id, from_user_id, to_user_id)
            .await
        {
            tracing::debug!(
                ?kind,
                from = %from_user_id,
                to = %to_user_id,
                channel = %channel_id,
                "Dropping relay message for departed peer"
            );
            return false;
        }

        let signal = match kind {
            SignalKind::Offer => VoiceSignal::OfferReceived {
                from_user_id,
                sdp: payload,
            },
            SignalKind::Answer => VoiceSignal::AnswerReceived {
                from_user_id,
                sdp: payload,
            },
            SignalKind::IceCandidate => VoiceSignal::IceCandidateReceived {
                from_user_id,
                candidate: payload,
            },
        };

        self.bus.send_to(to_user_id, signal).await
    }
}
