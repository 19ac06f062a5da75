//! Presence and state-sync broadcasting.
//!
//! Propagates join/leave events and per-user flag changes to every *other*
//! occupant of a room. Flag truth is self-reported by the owning occupant
//! except where moderation overrides it; this module only fans events out, it
//! never validates flags against media reality.

use crate::bus::EventBus;
use crate::state::SessionRegistry;
use chorus_common::wire::{Occupant, VoiceSignal};
use uuid::Uuid;

/// Fans presence and state-sync events out to room occupants.
#[derive(Clone)]
pub struct Broadcaster {
    registry: SessionRegistry,
    bus: EventBus,
}

impl Broadcaster {
    pub fn new(registry: SessionRegistry, bus: EventBus) -> Self {
        Self { registry, bus }
    }

    /// Deliver a signal to every occupant of the channel except `except`.
    async fn to_room(&self, channel_id: Uuid, except: Uuid, signal: VoiceSignal) {
        for user_id in self.registry.occupant_ids(channel_id).await {
            if user_id == except {
                continue;
            }
            self.bus.send_to(user_id, signal.clone()).await;
        }
    }

    /// Announce a newcomer to the existing occupants. Each recipient becomes
    /// the offer initiator toward the newcomer.
    pub async fn announce_join(&self, session: &Occupant) {
        self.to_room(
            session.channel_id,
            session.user_id,
            VoiceSignal::UserJoined {
                session: session.clone(),
            },
        )
        .await;
    }

    /// Announce a departure to the remaining occupants. Each recipient closes
    /// its peer link to the departed user.
    pub async fn announce_leave(&self, channel_id: Uuid, user_id: Uuid) {
        self.to_room(
            channel_id,
            user_id,
            VoiceSignal::UserLeft {
                user_id,
                channel_id,
            },
        )
        .await;
    }

    /// Broadcast an occupant's new flag state to the rest of the room.
    pub async fn state_changed(&self, session: &Occupant) {
        self.to_room(
            session.channel_id,
            session.user_id,
            VoiceSignal::VoiceStateChanged {
                user_id: session.user_id,
                flags: session.flags,
            },
        )
        .await;
    }

    /// Broadcast a speaking edge to the rest of the room. Best-effort.
    pub async fn speaking_changed(&self, channel_id: Uuid, user_id: Uuid, speaking: bool) {
        self.to_room(
            channel_id,
            user_id,
            VoiceSignal::SpeakingChanged { user_id, speaking },
        )
        .await;
    }
}
