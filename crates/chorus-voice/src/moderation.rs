//! Moderation command channel.
//!
//! Consumes privileged commands (server-mute, server-deafen, disconnect,
//! kick) that the authorization layer has already verified, and converts them
//! into forced state events and session teardown. This module performs only
//! existence checks — a command against a user with no session in the channel
//! is a no-op, never an error, because moderation racing against a voluntary
//! leave is normal.

use crate::bus::EventBus;
use crate::presence::Broadcaster;
use crate::state::SessionRegistry;
use chorus_common::wire::{ForcedDisconnectReason, VoiceSignal};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a moderator asked for. `Mute`/`Deafen` carry the desired state so the
/// same surface both applies and releases the override.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ModerationAction {
    Mute { on: bool },
    Deafen { on: bool },
    Disconnect,
    Kick,
}

/// A pre-authorized moderation command against one occupant.
#[derive(Debug, Clone, Deserialize)]
pub struct ModerationCommand {
    #[serde(flatten)]
    pub action: ModerationAction,
    pub target_user_id: Uuid,
    /// Moderator identity, carried for the audit log only.
    pub issued_by: Uuid,
}

/// Applies moderation commands to the live voice state.
#[derive(Clone)]
pub struct ModerationChannel {
    registry: SessionRegistry,
    broadcaster: Broadcaster,
    bus: EventBus,
}

impl ModerationChannel {
    pub fn new(registry: SessionRegistry, broadcaster: Broadcaster, bus: EventBus) -> Self {
        Self {
            registry,
            broadcaster,
            bus,
        }
    }

    /// Apply a command scoped to `channel_id`. Returns whether it changed
    /// anything (false = target had no session there).
    pub async fn apply(&self, channel_id: Uuid, command: &ModerationCommand) -> bool {
        let target = command.target_user_id;
        let applied = match command.action {
            ModerationAction::Mute { on } => {
                self.apply_forced(channel_id, target, Some(on), None).await
            }
            ModerationAction::Deafen { on } => {
                self.apply_forced(channel_id, target, None, Some(on)).await
            }
            ModerationAction::Disconnect => {
                self.force_disconnect(channel_id, target, ForcedDisconnectReason::Disconnected)
                    .await
            }
            ModerationAction::Kick => {
                self.force_disconnect(channel_id, target, ForcedDisconnectReason::Kicked)
                    .await
            }
        };

        if applied {
            tracing::info!(
                action = ?command.action,
                target = %target,
                channel = %channel_id,
                moderator = %command.issued_by,
                "Moderation command applied"
            );
        } else {
            tracing::debug!(
                action = ?command.action,
                target = %target,
                channel = %channel_id,
                "Moderation command ignored: no active session for target"
            );
        }
        applied
    }

    /// Force a flag value. The target receives the new state directly (it
    /// must apply it locally, overriding its own toggle) and the rest of the
    /// room hears it like any other state change.
    async fn apply_forced(
        &self,
        channel_id: Uuid,
        target: Uuid,
        muted: Option<bool>,
        deafened: Option<bool>,
    ) -> bool {
        let Some(session) = self
            .registry
            .apply_forced_flags(target, channel_id, muted, deafened)
            .await
        else {
            return false;
        };

        self.bus
            .send_to(
                target,
                VoiceSignal::VoiceStateChanged {
                    user_id: target,
                    flags: session.flags,
                },
            )
            .await;
        self.broadcaster.state_changed(&session).await;
        true
    }

    /// Terminate the target's session. Remaining occupants get the normal
    /// leave announcement; the target itself gets a distinct push telling it
    /// to tear down its own media and signaling state.
    async fn force_disconnect(
        &self,
        channel_id: Uuid,
        target: Uuid,
        reason: ForcedDisconnectReason,
    ) -> bool {
        if self.registry.leave_if_in(target, channel_id).await.is_none() {
            return false;
        }

        self.broadcaster.announce_leave(channel_id, target).await;
        self.bus
            .send_to(target, VoiceSignal::ForciblyDisconnected { reason })
            .await;
        true
    }
}
