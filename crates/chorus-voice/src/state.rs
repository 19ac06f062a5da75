//! Voice session registry — the authoritative record of who occupies which
//! voice channel.
//!
//! Two indexes for fast lookups:
//! - `by_user`: user_id → VoiceSession (quick "where is this user?")
//! - `by_channel`: channel_id → [user_id] in join order (quick "who's in this channel?")
//!
//! Both indexes live behind a single lock, so a session is never visible in a
//! room without being visible in the registry and vice versa, and concurrent
//! `join` calls for the same user serialize instead of racing into two live
//! sessions. Rooms are derived: a channel exists in `by_channel` exactly as
//! long as at least one session references it.

use chorus_common::error::{ChorusError, ChorusResult};
use chorus_common::wire::{Occupant, VoiceFlags};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A voice-state flag with a self-reported slot and a moderation-forced slot.
///
/// The effective value is the forced one when present, the self-reported one
/// otherwise. Self-reports only ever write the self slot, so a moderation
/// override survives the target's own toggles until a moderator releases it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourcedFlag {
    self_value: bool,
    forced: Option<bool>,
}

impl SourcedFlag {
    pub fn effective(&self) -> bool {
        self.forced.unwrap_or(self.self_value)
    }

    pub fn is_forced(&self) -> bool {
        self.forced.is_some()
    }

    pub fn set_self(&mut self, value: bool) {
        self.self_value = value;
    }

    /// Apply a moderation decision: `true` forces the flag on, `false`
    /// releases the override so the self-reported value applies again.
    pub fn set_forced(&mut self, on: bool) {
        self.forced = if on { Some(true) } else { None };
    }
}

/// One user's presence in one voice channel.
#[derive(Debug, Clone)]
pub struct VoiceSession {
    pub user_id: Uuid,
    pub username: String,
    pub channel_id: Uuid,
    pub session_id: String,
    pub joined_at: DateTime<Utc>,
    pub muted: SourcedFlag,
    pub deafened: SourcedFlag,
    pub screen_sharing: bool,
    pub speaking: bool,
}

impl VoiceSession {
    /// Wire-facing snapshot with effective flag values.
    pub fn snapshot(&self) -> Occupant {
        Occupant {
            user_id: self.user_id,
            username: self.username.clone(),
            channel_id: self.channel_id,
            joined_at: self.joined_at,
            flags: VoiceFlags {
                muted: self.muted.effective(),
                deafened: self.deafened.effective(),
                screen_sharing: self.screen_sharing,
                server_muted: self.muted.is_forced(),
                server_deafened: self.deafened.is_forced(),
                speaking: self.speaking,
            },
        }
    }
}

/// A self-reported flag update. `None` fields are left untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateUpdate {
    pub muted: Option<bool>,
    pub deafened: Option<bool>,
    pub screen_sharing: Option<bool>,
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// The newly created session.
    pub session: Occupant,
    /// Channel the user was evicted from, if they were already in voice.
    pub previous_channel: Option<Uuid>,
    /// Occupants present before the join, in join order. These are the peers
    /// that initiate offers toward the newcomer.
    pub peers: Vec<Occupant>,
}

#[derive(Default)]
struct RegistryInner {
    by_user: HashMap<Uuid, VoiceSession>,
    by_channel: HashMap<Uuid, Vec<Uuid>>,
}

impl RegistryInner {
    /// Remove a user's session from both indexes. Returns the channel left.
    fn remove_session(&mut self, user_id: Uuid) -> Option<VoiceSession> {
        let session = self.by_user.remove(&user_id)?;
        if let Some(members) = self.by_channel.get_mut(&session.channel_id) {
            members.retain(|u| *u != user_id);
            if members.is_empty() {
                self.by_channel.remove(&session.channel_id);
            }
        }
        Some(session)
    }

    fn occupants(&self, channel_id: Uuid) -> Vec<Occupant> {
        self.by_channel
            .get(&channel_id)
            .map(|member_ids| {
                member_ids
                    .iter()
                    .filter_map(|uid| self.by_user.get(uid))
                    .map(VoiceSession::snapshot)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Manages voice sessions across all channels.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    max_room_size: usize,
}

impl SessionRegistry {
    pub fn new(max_room_size: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
            max_room_size,
        }
    }

    /// User joins a voice channel. If already in a channel (including the
    /// same one), that session is ended first within the same critical
    /// section. Fails with [`ChorusError::RoomFull`] when the channel is at
    /// its occupancy ceiling; the prior session is left untouched in that
    /// case.
    pub async fn join(
        &self,
        user_id: Uuid,
        username: &str,
        channel_id: Uuid,
        session_id: &str,
    ) -> ChorusResult<JoinOutcome> {
        let mut inner = self.inner.write().await;

        // Capacity check excludes the joiner's own soon-to-be-evicted session,
        // so switching away and back within a full room still works.
        let occupied = inner
            .by_channel
            .get(&channel_id)
            .map(|m| m.iter().filter(|u| **u != user_id).count())
            .unwrap_or(0);
        if occupied >= self.max_room_size {
            return Err(ChorusError::RoomFull {
                limit: self.max_room_size,
            });
        }

        let previous_channel = inner
            .remove_session(user_id)
            .map(|session| session.channel_id);
        let peers = inner.occupants(channel_id);

        let session = VoiceSession {
            user_id,
            username: username.to_owned(),
            channel_id,
            session_id: session_id.to_owned(),
            joined_at: Utc::now(),
            muted: SourcedFlag::default(),
            deafened: SourcedFlag::default(),
            screen_sharing: false,
            speaking: false,
        };
        let snapshot = session.snapshot();

        inner.by_user.insert(user_id, session);
        inner.by_channel.entry(channel_id).or_default().push(user_id);

        tracing::info!(
            user = %user_id,
            channel = %channel_id,
            previous = ?previous_channel,
            "User joined voice channel"
        );

        Ok(JoinOutcome {
            session: snapshot,
            previous_channel,
            peers,
        })
    }

    /// User leaves their current voice channel. Idempotent: leaving without a
    /// session is a no-op. Returns a snapshot of the ended session.
    pub async fn leave(&self, user_id: Uuid) -> Option<Occupant> {
        let removed = self.inner.write().await.remove_session(user_id);

        if let Some(ref session) = removed {
            tracing::info!(
                user = %user_id,
                channel = %session.channel_id,
                "User left voice channel"
            );
        }

        removed.map(|session| session.snapshot())
    }

    /// End a user's session only if it is in the given channel. Used by
    /// moderation so a disconnect racing a channel switch cannot tear down
    /// the wrong session.
    pub async fn leave_if_in(&self, user_id: Uuid, channel_id: Uuid) -> Option<Occupant> {
        let mut inner = self.inner.write().await;
        if inner.by_user.get(&user_id)?.channel_id != channel_id {
            return None;
        }
        let removed = inner.remove_session(user_id)?;
        tracing::info!(
            user = %user_id,
            channel = %channel_id,
            "User removed from voice channel"
        );
        Some(removed.snapshot())
    }

    /// The channel a user currently occupies, if any.
    pub async fn current_channel(&self, user_id: Uuid) -> Option<Uuid> {
        self.inner
            .read()
            .await
            .by_user
            .get(&user_id)
            .map(|s| s.channel_id)
    }

    /// All occupants of a channel, in join order.
    pub async fn occupants(&self, channel_id: Uuid) -> Vec<Occupant> {
        self.inner.read().await.occupants(channel_id)
    }

    /// Occupant user ids for a channel, in join order.
    pub async fn occupant_ids(&self, channel_id: Uuid) -> Vec<Uuid> {
        self.inner
            .read()
            .await
            .by_channel
            .get(&channel_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether both users currently occupy the given channel. Checked under a
    /// single lock read so the relay's addressing decision is consistent.
    pub async fn both_in_channel(&self, channel_id: Uuid, a: Uuid, b: Uuid) -> bool {
        let inner = self.inner.read().await;
        let in_channel =
            |uid: Uuid| inner.by_user.get(&uid).is_some_and(|s| s.channel_id == channel_id);
        in_channel(a) && in_channel(b)
    }

    /// Apply a self-reported flag update. Self-reports never touch the
    /// moderation-forced slot. Returns the updated snapshot.
    pub async fn update_self_state(
        &self,
        user_id: Uuid,
        update: &StateUpdate,
    ) -> Option<Occupant> {
        let mut inner = self.inner.write().await;
        let session = inner.by_user.get_mut(&user_id)?;
        if let Some(m) = update.muted {
            session.muted.set_self(m);
        }
        if let Some(d) = update.deafened {
            session.deafened.set_self(d);
        }
        if let Some(s) = update.screen_sharing {
            session.screen_sharing = s;
        }
        Some(session.snapshot())
    }

    /// Apply moderation-forced mute/deafen values for a target in a channel.
    /// `Some(true)` forces the flag, `Some(false)` releases the override.
    /// Returns `None` (no-op) when the target has no session in that channel.
    pub async fn apply_forced_flags(
        &self,
        user_id: Uuid,
        channel_id: Uuid,
        muted: Option<bool>,
        deafened: Option<bool>,
    ) -> Option<Occupant> {
        let mut inner = self.inner.write().await;
        let session = inner.by_user.get_mut(&user_id)?;
        if session.channel_id != channel_id {
            return None;
        }
        if let Some(m) = muted {
            session.muted.set_forced(m);
        }
        if let Some(d) = deafened {
            session.deafened.set_forced(d);
        }
        Some(session.snapshot())
    }

    /// Record a speaking transition. Returns `Some(channel_id)` only when the
    /// value actually flipped, so callers broadcast edges, not a stream of
    /// repeats.
    pub async fn set_speaking(&self, user_id: Uuid, speaking: bool) -> Option<Uuid> {
        let mut inner = self.inner.write().await;
        let session = inner.by_user.get_mut(&user_id)?;
        if session.speaking == speaking {
            return None;
        }
        session.speaking = speaking;
        Some(session.channel_id)
    }

    /// Get global voice stats.
    pub async fn stats(&self) -> VoiceStats {
        let inner = self.inner.read().await;
        VoiceStats {
            active_rooms: inner.by_channel.len(),
            total_occupants: inner.by_user.len(),
        }
    }
}

/// Global voice statistics.
#[derive(Debug, serde::Serialize)]
pub struct VoiceStats {
    pub active_rooms: usize,
    pub total_occupants: usize,
}
