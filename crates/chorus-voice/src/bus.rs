//! Per-user outbound event queues.
//!
//! Each signaling connection registers an unbounded sender for its user after
//! authenticating; the connection's send task drains the matching receiver
//! onto the WebSocket. The relay and broadcaster address users through this
//! map, never through sockets directly, which keeps them testable with plain
//! channels.

use chorus_common::wire::VoiceSignal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Routes outbound signals to connected users.
#[derive(Clone, Default)]
pub struct EventBus {
    senders: Arc<RwLock<HashMap<Uuid, mpsc::UnboundedSender<VoiceSignal>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user's outbound queue. A later registration for the same
    /// user replaces the earlier one (latest connection wins).
    pub async fn register(&self, user_id: Uuid, sender: mpsc::UnboundedSender<VoiceSignal>) {
        self.senders.write().await.insert(user_id, sender);
    }

    /// Drop a user's outbound queue. Only removes the entry if it still
    /// belongs to the given sender, so a stale connection's cleanup cannot
    /// evict its replacement.
    pub async fn unregister(&self, user_id: Uuid, sender: &mpsc::UnboundedSender<VoiceSignal>) {
        let mut senders = self.senders.write().await;
        if senders.get(&user_id).is_some_and(|s| s.same_channel(sender)) {
            senders.remove(&user_id);
        }
    }

    /// Deliver a signal to one user. Returns false when the user has no live
    /// queue — callers treat that as an expected race, not an error.
    pub async fn send_to(&self, user_id: Uuid, signal: VoiceSignal) -> bool {
        let senders = self.senders.read().await;
        match senders.get(&user_id) {
            Some(sender) => sender.send(signal).is_ok(),
            None => false,
        }
    }

}
