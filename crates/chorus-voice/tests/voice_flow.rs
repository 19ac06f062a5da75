//! End-to-end signaling flow across the voice core: join announcements,
//! initiator assignment, offer/answer/ICE relay, state sync, and teardown —
//! exercised against the live components without a WebSocket in the way.

use chorus_common::wire::{IceServerConfig, VoiceSignal};
use chorus_voice::relay::SignalKind;
use chorus_voice::state::StateUpdate;
use chorus_voice::{VoiceServer, VoiceServerOptions};
use tokio::sync::mpsc;
use uuid::Uuid;

fn server() -> VoiceServer {
    VoiceServer::new(VoiceServerOptions {
        jwt_secret: "test-secret".into(),
        max_room_size: 12,
        ice_servers: IceServerConfig::defaults(),
    })
}

/// A connected user: a registered outbound queue plus its receiver, driven
/// through the same component calls the connection handler makes.
struct Client {
    user_id: Uuid,
    rx: mpsc::UnboundedReceiver<VoiceSignal>,
}

impl Client {
    async fn connect(server: &VoiceServer) -> Self {
        let user_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        server.bus.register(user_id, tx).await;
        Self { user_id, rx }
    }

    async fn join(&self, server: &VoiceServer, name: &str, channel: Uuid) -> Vec<Uuid> {
        let outcome = server
            .registry
            .join(self.user_id, name, channel, "s")
            .await
            .unwrap();
        if let Some(previous) = outcome.previous_channel {
            server.broadcaster.announce_leave(previous, self.user_id).await;
        }
        server.broadcaster.announce_join(&outcome.session).await;
        outcome.peers.iter().map(|p| p.user_id).collect()
    }

    async fn leave(&self, server: &VoiceServer) {
        if let Some(ended) = server.registry.leave(self.user_id).await {
            server
                .broadcaster
                .announce_leave(ended.channel_id, self.user_id)
                .await;
        }
    }

    fn next(&mut self) -> VoiceSignal {
        self.rx.try_recv().expect("expected a queued signal")
    }

    fn assert_idle(&mut self) {
        assert!(self.rx.try_recv().is_err(), "expected no queued signals");
    }
}

#[tokio::test]
async fn two_party_join_negotiate_sync_and_leave() {
    let server = server();
    let channel = Uuid::new_v4();

    let mut a = Client::connect(&server).await;
    let mut b = Client::connect(&server).await;

    // A joins an empty room: no peers, nothing to hear.
    let peers = a.join(&server, "a", channel).await;
    assert!(peers.is_empty());
    a.assert_idle();

    // B joins: the join outcome lists A as the peer that will initiate,
    // and A hears the announcement.
    let peers = b.join(&server, "b", channel).await;
    assert_eq!(peers, vec![a.user_id]);
    b.assert_idle();
    match a.next() {
        VoiceSignal::UserJoined { session } => {
            assert_eq!(session.user_id, b.user_id);
            assert_eq!(session.username, "b");
            assert_eq!(session.channel_id, channel);
        }
        other => panic!("unexpected signal for A: {other:?}"),
    }

    // A (the existing occupant) initiates; B answers; candidates trickle
    // both ways. B must never be the first to offer.
    let offer = serde_json::json!({"type": "offer", "sdp": "v=0 a"});
    assert!(
        server
            .relay
            .relay(SignalKind::Offer, a.user_id, b.user_id, channel, offer.clone())
            .await
    );
    match b.next() {
        VoiceSignal::OfferReceived { from_user_id, sdp } => {
            assert_eq!(from_user_id, a.user_id);
            assert_eq!(sdp, offer);
        }
        other => panic!("unexpected signal for B: {other:?}"),
    }

    let answer = serde_json::json!({"type": "answer", "sdp": "v=0 b"});
    assert!(
        server
            .relay
            .relay(SignalKind::Answer, b.user_id, a.user_id, channel, answer.clone())
            .await
    );
    match a.next() {
        VoiceSignal::AnswerReceived { from_user_id, sdp } => {
            assert_eq!(from_user_id, b.user_id);
            assert_eq!(sdp, answer);
        }
        other => panic!("unexpected signal for A: {other:?}"),
    }

    for (from, to) in [(&a, &b), (&b, &a)] {
        assert!(
            server
                .relay
                .relay(
                    SignalKind::IceCandidate,
                    from.user_id,
                    to.user_id,
                    channel,
                    serde_json::json!({"candidate": "candidate:0 1 UDP"}),
                )
                .await
        );
    }
    assert!(matches!(a.next(), VoiceSignal::IceCandidateReceived { .. }));
    assert!(matches!(b.next(), VoiceSignal::IceCandidateReceived { .. }));

    // A mutes; B hears the flag change.
    let session = server
        .registry
        .update_self_state(
            a.user_id,
            &StateUpdate {
                muted: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    server.broadcaster.state_changed(&session).await;
    match b.next() {
        VoiceSignal::VoiceStateChanged { user_id, flags } => {
            assert_eq!(user_id, a.user_id);
            assert!(flags.muted);
            assert!(!flags.server_muted);
        }
        other => panic!("unexpected signal for B: {other:?}"),
    }

    // A leaves: B hears it, and no relay to or from A succeeds anymore.
    a.leave(&server).await;
    match b.next() {
        VoiceSignal::UserLeft { user_id, channel_id } => {
            assert_eq!(user_id, a.user_id);
            assert_eq!(channel_id, channel);
        }
        other => panic!("unexpected signal for B: {other:?}"),
    }
    assert!(
        !server
            .relay
            .relay(SignalKind::Offer, b.user_id, a.user_id, channel, serde_json::json!({}))
            .await
    );
    assert!(
        !server
            .relay
            .relay(SignalKind::Offer, a.user_id, b.user_id, channel, serde_json::json!({}))
            .await
    );
    a.assert_idle();
    b.assert_idle();
}

#[tokio::test]
async fn channel_switch_announces_leave_to_the_old_room() {
    let server = server();
    let (room1, room2) = (Uuid::new_v4(), Uuid::new_v4());

    let mut a = Client::connect(&server).await;
    let b = Client::connect(&server).await;
    let mut c = Client::connect(&server).await;

    a.join(&server, "a", room1).await;
    b.join(&server, "b", room1).await;
    c.join(&server, "c", room2).await;
    let _ = a.next(); // B's join announcement

    // B switches rooms: room1 hears a leave, room2 hears a join, and the
    // registry never shows B in two places.
    b.join(&server, "b", room2).await;
    assert!(matches!(
        a.next(),
        VoiceSignal::UserLeft { user_id, .. } if user_id == b.user_id
    ));
    assert!(matches!(
        c.next(),
        VoiceSignal::UserJoined { session } if session.user_id == b.user_id
    ));
    assert_eq!(server.registry.occupants(room1).await.len(), 1);
    assert_eq!(server.registry.occupants(room2).await.len(), 2);
    assert_eq!(server.registry.current_channel(b.user_id).await, Some(room2));
}

#[tokio::test]
async fn moderation_mute_is_the_state_of_record_despite_a_self_report() {
    use chorus_voice::moderation::{ModerationAction, ModerationCommand};

    let server = server();
    let channel = Uuid::new_v4();
    let mut target = Client::connect(&server).await;
    let mut witness = Client::connect(&server).await;

    target.join(&server, "target", channel).await;
    witness.join(&server, "witness", channel).await;
    let _ = target.next(); // witness's join announcement

    let applied = server
        .moderation
        .apply(
            channel,
            &ModerationCommand {
                action: ModerationAction::Mute { on: true },
                target_user_id: target.user_id,
                issued_by: Uuid::new_v4(),
            },
        )
        .await;
    assert!(applied);

    // Target is told directly; the room hears the same flags.
    assert!(matches!(
        target.next(),
        VoiceSignal::VoiceStateChanged { flags, .. } if flags.muted && flags.server_muted
    ));
    assert!(matches!(
        witness.next(),
        VoiceSignal::VoiceStateChanged { flags, .. } if flags.muted && flags.server_muted
    ));

    // The target immediately self-reports unmuted; the state of record
    // keeps the forced value.
    let session = server
        .registry
        .update_self_state(
            target.user_id,
            &StateUpdate {
                muted: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    server.broadcaster.state_changed(&session).await;
    assert!(matches!(
        witness.next(),
        VoiceSignal::VoiceStateChanged { flags, .. } if flags.muted && flags.server_muted
    ));

    let listed = server.registry.occupants(channel).await;
    let target_entry = listed.iter().find(|o| o.user_id == target.user_id).unwrap();
    assert!(target_entry.flags.muted);
}
