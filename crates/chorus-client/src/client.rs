//! Async voice client.
//!
//! Owns the signaling WebSocket and drives the peer-link mesh against a
//! user-supplied [`MediaSession`]. The event-handling core is socket-free
//! (the run loop feeds it decoded signals and commands), so the negotiation
//! behavior is testable without a server.
//!
//! There is no automatic reconnect: a dropped signaling connection means the
//! presence record server-side is gone, so the embedding app re-joins
//! explicitly after reconnecting.

use crate::error::{Result, VoiceClientError};
use crate::media::MediaSession;
use crate::mesh::{LinkState, OfferDisposition, VoiceMesh};
use chorus_common::wire::{ForcedDisconnectReason, Occupant, VoiceFlags, VoiceSignal};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

const DEFAULT_NEGOTIATION_WINDOW: Duration = Duration::from_secs(15);

/// Events surfaced to the embedding application.
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    /// Authenticated; signaling is ready for a `join`.
    Ready { session_id: String },
    /// Joined a channel. The listed occupants will offer to us.
    Joined {
        channel_id: Uuid,
        occupants: Vec<Occupant>,
    },
    UserJoined(Occupant),
    UserLeft { user_id: Uuid },
    VoiceStateChanged { user_id: Uuid, flags: VoiceFlags },
    SpeakingChanged { user_id: Uuid, speaking: bool },
    /// A peer link changed negotiation state.
    LinkStateChanged { peer_id: Uuid, state: LinkState },
    /// A moderator removed us from voice. Local teardown already happened;
    /// the UI shows this distinctly from an ordinary departure.
    ForciblyDisconnected { reason: ForcedDisconnectReason },
    /// The server rejected something.
    ServerError { code: u32, message: String },
    /// The signaling connection closed.
    Disconnected,
}

/// The local occupant's own flags, as last known.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFlags {
    pub muted: bool,
    pub deafened: bool,
    pub screen_sharing: bool,
    pub speaking: bool,
}

/// What the client currently knows about its room.
#[derive(Debug, Default)]
struct RoomView {
    channel_id: Option<Uuid>,
    occupants: HashMap<Uuid, Occupant>,
    local: LocalFlags,
}

enum Command {
    Join(Uuid),
    Leave,
    ToggleMute,
    ToggleDeafen,
    SetScreenShare(bool),
    Speaking(bool),
    /// Retry a failed link with a fresh offer.
    Renegotiate(Uuid),
    /// Media layer reports the link toward the peer came up.
    LinkConnected(Uuid),
    /// Media layer gave up on the link toward the peer.
    LinkFailed(Uuid),
}

/// Voice signaling client.
///
/// ```rust,no_run
/// use chorus_client::{VoiceClient, media::MediaSession};
/// use std::sync::Arc;
///
/// # async fn example(media: Arc<dyn MediaSession>) -> chorus_client::Result<()> {
/// let client = VoiceClient::new("ws://localhost:8082/voice", "token", media);
/// let _events = client.subscribe();
/// client.connect().await?;
/// # Ok(())
/// # }
/// ```
pub struct VoiceClient {
    url: String,
    token: String,
    media: Arc<dyn MediaSession>,
    events: broadcast::Sender<VoiceEvent>,
    view: Arc<RwLock<RoomView>>,
    cmd_tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    negotiation_window: Duration,
}

impl VoiceClient {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        media: Arc<dyn MediaSession>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            url: url.into(),
            token: token.into(),
            media,
            events,
            view: Arc::new(RwLock::new(RoomView::default())),
            cmd_tx: Mutex::new(None),
            negotiation_window: DEFAULT_NEGOTIATION_WINDOW,
        }
    }

    /// Override how long a negotiation may stall before the link fails.
    pub fn with_negotiation_window(mut self, window: Duration) -> Self {
        self.negotiation_window = window;
        self
    }

    /// Subscribe to client events.
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.events.subscribe()
    }

    /// Connect and identify. Spawns a background task that drives the
    /// connection; returns once the socket is up. Listen for
    /// [`VoiceEvent::Ready`] before joining.
    pub async fn connect(&self) -> Result<()> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        *self.cmd_tx.lock().unwrap() = Some(cmd_tx);

        let (driver, out_rx) = Driver::new(
            self.media.clone(),
            self.events.clone(),
            self.view.clone(),
            self.negotiation_window,
        );
        let token = self.token.clone();

        tokio::spawn(async move {
            run_connection(ws, token, driver, cmd_rx, out_rx).await;
        });
        Ok(())
    }

    fn command(&self, command: Command) -> Result<()> {
        self.cmd_tx
            .lock()
            .unwrap()
            .as_ref()
            .ok_or(VoiceClientError::NotConnected)?
            .send(command)
            .map_err(|_| VoiceClientError::NotConnected)
    }

    /// Join a voice channel, leaving any current one first.
    pub fn join(&self, channel_id: Uuid) -> Result<()> {
        self.command(Command::Join(channel_id))
    }

    /// Leave the current voice channel.
    pub fn leave(&self) -> Result<()> {
        self.command(Command::Leave)
    }

    pub fn toggle_mute(&self) -> Result<()> {
        self.command(Command::ToggleMute)
    }

    pub fn toggle_deafen(&self) -> Result<()> {
        self.command(Command::ToggleDeafen)
    }

    /// Start or stop screen sharing. Renegotiates every connected link so
    /// the new track is added without interrupting audio.
    pub fn set_screen_share(&self, enabled: bool) -> Result<()> {
        self.command(Command::SetScreenShare(enabled))
    }

    /// Report a voice-activity edge. Repeats of the current value are not
    /// sent.
    pub fn set_speaking(&self, speaking: bool) -> Result<()> {
        self.command(Command::Speaking(speaking))
    }

    /// Retry a failed peer link with a fresh offer.
    pub fn renegotiate(&self, peer: Uuid) -> Result<()> {
        self.command(Command::Renegotiate(peer))
    }

    /// Media-layer callback: the link toward `peer` is up.
    pub fn link_connected(&self, peer: Uuid) -> Result<()> {
        self.command(Command::LinkConnected(peer))
    }

    /// Media-layer callback: the link toward `peer` is gone.
    pub fn link_failed(&self, peer: Uuid) -> Result<()> {
        self.command(Command::LinkFailed(peer))
    }

    /// The channel we are currently in, if any.
    pub async fn current_channel(&self) -> Option<Uuid> {
        self.view.read().await.channel_id
    }

    /// Known occupants of the current channel (not including ourselves).
    pub async fn occupants(&self) -> Vec<Occupant> {
        self.view.read().await.occupants.values().cloned().collect()
    }

    /// Our own flags as last known.
    pub async fn local_flags(&self) -> LocalFlags {
        self.view.read().await.local
    }
}

/// Socket-free event core: consumes decoded signals and commands, mutates
/// the mesh and room view, and queues outbound signals.
struct Driver {
    mesh: VoiceMesh,
    media: Arc<dyn MediaSession>,
    events: broadcast::Sender<VoiceEvent>,
    view: Arc<RwLock<RoomView>>,
    out_tx: mpsc::UnboundedSender<VoiceSignal>,
}

impl Driver {
    fn new(
        media: Arc<dyn MediaSession>,
        events: broadcast::Sender<VoiceEvent>,
        view: Arc<RwLock<RoomView>>,
        negotiation_window: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<VoiceSignal>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let driver = Self {
            mesh: VoiceMesh::new(negotiation_window),
            media,
            events,
            view,
            out_tx,
        };
        (driver, out_rx)
    }

    fn emit(&self, event: VoiceEvent) {
        let _ = self.events.send(event);
    }

    fn send(&self, signal: VoiceSignal) {
        let _ = self.out_tx.send(signal);
    }

    /// Offer toward a peer, recording the link as ours to initiate.
    async fn initiate_offer(&mut self, peer: Uuid, now: Instant) {
        self.mesh.offer_link(peer, now);
        match self.media.create_offer(peer).await {
            Ok(sdp) => {
                self.send(VoiceSignal::Offer {
                    target_user_id: peer,
                    sdp,
                });
                self.emit(VoiceEvent::LinkStateChanged {
                    peer_id: peer,
                    state: LinkState::OfferSent,
                });
            }
            Err(e) => {
                tracing::warn!(peer = %peer, "Failed to create offer: {e}");
                self.mesh.link_failed(peer);
                self.media.close_peer(peer).await;
                self.emit(VoiceEvent::LinkStateChanged {
                    peer_id: peer,
                    state: LinkState::Failed,
                });
            }
        }
    }

    /// Close every link and its media connection.
    async fn teardown_links(&mut self) {
        for peer in self.mesh.clear() {
            self.media.close_peer(peer).await;
        }
    }

    async fn handle_signal(&mut self, signal: VoiceSignal, now: Instant) {
        match signal {
            VoiceSignal::Ready { session_id } => {
                self.emit(VoiceEvent::Ready { session_id });
            }

            VoiceSignal::Joined {
                channel_id,
                occupants,
                ice_servers,
            } => {
                self.media.set_ice_servers(ice_servers).await;
                {
                    let mut view = self.view.write().await;
                    view.channel_id = Some(channel_id);
                    view.occupants = occupants
                        .iter()
                        .map(|o| (o.user_id, o.clone()))
                        .collect();
                    view.local = LocalFlags::default();
                }
                // The existing occupants initiate toward us; we wait for
                // their offers rather than racing them.
                self.emit(VoiceEvent::Joined {
                    channel_id,
                    occupants,
                });
            }

            VoiceSignal::UserJoined { session } => {
                let peer = session.user_id;
                self.view
                    .write()
                    .await
                    .occupants
                    .insert(peer, session.clone());
                self.emit(VoiceEvent::UserJoined(session));
                // Newcomers wait; we were here first, so we offer.
                self.initiate_offer(peer, now).await;
            }

            VoiceSignal::UserLeft { user_id, .. } => {
                self.view.write().await.occupants.remove(&user_id);
                if self.mesh.close_link(user_id) {
                    self.media.close_peer(user_id).await;
                    self.emit(VoiceEvent::LinkStateChanged {
                        peer_id: user_id,
                        state: LinkState::Closed,
                    });
                }
                self.emit(VoiceEvent::UserLeft { user_id });
            }

            VoiceSignal::OfferReceived { from_user_id, sdp } => {
                match self.mesh.on_offer(from_user_id, now) {
                    OfferDisposition::Glare => {
                        tracing::warn!(
                            peer = %from_user_id,
                            "Dropping crossed offer; we already initiated toward this peer"
                        );
                    }
                    OfferDisposition::Accept => {
                        match self.media.accept_offer(from_user_id, sdp).await {
                            Ok(answer) => {
                                self.send(VoiceSignal::Answer {
                                    target_user_id: from_user_id,
                                    sdp: answer,
                                });
                                self.mesh.answer_sent(from_user_id);
                            }
                            Err(e) => {
                                tracing::warn!(peer = %from_user_id, "Failed to answer offer: {e}");
                                self.mesh.link_failed(from_user_id);
                                self.media.close_peer(from_user_id).await;
                                self.emit(VoiceEvent::LinkStateChanged {
                                    peer_id: from_user_id,
                                    state: LinkState::Failed,
                                });
                            }
                        }
                    }
                }
            }

            VoiceSignal::AnswerReceived { from_user_id, sdp } => {
                if self.mesh.on_answer(from_user_id) {
                    if let Err(e) = self.media.apply_answer(from_user_id, sdp).await {
                        tracing::warn!(peer = %from_user_id, "Failed to apply answer: {e}");
                        self.mesh.link_failed(from_user_id);
                        self.media.close_peer(from_user_id).await;
                        self.emit(VoiceEvent::LinkStateChanged {
                            peer_id: from_user_id,
                            state: LinkState::Failed,
                        });
                    }
                }
            }

            VoiceSignal::IceCandidateReceived {
                from_user_id,
                candidate,
            } => {
                if self.mesh.on_candidate(from_user_id) {
                    if let Err(e) = self.media.apply_candidate(from_user_id, candidate).await {
                        tracing::debug!(peer = %from_user_id, "Dropping candidate: {e}");
                    }
                }
            }

            VoiceSignal::VoiceStateChanged { user_id, flags } => {
                let mut view = self.view.write().await;
                if let Some(occupant) = view.occupants.get_mut(&user_id) {
                    occupant.flags = flags;
                } else {
                    // Our own flags pushed back at us — a moderation
                    // override. Adopt it; our own toggle does not undo it.
                    view.local.muted = flags.muted;
                    view.local.deafened = flags.deafened;
                }
                drop(view);
                self.emit(VoiceEvent::VoiceStateChanged { user_id, flags });
            }

            VoiceSignal::SpeakingChanged { user_id, speaking } => {
                if let Some(occupant) = self.view.write().await.occupants.get_mut(&user_id) {
                    occupant.flags.speaking = speaking;
                }
                self.emit(VoiceEvent::SpeakingChanged { user_id, speaking });
            }

            VoiceSignal::ForciblyDisconnected { reason } => {
                self.teardown_links().await;
                let mut view = self.view.write().await;
                view.channel_id = None;
                view.occupants.clear();
                view.local = LocalFlags::default();
                drop(view);
                self.emit(VoiceEvent::ForciblyDisconnected { reason });
            }

            VoiceSignal::Error { code, message } => {
                self.emit(VoiceEvent::ServerError { code, message });
            }

            // Client → server ops echoed back make no sense; ignore.
            _ => {}
        }
    }

    async fn handle_command(&mut self, command: Command, now: Instant) {
        match command {
            Command::Join(channel_id) => {
                // Switching channels: links to the old room are dead.
                self.teardown_links().await;
                self.send(VoiceSignal::Join { channel_id });
            }

            Command::Leave => {
                self.teardown_links().await;
                let mut view = self.view.write().await;
                view.channel_id = None;
                view.occupants.clear();
                view.local = LocalFlags::default();
                drop(view);
                self.send(VoiceSignal::Leave);
            }

            Command::ToggleMute => {
                let muted = {
                    let mut view = self.view.write().await;
                    view.local.muted = !view.local.muted;
                    view.local.muted
                };
                self.send(VoiceSignal::StateUpdate {
                    muted: Some(muted),
                    deafened: None,
                    screen_sharing: None,
                });
            }

            Command::ToggleDeafen => {
                let deafened = {
                    let mut view = self.view.write().await;
                    view.local.deafened = !view.local.deafened;
                    view.local.deafened
                };
                self.send(VoiceSignal::StateUpdate {
                    muted: None,
                    deafened: Some(deafened),
                    screen_sharing: None,
                });
            }

            Command::SetScreenShare(enabled) => {
                let already = self.view.read().await.local.screen_sharing;
                if already == enabled {
                    return;
                }
                if let Err(e) = self.media.set_screen_share(enabled).await {
                    tracing::warn!("Screen share change failed: {e}");
                    return;
                }
                self.view.write().await.local.screen_sharing = enabled;
                self.send(VoiceSignal::StateUpdate {
                    muted: None,
                    deafened: None,
                    screen_sharing: Some(enabled),
                });

                // The track set changed: refresh every connected link
                // without tearing it down.
                for peer in self.mesh.begin_renegotiation(now) {
                    self.emit(VoiceEvent::LinkStateChanged {
                        peer_id: peer,
                        state: LinkState::Renegotiating,
                    });
                    match self.media.create_offer(peer).await {
                        Ok(sdp) => self.send(VoiceSignal::Offer {
                            target_user_id: peer,
                            sdp,
                        }),
                        Err(e) => {
                            tracing::warn!(peer = %peer, "Renegotiation offer failed: {e}");
                            self.mesh.link_failed(peer);
                            self.media.close_peer(peer).await;
                            self.emit(VoiceEvent::LinkStateChanged {
                                peer_id: peer,
                                state: LinkState::Failed,
                            });
                        }
                    }
                }
            }

            Command::Speaking(speaking) => {
                let changed = {
                    let mut view = self.view.write().await;
                    let changed = view.local.speaking != speaking;
                    view.local.speaking = speaking;
                    changed
                };
                if changed {
                    self.send(VoiceSignal::Speaking { speaking });
                }
            }

            Command::Renegotiate(peer) => {
                self.initiate_offer(peer, now).await;
            }

            Command::LinkConnected(peer) => {
                self.mesh.link_connected(peer);
                self.emit(VoiceEvent::LinkStateChanged {
                    peer_id: peer,
                    state: LinkState::Connected,
                });
            }

            Command::LinkFailed(peer) => {
                self.mesh.link_failed(peer);
                self.media.close_peer(peer).await;
                self.emit(VoiceEvent::LinkStateChanged {
                    peer_id: peer,
                    state: LinkState::Failed,
                });
            }
        }
    }

    /// Abandon negotiations that overran the window.
    async fn sweep(&mut self, now: Instant) {
        for peer in self.mesh.expire(now) {
            tracing::debug!(peer = %peer, "Negotiation timed out");
            self.media.close_peer(peer).await;
            self.emit(VoiceEvent::LinkStateChanged {
                peer_id: peer,
                state: LinkState::Failed,
            });
        }
    }
}

async fn run_connection(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    token: String,
    mut driver: Driver,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut out_rx: mpsc::UnboundedReceiver<VoiceSignal>,
) {
    let (mut sink, mut stream) = ws.split();

    driver.send(VoiceSignal::Identify { token });

    let mut sweep_timer = tokio::time::interval(Duration::from_secs(1));
    sweep_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<VoiceSignal>(&text) {
                        Ok(signal) => driver.handle_signal(signal, Instant::now()).await,
                        Err(e) => tracing::warn!("Undecodable signal from server: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Voice socket error: {e}");
                    break;
                }
            },
            command = cmd_rx.recv() => match command {
                Some(command) => driver.handle_command(command, Instant::now()).await,
                None => break,
            },
            outbound = out_rx.recv() => {
                let Some(signal) = outbound else { break };
                let Ok(json) = serde_json::to_string(&signal) else { continue };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            _ = sweep_timer.tick() => driver.sweep(Instant::now()).await,
        }
    }

    driver.teardown_links().await;
    driver.emit(VoiceEvent::Disconnected);
    tracing::info!("Voice signaling connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaSession;
    use async_trait::async_trait;
    use chorus_common::wire::IceServerConfig;
    use chrono::Utc;
    use std::sync::Mutex as StdMutex;

    /// Records calls; produces canned payloads.
    #[derive(Default)]
    struct FakeMedia {
        calls: StdMutex<Vec<String>>,
        fail_offers: StdMutex<bool>,
    }

    impl FakeMedia {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl MediaSession for FakeMedia {
        async fn set_ice_servers(&self, _servers: Vec<IceServerConfig>) {
            self.record("set_ice_servers".into());
        }

        async fn create_offer(&self, peer: Uuid) -> Result<serde_json::Value> {
            if *self.fail_offers.lock().unwrap() {
                return Err(VoiceClientError::Media("no camera".into()));
            }
            self.record(format!("create_offer:{peer}"));
            Ok(serde_json::json!({"type": "offer"}))
        }

        async fn accept_offer(
            &self,
            peer: Uuid,
            _sdp: serde_json::Value,
        ) -> Result<serde_json::Value> {
            self.record(format!("accept_offer:{peer}"));
            Ok(serde_json::json!({"type": "answer"}))
        }

        async fn apply_answer(&self, peer: Uuid, _sdp: serde_json::Value) -> Result<()> {
            self.record(format!("apply_answer:{peer}"));
            Ok(())
        }

        async fn apply_candidate(&self, peer: Uuid, _candidate: serde_json::Value) -> Result<()> {
            self.record(format!("apply_candidate:{peer}"));
            Ok(())
        }

        async fn set_screen_share(&self, enabled: bool) -> Result<()> {
            self.record(format!("set_screen_share:{enabled}"));
            Ok(())
        }

        async fn close_peer(&self, peer: Uuid) {
            self.record(format!("close_peer:{peer}"));
        }
    }

    struct Harness {
        driver: Driver,
        media: Arc<FakeMedia>,
        out_rx: mpsc::UnboundedReceiver<VoiceSignal>,
        _events_rx: broadcast::Receiver<VoiceEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let media = Arc::new(FakeMedia::default());
            let (events, events_rx) = broadcast::channel(64);
            let view = Arc::new(RwLock::new(RoomView::default()));
            let (driver, out_rx) =
                Driver::new(media.clone(), events, view, Duration::from_secs(15));
            Self {
                driver,
                media,
                out_rx,
                _events_rx: events_rx,
            }
        }

        fn occupant(user_id: Uuid, channel_id: Uuid) -> Occupant {
            Occupant {
                user_id,
                username: "peer".into(),
                channel_id,
                joined_at: Utc::now(),
                flags: VoiceFlags::default(),
            }
        }

        async fn joined(&mut self, channel_id: Uuid, occupants: Vec<Occupant>) {
            self.driver
                .handle_signal(
                    VoiceSignal::Joined {
                        channel_id,
                        occupants,
                        ice_servers: IceServerConfig::defaults(),
                    },
                    Instant::now(),
                )
                .await;
        }

        fn sent(&mut self) -> Vec<VoiceSignal> {
            std::iter::from_fn(|| self.out_rx.try_recv().ok()).collect()
        }
    }

    #[tokio::test]
    async fn newcomer_waits_for_offers_from_existing_occupants() {
        let mut h = Harness::new();
        let channel = Uuid::new_v4();
        let existing = Uuid::new_v4();

        h.joined(channel, vec![Harness::occupant(existing, channel)]).await;

        // No offers initiated by the newcomer.
        assert!(h.sent().is_empty());
        assert!(h.media.calls().contains(&"set_ice_servers".to_string()));

        // The existing occupant offers; we answer.
        h.driver
            .handle_signal(
                VoiceSignal::OfferReceived {
                    from_user_id: existing,
                    sdp: serde_json::json!({"type": "offer"}),
                },
                Instant::now(),
            )
            .await;

        let sent = h.sent();
        assert!(matches!(
            sent.as_slice(),
            [VoiceSignal::Answer { target_user_id, .. }] if *target_user_id == existing
        ));
        assert_eq!(
            h.driver.mesh.link_state(existing),
            Some(LinkState::AnswerReceived)
        );
        assert!(!h.driver.mesh.link(existing).unwrap().initiator);
    }

    #[tokio::test]
    async fn existing_occupant_offers_to_the_newcomer() {
        let mut h = Harness::new();
        let channel = Uuid::new_v4();
        let newcomer = Uuid::new_v4();

        h.joined(channel, vec![]).await;
        h.driver
            .handle_signal(
                VoiceSignal::UserJoined {
                    session: Harness::occupant(newcomer, channel),
                },
                Instant::now(),
            )
            .await;

        let sent = h.sent();
        assert!(matches!(
            sent.as_slice(),
            [VoiceSignal::Offer { target_user_id, .. }] if *target_user_id == newcomer
        ));
        assert_eq!(h.driver.mesh.link_state(newcomer), Some(LinkState::OfferSent));

        // Their answer completes the exchange.
        h.driver
            .handle_signal(
                VoiceSignal::AnswerReceived {
                    from_user_id: newcomer,
                    sdp: serde_json::json!({"type": "answer"}),
                },
                Instant::now(),
            )
            .await;
        assert_eq!(
            h.driver.mesh.link_state(newcomer),
            Some(LinkState::AnswerReceived)
        );
        assert!(h
            .media
            .calls()
            .contains(&format!("apply_answer:{newcomer}")));
    }

    #[tokio::test]
    async fn crossed_offer_is_dropped_without_touching_media() {
        let mut h = Harness::new();
        let channel = Uuid::new_v4();
        let newcomer = Uuid::new_v4();

        h.joined(channel, vec![]).await;
        h.driver
            .handle_signal(
                VoiceSignal::UserJoined {
                    session: Harness::occupant(newcomer, channel),
                },
                Instant::now(),
            )
            .await;
        let _ = h.sent();

        // The newcomer (wrongly) offers back while our offer is in flight.
        h.driver
            .handle_signal(
                VoiceSignal::OfferReceived {
                    from_user_id: newcomer,
                    sdp: serde_json::json!({"type": "offer"}),
                },
                Instant::now(),
            )
            .await;

        assert!(h.sent().is_empty());
        assert!(!h
            .media
            .calls()
            .iter()
            .any(|c| c.starts_with("accept_offer")));
        assert_eq!(h.driver.mesh.link_state(newcomer), Some(LinkState::OfferSent));
    }

    #[tokio::test]
    async fn departed_peer_gets_its_media_closed() {
        let mut h = Harness::new();
        let channel = Uuid::new_v4();
        let peer = Uuid::new_v4();

        h.joined(channel, vec![]).await;
        h.driver
            .handle_signal(
                VoiceSignal::UserJoined {
                    session: Harness::occupant(peer, channel),
                },
                Instant::now(),
            )
            .await;
        h.driver
            .handle_signal(
                VoiceSignal::UserLeft {
                    user_id: peer,
                    channel_id: channel,
                },
                Instant::now(),
            )
            .await;

        assert!(h.media.calls().contains(&format!("close_peer:{peer}")));
        assert_eq!(h.driver.mesh.link_state(peer), Some(LinkState::Closed));

        // Late candidates for the departed peer are not applied.
        h.driver
            .handle_signal(
                VoiceSignal::IceCandidateReceived {
                    from_user_id: peer,
                    candidate: serde_json::json!({}),
                },
                Instant::now(),
            )
            .await;
        assert!(!h
            .media
            .calls()
            .contains(&format!("apply_candidate:{peer}")));
    }

    #[tokio::test]
    async fn screen_share_renegotiates_connected_links() {
        let mut h = Harness::new();
        let channel = Uuid::new_v4();
        let peer = Uuid::new_v4();

        h.joined(channel, vec![]).await;
        h.driver
            .handle_signal(
                VoiceSignal::UserJoined {
                    session: Harness::occupant(peer, channel),
                },
                Instant::now(),
            )
            .await;
        h.driver
            .handle_command(Command::LinkConnected(peer), Instant::now())
            .await;
        let _ = h.sent();

        h.driver
            .handle_command(Command::SetScreenShare(true), Instant::now())
            .await;

        let sent = h.sent();
        assert!(matches!(
            sent.as_slice(),
            [
                VoiceSignal::StateUpdate { screen_sharing: Some(true), .. },
                VoiceSignal::Offer { target_user_id, .. },
            ] if *target_user_id == peer
        ));
        assert_eq!(
            h.driver.mesh.link_state(peer),
            Some(LinkState::Renegotiating)
        );
        assert!(h.media.calls().contains(&"set_screen_share:true".to_string()));

        // Repeating the same value is a no-op.
        h.driver
            .handle_command(Command::SetScreenShare(true), Instant::now())
            .await;
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn forced_disconnect_tears_down_everything_locally() {
        let mut h = Harness::new();
        let channel = Uuid::new_v4();
        let peer = Uuid::new_v4();

        h.joined(channel, vec![]).await;
        h.driver
            .handle_signal(
                VoiceSignal::UserJoined {
                    session: Harness::occupant(peer, channel),
                },
                Instant::now(),
            )
            .await;
        h.driver
            .handle_command(Command::LinkConnected(peer), Instant::now())
            .await;

        h.driver
            .handle_signal(
                VoiceSignal::ForciblyDisconnected {
                    reason: ForcedDisconnectReason::Disconnected,
                },
                Instant::now(),
            )
            .await;

        assert!(h.media.calls().contains(&format!("close_peer:{peer}")));
        assert!(h.driver.view.read().await.channel_id.is_none());
        assert!(h.driver.mesh.live_peers().is_empty());
    }

    #[tokio::test]
    async fn moderation_override_is_adopted_and_own_toggle_reports_from_it() {
        let mut h = Harness::new();
        let channel = Uuid::new_v4();
        let me = Uuid::new_v4();

        h.joined(channel, vec![]).await;

        // Server pushes our own flags back: a moderator muted us.
        h.driver
            .handle_signal(
                VoiceSignal::VoiceStateChanged {
                    user_id: me,
                    flags: VoiceFlags {
                        muted: true,
                        server_muted: true,
                        ..Default::default()
                    },
                },
                Instant::now(),
            )
            .await;
        assert!(h.driver.view.read().await.local.muted);

        // Our next toggle self-reports unmuted; the server's precedence
        // rule decides what the room actually sees.
        h.driver.handle_command(Command::ToggleMute, Instant::now()).await;
        let sent = h.sent();
        assert!(matches!(
            sent.as_slice(),
            [VoiceSignal::StateUpdate { muted: Some(false), .. }]
        ));
    }

    #[tokio::test]
    async fn speaking_is_sent_on_edges_only() {
        let mut h = Harness::new();
        h.joined(Uuid::new_v4(), vec![]).await;

        h.driver.handle_command(Command::Speaking(true), Instant::now()).await;
        h.driver.handle_command(Command::Speaking(true), Instant::now()).await;
        h.driver.handle_command(Command::Speaking(false), Instant::now()).await;

        let sent = h.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0], VoiceSignal::Speaking { speaking: true }));
        assert!(matches!(sent[1], VoiceSignal::Speaking { speaking: false }));
    }

    #[tokio::test]
    async fn failed_offer_creation_marks_the_link_failed() {
        let mut h = Harness::new();
        let channel = Uuid::new_v4();
        let newcomer = Uuid::new_v4();
        *h.media.fail_offers.lock().unwrap() = true;

        h.joined(channel, vec![]).await;
        h.driver
            .handle_signal(
                VoiceSignal::UserJoined {
                    session: Harness::occupant(newcomer, channel),
                },
                Instant::now(),
            )
            .await;

        assert!(h.sent().is_empty());
        assert_eq!(h.driver.mesh.link_state(newcomer), Some(LinkState::Failed));
        assert!(h.media.calls().contains(&format!("close_peer:{newcomer}")));
    }

    #[tokio::test]
    async fn stalled_negotiation_fails_on_sweep() {
        let mut h = Harness::new();
        let channel = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let start = Instant::now();

        h.joined(channel, vec![]).await;
        h.driver
            .handle_signal(
                VoiceSignal::UserJoined {
                    session: Harness::occupant(peer, channel),
                },
                start,
            )
            .await;

        h.driver.sweep(start + Duration::from_secs(20)).await;
        assert_eq!(h.driver.mesh.link_state(peer), Some(LinkState::Failed));
        assert!(h.media.calls().contains(&format!("close_peer:{peer}")));
    }
}
