//! Voice signaling WebSocket handler.
//!
//! One connection per user, event-driven, single flow of control:
//!
//! 1. Client connects to /voice
//! 2. Authenticates with a pre-issued token (`Identify`)
//! 3. Sends `Join` with a channel id — any prior session is ended first
//! 4. Server replies `Joined` with the existing occupants + ICE config;
//!    those occupants each initiate an offer toward the newcomer
//! 5. Offer/answer/ICE flow peer-to-peer through the relay; media never
//!    touches this server
//! 6. State updates and speaking edges fan out to the room
//! 7. `Leave` or disconnect tears the session down and announces it
//!
//! The receive loop owns only the authenticated identity; everything else
//! (current channel, occupancy) is read from the registry so that
//! moderation-triggered teardown from another task is observed instead of
//! raced.

use crate::VoiceServer;
use crate::relay::SignalKind;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use chorus_common::wire::VoiceSignal;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(server): State<Arc<VoiceServer>>) -> Response {
    ws.on_upgrade(move |socket| handle_voice_connection(socket, server))
}

/// Handle a single voice signaling WebSocket connection.
async fn handle_voice_connection(socket: WebSocket, server: Arc<VoiceServer>) {
    let (mut sender, mut receiver) = socket.split();

    let session_id = Uuid::new_v4().to_string();
    let mut user: Option<Uuid> = None;
    let mut username = String::new();

    // All outbound traffic — direct replies, relayed payloads, room
    // broadcasts — funnels through one queue so ordering on the socket
    // matches the order events were produced.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<VoiceSignal>();

    let send_task = tokio::spawn(async move {
        while let Some(signal) = out_rx.recv().await {
            let Ok(json) = serde_json::to_string(&signal) else {
                continue;
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    tracing::debug!(session = %session_id, "Voice WebSocket connected");

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let signal = match serde_json::from_str::<VoiceSignal>(&text) {
                    Ok(s) => s,
                    Err(e) => {
                        send_error(&out_tx, 4000, &format!("Invalid message: {e}"));
                        continue;
                    }
                };

                match signal {
                    VoiceSignal::Identify { token } => {
                        match chorus_common::auth::validate_token(&token, server.jwt_secret()) {
                            Ok(claims) => {
                                let uid: Uuid = match claims.sub.parse() {
                                    Ok(id) => id,
                                    Err(_) => {
                                        send_error(&out_tx, 4001, "Invalid user ID");
                                        continue;
                                    }
                                };
                                user = Some(uid);
                                username = claims.username;

                                server.bus.register(uid, out_tx.clone()).await;
                                let _ = out_tx.send(VoiceSignal::Ready {
                                    session_id: session_id.clone(),
                                });

                                tracing::info!(
                                    session = %session_id,
                                    user = %username,
                                    "Voice client authenticated"
                                );
                            }
                            Err(_) => send_error(&out_tx, 4004, "Invalid token"),
                        }
                    }

                    VoiceSignal::Join { channel_id } => {
                        let Some(uid) = user else {
                            send_error(&out_tx, 4003, "Not authenticated");
                            continue;
                        };

                        let outcome = match server
                            .registry
                            .join(uid, &username, channel_id, &session_id)
                            .await
                        {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                send_error(&out_tx, 4005, &e.to_string());
                                continue;
                            }
                        };

                        // Switching channels: the old room hears a normal leave.
                        if let Some(previous) = outcome.previous_channel {
                            server.broadcaster.announce_leave(previous, uid).await;
                        }

                        let _ = out_tx.send(VoiceSignal::Joined {
                            channel_id,
                            occupants: outcome.peers,
                            ice_servers: server.ice_servers().to_vec(),
                        });

                        server.broadcaster.announce_join(&outcome.session).await;
                    }

                    VoiceSignal::Leave => {
                        if let Some(uid) = user {
                            if let Some(ended) = server.registry.leave(uid).await {
                                server
                                    .broadcaster
                                    .announce_leave(ended.channel_id, uid)
                                    .await;
                            }
                        }
                    }

                    VoiceSignal::Offer { target_user_id, sdp } => {
                        relay_from(&server, user, target_user_id, SignalKind::Offer, sdp).await;
                    }

                    VoiceSignal::Answer { target_user_id, sdp } => {
                        relay_from(&server, user, target_user_id, SignalKind::Answer, sdp).await;
                    }

                    VoiceSignal::IceCandidate {
                        target_user_id,
                        candidate,
                    } => {
                        relay_from(
                            &server,
                            user,
                            target_user_id,
                            SignalKind::IceCandidate,
                            candidate,
                        )
                        .await;
                    }

                    VoiceSignal::StateUpdate {
                        muted,
                        deafened,
                        screen_sharing,
                    } => {
                        if let Some(uid) = user {
                            let update = crate::state::StateUpdate {
                                muted,
                                deafened,
                                screen_sharing,
                            };
                            if let Some(session) =
                                server.registry.update_self_state(uid, &update).await
                            {
                                server.broadcaster.state_changed(&session).await;
                            }
                        }
                    }

                    VoiceSignal::Speaking { speaking } => {
                        if let Some(uid) = user {
                            if let Some(channel_id) =
                                server.registry.set_speaking(uid, speaking).await
                            {
                                server
                                    .broadcaster
                                    .speaking_changed(channel_id, uid, speaking)
                                    .await;
                            }
                        }
                    }

                    // Server → Client messages should not be received from client
                    _ => send_error(&out_tx, 4000, "Invalid opcode"),
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Cleanup on disconnect: connection loss is an implicit leave.
    if let Some(uid) = user {
        if let Some(ended) = server.registry.leave(uid).await {
            server.broadcaster.announce_leave(ended.channel_id, uid).await;
        }
        server.bus.unregister(uid, &out_tx).await;
    }
    send_task.abort();

    tracing::info!(session = %session_id, "Voice WebSocket disconnected");
}

/// Relay a negotiation payload from the connection's user, if any. The
/// sender's current channel comes from the registry, so payloads sent after a
/// forced disconnect fall into the normal drop path.
async fn relay_from(
    server: &VoiceServer,
    user: Option<Uuid>,
    target_user_id: Uuid,
    kind: SignalKind,
    payload: serde_json::Value,
) {
    let Some(uid) = user else {
        return;
    };
    let Some(channel_id) = server.registry.current_channel(uid).await else {
        tracing::debug!(user = %uid, ?kind, "Dropping relay from user outside voice");
        return;
    };
    server
        .relay
        .relay(kind, uid, target_user_id, channel_id, payload)
        .await;
}

/// Queue an error signal to the client.
fn send_error(out_tx: &mpsc::UnboundedSender<VoiceSignal>, code: u32, message: &str) {
    let _ = out_tx.send(VoiceSignal::Error {
        code,
        message: message.to_string(),
    });
}
