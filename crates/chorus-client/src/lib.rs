//! Voice client for Chorus.
//!
//! Implements the peer side of the voice signaling protocol: one WebSocket
//! to the voice server, one WebRTC link per other occupant (full mesh), with
//! this crate coordinating when links are offered, answered, renegotiated,
//! and abandoned. The media layer itself is supplied by the embedding
//! application behind the [`media::MediaSession`] trait — this crate never
//! touches SDP internals.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use chorus_client::{VoiceClient, VoiceEvent, media::MediaSession};
//! use std::sync::Arc;
//!
//! # async fn example(media: Arc<dyn MediaSession>, channel: uuid::Uuid) -> chorus_client::Result<()> {
//! let client = VoiceClient::new("ws://localhost:8082/voice", "mytoken", media);
//! let mut events = client.subscribe();
//! client.connect().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         VoiceEvent::Ready { .. } => client.join(channel)?,
//!         VoiceEvent::Joined { occupants, .. } => {
//!             // Existing occupants will offer to us; nothing to do yet.
//!             println!("{} peers already here", occupants.len());
//!         }
//!         VoiceEvent::ForciblyDisconnected { reason } => {
//!             println!("removed by a moderator: {reason:?}");
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod media;
pub mod mesh;

pub use client::{LocalFlags, VoiceClient, VoiceEvent};
pub use error::{Result, VoiceClientError};
pub use mesh::{LinkState, PeerLink, VoiceMesh};
