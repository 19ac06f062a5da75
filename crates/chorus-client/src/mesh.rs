//! Peer-link mesh management.
//!
//! Every occupant of a voice channel holds one negotiation link per other
//! occupant. This module is the bookkeeping for those links: who initiates,
//! which negotiation step each link is in, and when a stalled negotiation is
//! abandoned. It is deliberately sans-IO — callers feed it events and
//! timestamps and perform the sends it approves — so every transition is
//! testable without sockets or media.
//!
//! Initiator rule: occupants already in the room offer toward the newcomer.
//! A link is therefore created either by [`VoiceMesh::offer_link`] (someone
//! joined after us; we initiate) or by [`VoiceMesh::on_offer`] (we are the
//! newcomer; they initiate). An offer arriving on a link we initiated is
//! glare — the remote side broke the rule — and is rejected so the two sides
//! cannot deadlock on crossed offers.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Negotiation state of one peer link, from the local side's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Link exists but no offer has gone out yet.
    Idle,
    /// We sent an offer and are waiting for the answer.
    OfferSent,
    /// The offer/answer exchange completed; waiting for connectivity.
    AnswerReceived,
    /// The media layer reported the link up.
    Connected,
    /// A track change triggered a fresh offer/answer round on a live link.
    Renegotiating,
    /// Negotiation did not complete within the window, or media gave up.
    Failed,
    /// The peer left; the link is defunct.
    Closed,
}

impl LinkState {
    /// States in which a negotiation clock is running.
    fn is_pending(self) -> bool {
        matches!(
            self,
            LinkState::Idle | LinkState::OfferSent | LinkState::AnswerReceived | LinkState::Renegotiating
        )
    }

    fn is_defunct(self) -> bool {
        matches!(self, LinkState::Failed | LinkState::Closed)
    }
}

/// Negotiation bookkeeping for one remote peer.
#[derive(Debug, Clone)]
pub struct PeerLink {
    pub peer_id: Uuid,
    pub state: LinkState,
    /// True when the local side sent the first offer on this link.
    pub initiator: bool,
    negotiating_since: Option<Instant>,
}

/// What to do with an inbound offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDisposition {
    /// Answer it.
    Accept,
    /// Crossed offers: we initiated toward this peer; drop theirs.
    Glare,
}

/// All peer links for the local occupant's current room.
#[derive(Debug)]
pub struct VoiceMesh {
    links: HashMap<Uuid, PeerLink>,
    negotiation_window: Duration,
}

impl VoiceMesh {
    pub fn new(negotiation_window: Duration) -> Self {
        Self {
            links: HashMap::new(),
            negotiation_window,
        }
    }

    pub fn link(&self, peer: Uuid) -> Option<&PeerLink> {
        self.links.get(&peer)
    }

    pub fn link_state(&self, peer: Uuid) -> Option<LinkState> {
        self.links.get(&peer).map(|l| l.state)
    }

    /// Peers with a live (non-defunct) link.
    pub fn live_peers(&self) -> Vec<Uuid> {
        self.links
            .values()
            .filter(|l| !l.state.is_defunct())
            .map(|l| l.peer_id)
            .collect()
    }

    /// Start (or restart) negotiation toward `peer` as the initiator. The
    /// caller sends the offer this approves. Replaces a defunct link;
    /// refreshes a pending one (fresh offer after a local retry).
    pub fn offer_link(&mut self, peer: Uuid, now: Instant) {
        let link = self.links.entry(peer).or_insert(PeerLink {
            peer_id: peer,
            state: LinkState::Idle,
            initiator: true,
            negotiating_since: None,
        });
        if link.state.is_defunct() {
            link.initiator = true;
        }
        link.state = LinkState::OfferSent;
        link.negotiating_since = Some(now);
    }

    /// An offer arrived from `peer`. Creates the link lazily when this is
    /// the first exchange (they initiate, we answer), flips a connected link
    /// into renegotiation, and rejects glare.
    pub fn on_offer(&mut self, peer: Uuid, now: Instant) -> OfferDisposition {
        match self.links.get_mut(&peer) {
            Some(link) if link.initiator && link.state == LinkState::OfferSent => {
                OfferDisposition::Glare
            }
            Some(link) => {
                if link.state == LinkState::Connected {
                    link.state = LinkState::Renegotiating;
                } else if link.state.is_defunct() {
                    link.initiator = false;
                    link.state = LinkState::Idle;
                }
                link.negotiating_since = Some(now);
                OfferDisposition::Accept
            }
            None => {
                self.links.insert(
                    peer,
                    PeerLink {
                        peer_id: peer,
                        state: LinkState::Idle,
                        initiator: false,
                        negotiating_since: Some(now),
                    },
                );
                OfferDisposition::Accept
            }
        }
    }

    /// The caller sent its answer for `peer`'s offer.
    pub fn answer_sent(&mut self, peer: Uuid) {
        if let Some(link) = self.links.get_mut(&peer) {
            if link.state == LinkState::Idle {
                link.state = LinkState::AnswerReceived;
            }
            // A renegotiating link stays Renegotiating until media confirms.
        }
    }

    /// An answer arrived from `peer`. Returns whether the caller should
    /// apply it; answers for links we never offered on are stale noise.
    pub fn on_answer(&mut self, peer: Uuid) -> bool {
        match self.links.get_mut(&peer) {
            Some(link) if link.state == LinkState::OfferSent => {
                link.state = LinkState::AnswerReceived;
                true
            }
            Some(link) if link.state == LinkState::Renegotiating => true,
            _ => false,
        }
    }

    /// A trickled candidate arrived from `peer`. Candidates for defunct or
    /// unknown links are dropped.
    pub fn on_candidate(&self, peer: Uuid) -> bool {
        self.links
            .get(&peer)
            .is_some_and(|l| !l.state.is_defunct())
    }

    /// Media reported the link toward `peer` up.
    pub fn link_connected(&mut self, peer: Uuid) {
        if let Some(link) = self.links.get_mut(&peer) {
            if !link.state.is_defunct() {
                link.state = LinkState::Connected;
                link.negotiating_since = None;
            }
        }
    }

    /// Media gave up on the link toward `peer`.
    pub fn link_failed(&mut self, peer: Uuid) {
        if let Some(link) = self.links.get_mut(&peer) {
            if link.state != LinkState::Closed {
                link.state = LinkState::Failed;
                link.negotiating_since = None;
            }
        }
    }

    /// The peer left the room. Returns whether a link existed.
    pub fn close_link(&mut self, peer: Uuid) -> bool {
        match self.links.get_mut(&peer) {
            Some(link) => {
                link.state = LinkState::Closed;
                link.negotiating_since = None;
                true
            }
            None => false,
        }
    }

    /// A local track change (screen share start/stop): every connected link
    /// re-enters negotiation without being torn down, preserving the audio
    /// already flowing. Returns the peers to send fresh offers to.
    pub fn begin_renegotiation(&mut self, now: Instant) -> Vec<Uuid> {
        let mut peers = Vec::new();
        for link in self.links.values_mut() {
            if link.state == LinkState::Connected {
                link.state = LinkState::Renegotiating;
                link.negotiating_since = Some(now);
                peers.push(link.peer_id);
            }
        }
        peers
    }

    /// Abandon negotiations that overran the window. Returns the peers whose
    /// links just failed, for the caller to clean up and optionally retry.
    pub fn expire(&mut self, now: Instant) -> Vec<Uuid> {
        let window = self.negotiation_window;
        let mut expired = Vec::new();
        for link in self.links.values_mut() {
            let overdue = link
                .negotiating_since
                .is_some_and(|since| now.duration_since(since) >= window);
            if link.state.is_pending() && overdue {
                link.state = LinkState::Failed;
                link.negotiating_since = None;
                expired.push(link.peer_id);
            }
        }
        expired
    }

    /// Drop every link (leaving the room or forced disconnect). Returns the
    /// peers that had live links, for media teardown.
    pub fn clear(&mut self) -> Vec<Uuid> {
        let peers = self.live_peers();
        self.links.clear();
        peers
    }
}
