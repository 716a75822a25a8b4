//! # Link Events
//!
//! Events flowing from transports and `PeerLink`s to the session.
//!
//! Every event is stamped with the peer id and the link generation that
//! produced it. The coordinator ignores events from a generation it has
//! already discarded, so a late callback from a closed link can never touch
//! a newer link to the same peer.

use tokio::sync::mpsc;

use super::protocol::{ChatEnvelope, Signal};
use super::transport::{MediaStream, TransportEvent};

/// Events a `PeerLink` reports to its owner
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A handshake step must be delivered to the remote peer
    SignalToSend(Signal),
    /// A frame arrived on the data channel
    MessageReceived(ChatEnvelope),
    /// The remote side's media is available
    RemoteStream(MediaStream),
    /// The data channel is ready for traffic
    ChannelOpen,
    /// The link is closed and must be discarded
    Closed,
}

/// What happened on a link
#[derive(Debug, Clone)]
pub enum LinkPayload {
    /// Raw transport callback, not yet seen by the `PeerLink`
    Transport(TransportEvent),
    /// Typed event from the `PeerLink` state machine
    Peer(PeerEvent),
}

/// An event from one link generation
#[derive(Debug, Clone)]
pub struct LinkEvent {
    /// Remote peer
    pub peer_id: String,
    /// Link generation
    pub link_id: u64,
    /// The event
    pub payload: LinkPayload,
}

impl LinkEvent {
    /// Check if this is the link's final event
    pub fn is_closed(&self) -> bool {
        matches!(self.payload, LinkPayload::Peer(PeerEvent::Closed))
    }
}

/// Sending half handed to transports and `PeerLink`s
///
/// Cheap to clone; sends never block. Events sent after the session is
/// gone are dropped.
#[derive(Debug, Clone)]
pub struct LinkEventSink {
    peer_id: String,
    link_id: u64,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkEventSink {
    /// Create a sink for one link generation
    pub fn new(peer_id: impl Into<String>, link_id: u64, tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self {
            peer_id: peer_id.into(),
            link_id,
            tx,
        }
    }

    /// Remote peer this sink reports for
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Link generation this sink reports for
    pub fn link_id(&self) -> u64 {
        self.link_id
    }

    /// Report a transport callback
    pub fn transport(&self, event: TransportEvent) {
        self.send(LinkPayload::Transport(event));
    }

    /// Report a `PeerLink` event
    pub fn peer(&self, event: PeerEvent) {
        self.send(LinkPayload::Peer(event));
    }

    fn send(&self, payload: LinkPayload) {
        let event = LinkEvent {
            peer_id: self.peer_id.clone(),
            link_id: self.link_id,
            payload,
        };
        if self.tx.send(event).is_err() {
            tracing::trace!(peer_id = %self.peer_id, "Link event dropped, session gone");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
