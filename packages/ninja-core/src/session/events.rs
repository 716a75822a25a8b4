//! Events the session reports to the UI.

use crate::messaging::Message;
use crate::network::MediaStream;

/// Notification from a [`SessionCoordinator`](super::SessionCoordinator)
///
/// Delivered through a `broadcast` channel; subscribe with
/// [`SessionCoordinator::subscribe`](super::SessionCoordinator::subscribe).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A room message or DM was decrypted
    Message {
        /// Peer whose link delivered it
        from: String,
        /// The plaintext message
        message: Message,
    },
    /// A link to a peer was created
    PeerJoined {
        /// Remote peer
        peer_id: String,
    },
    /// A peer's data channel opened
    PeerConnected {
        /// Remote peer
        peer_id: String,
    },
    /// A link to a peer was closed and discarded
    PeerLeft {
        /// Remote peer
        peer_id: String,
    },
    /// A peer's media became available
    ///
    /// Repeats for the same stream id when more of its tracks arrive;
    /// the latest event carries the complete track list.
    Stream {
        /// Remote peer
        peer_id: String,
        /// Remote media handle
        stream: MediaStream,
    },
}

impl SessionEvent {
    /// The peer this event concerns
    pub fn peer_id(&self) -> &str {
        match self {
            SessionEvent::Message { from, .. } => from,
            SessionEvent::PeerJoined { peer_id }
            | SessionEvent::PeerConnected { peer_id }
            | SessionEvent::PeerLeft { peer_id }
            | SessionEvent::Stream { peer_id, .. } => peer_id,
        }
    }
}
