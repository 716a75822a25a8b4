//! # Signaling
//!
//! Out-of-band delivery of handshake steps between peers that do not
//! share a link yet. Once a link is open, later handshakes can be tunnelled
//! through it as [`ChatEnvelope::Signal`](super::ChatEnvelope::Signal)
//! frames instead.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::protocol::SignalEnvelope;
use crate::error::{Error, Result};

/// Delivers signals to a named peer
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Send `envelope` to the peer `to`
    async fn send_to_peer(&self, to: &str, envelope: SignalEnvelope) -> Result<()>;
}

type Mailboxes = HashMap<String, mpsc::UnboundedSender<SignalEnvelope>>;

/// In-process signaling server
///
/// Each registered peer gets a mailbox; any registered handle can drop a
/// signal into any other peer's mailbox by id.
#[derive(Clone, Default)]
pub struct MemorySignalingHub {
    mailboxes: Arc<Mutex<Mailboxes>>,
}

impl MemorySignalingHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer_id`, returning its handle and inbox
    ///
    /// Registering the same id twice replaces the earlier inbox.
    pub fn register(
        &self,
        peer_id: impl Into<String>,
    ) -> (MemorySignaling, mpsc::UnboundedReceiver<SignalEnvelope>) {
        let peer_id = peer_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes.lock().insert(peer_id.clone(), tx);

        tracing::debug!(peer_id = %peer_id, "Registered with signaling hub");
        (
            MemorySignaling {
                hub: self.clone(),
                peer_id,
            },
            rx,
        )
    }

    /// Remove `peer_id`; later signals to it fail with `PeerNotFound`
    pub fn unregister(&self, peer_id: &str) {
        self.mailboxes.lock().remove(peer_id);
    }

    /// Whether `peer_id` has a live mailbox
    pub fn is_registered(&self, peer_id: &str) -> bool {
        self.mailboxes
            .lock()
            .get(peer_id)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }
}

/// One peer's handle on a [`MemorySignalingHub`]
#[derive(Clone)]
pub struct MemorySignaling {
    hub: MemorySignalingHub,
    peer_id: String,
}

impl MemorySignaling {
    /// Id this handle was registered under
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }
}

#[async_trait]
impl SignalingChannel for MemorySignaling {
    async fn send_to_peer(&self, to: &str, envelope: SignalEnvelope) -> Result<()> {
        let tx = self
            .hub
            .mailboxes
            .lock()
            .get(to)
            .cloned()
            .ok_or_else(|| Error::PeerNotFound(to.to_string()))?;

        tracing::trace!(from = %self.peer_id, to, kind = envelope.signal.kind(), "Signal");
        tx.send(envelope)
            .map_err(|_| Error::PeerNotFound(to.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::{SessionDescription, Signal};

    fn offer_from(from: &str) -> SignalEnvelope {
        SignalEnvelope {
            from: from.to_string(),
            signal: Signal::Offer {
                offer: SessionDescription::offer("memory:1"),
            },
        }
    }

    #[tokio::test]
    async fn test_delivers_to_registered_peer() {
        let hub = MemorySignalingHub::new();
        let (alice, _alice_rx) = hub.register("alice");
        let (_bob, mut bob_rx) = hub.register("bob");

        alice.send_to_peer("bob", offer_from("alice")).await.unwrap();

        let received = bob_rx.recv().await.unwrap();
        assert_eq!(received.from, "alice");
        assert_eq!(received.signal.kind(), "offer");
    }

    #[tokio::test]
    async fn test_unknown_peer() {
        let hub = MemorySignalingHub::new();
        let (alice, _rx) = hub.register("alice");

        let result = alice.send_to_peer("nobody", offer_from("alice")).await;
        assert!(matches!(result, Err(Error::PeerNotFound(id)) if id == "nobody"));
    }

    #[tokio::test]
    async fn test_dropped_inbox_counts_as_gone() {
        let hub = MemorySignalingHub::new();
        let (alice, _rx) = hub.register("alice");
        let (_bob, bob_rx) = hub.register("bob");
        drop(bob_rx);

        assert!(!hub.is_registered("bob"));
        assert!(alice.send_to_peer("bob", offer_from("alice")).await.is_err());

        hub.unregister("alice");
        assert!(!hub.is_registered("alice"));
    }
}
