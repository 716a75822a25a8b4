//! # Peer Link
//!
//! One direct connection to one remote participant: the signaling
//! handshake state machine plus chat framing over the data channel.
//!
//! ## Connection State Machine
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      PEER LINK STATES                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Initiator:                                                            │
//! │  Idle ──create_offer──► OfferCreated ──► AwaitingAnswer                │
//! │                                               │ handle_answer           │
//! │                                               ▼                         │
//! │                                          Connecting ──channel open──► Open
//! │                                                                         │
//! │  Responder:                                                            │
//! │  Idle ──handle_offer──► OfferReceived ──► AnswerCreated                │
//! │                                               │ ICE / transport         │
//! │                                               ▼                         │
//! │                                          Connecting ──channel open──► Open
//! │                                                                         │
//! │  Any state ──close / transport failure / signaling error──► Closed     │
//! │  Closed is terminal. Reconnecting needs a new PeerLink.                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A `PeerLink` never calls back into its owner. Everything it has to say
//! goes out as a [`PeerEvent`] through its [`LinkEventSink`].

use std::fmt;

use bytes::Bytes;

use super::events::{LinkEventSink, PeerEvent};
use super::protocol::{ChatEnvelope, IceCandidate, SdpType, SessionDescription, Signal};
use super::transport::{LinkConfig, MediaStream, Transport, TransportEvent, TransportLink};
use crate::error::{Error, Result};

/// Which side of the handshake this link plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the offer and the data channel
    Initiator,
    /// Answers an incoming offer
    Responder,
}

/// State of a peer link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, no handshake yet
    #[default]
    Idle,
    /// Local offer produced
    OfferCreated,
    /// Offer sent, waiting for the answer
    AwaitingAnswer,
    /// Remote offer applied
    OfferReceived,
    /// Local answer produced
    AnswerCreated,
    /// ICE exchange in progress
    Connecting,
    /// Data channel ready
    Open,
    /// Torn down
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::OfferCreated => "offer-created",
            Self::AwaitingAnswer => "awaiting-answer",
            Self::OfferReceived => "offer-received",
            Self::AnswerCreated => "answer-created",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A negotiated channel to exactly one remote peer
pub struct PeerLink {
    peer_id: String,
    role: Role,
    state: ConnectionState,
    channel_ready: bool,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    transport: Box<dyn TransportLink>,
    events: LinkEventSink,
}

impl PeerLink {
    /// Create the transport link for `peer_id` and wrap it
    ///
    /// Initiators open the chat data channel here so it is part of the offer.
    pub async fn connect(
        transport: &dyn Transport,
        peer_id: &str,
        role: Role,
        config: &LinkConfig,
        events: LinkEventSink,
    ) -> Result<Self> {
        let link = transport
            .create_link(peer_id, config, events.clone())
            .await
            .map_err(transport_failure)?;

        if role == Role::Initiator {
            if let Err(e) = link
                .create_data_channel(&config.data_channel_label, config.ordered)
                .await
            {
                let _ = link.close().await;
                return Err(transport_failure(e));
            }
        }

        Ok(Self::new(peer_id, role, link, events))
    }

    /// Wrap an existing transport link
    pub fn new(
        peer_id: impl Into<String>,
        role: Role,
        transport: Box<dyn TransportLink>,
        events: LinkEventSink,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            role,
            state: ConnectionState::Idle,
            channel_ready: false,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            transport,
            events,
        }
    }

    /// Remote peer id
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Handshake role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether chat frames can be sent
    pub fn is_channel_ready(&self) -> bool {
        self.channel_ready
    }

    /// Generation stamped on this link's events
    pub fn link_id(&self) -> u64 {
        self.events.link_id()
    }

    // ========================================================================
    // HANDSHAKE
    // ========================================================================

    /// Produce the offer (Initiator, `Idle` only)
    pub async fn create_offer(&mut self) -> Result<SessionDescription> {
        if self.role != Role::Initiator || self.state != ConnectionState::Idle {
            return Err(self.invalid("create offer"));
        }

        match self.transport.create_offer().await {
            Ok(offer) => {
                self.transition(ConnectionState::OfferCreated);
                self.transition(ConnectionState::AwaitingAnswer);
                Ok(offer)
            }
            Err(e) => Err(self.abandon("create offer", e).await),
        }
    }

    /// Apply the remote offer and produce the answer (Responder, first contact only)
    pub async fn handle_offer(&mut self, offer: SessionDescription) -> Result<SessionDescription> {
        if self.role != Role::Responder || self.state != ConnectionState::Idle {
            return Err(self.invalid("handle offer"));
        }
        if offer.sdp_type != SdpType::Offer {
            let err = Error::SignalingError("expected an offer".into());
            return Err(self.abandon("apply offer", err).await);
        }

        if let Err(e) = self.transport.set_remote_description(offer).await {
            return Err(self.abandon("apply offer", e).await);
        }
        self.remote_description_set = true;
        self.transition(ConnectionState::OfferReceived);

        let answer = match self.transport.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return Err(self.abandon("create answer", e).await),
        };
        self.transition(ConnectionState::AnswerCreated);
        self.flush_pending_candidates().await;

        Ok(answer)
    }

    /// Apply the remote answer (only after `create_offer`)
    pub async fn handle_answer(&mut self, answer: SessionDescription) -> Result<()> {
        if self.state != ConnectionState::AwaitingAnswer {
            return Err(self.invalid("handle answer"));
        }
        if answer.sdp_type != SdpType::Answer {
            let err = Error::SignalingError("expected an answer".into());
            return Err(self.abandon("apply answer", err).await);
        }

        if let Err(e) = self.transport.set_remote_description(answer).await {
            return Err(self.abandon("apply answer", e).await);
        }
        self.remote_description_set = true;
        self.transition(ConnectionState::Connecting);
        self.flush_pending_candidates().await;

        Ok(())
    }

    /// Add a remote ICE candidate
    ///
    /// Candidates arriving before the remote description are held until it
    /// is applied. A rejected candidate is logged and ignored; it never
    /// tears the link down.
    pub async fn handle_ice_candidate(&mut self, candidate: IceCandidate) {
        match self.state {
            ConnectionState::Closed => {
                tracing::trace!(peer_id = %self.peer_id, "ICE candidate for closed link ignored");
                return;
            }
            ConnectionState::Idle => {
                tracing::debug!(peer_id = %self.peer_id, "ICE candidate before handshake ignored");
                return;
            }
            _ => {}
        }

        if !self.remote_description_set {
            self.pending_candidates.push(candidate);
            return;
        }
        self.apply_candidate(candidate).await;
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) {
        match self.transport.add_ice_candidate(candidate).await {
            Ok(()) => {
                if self.state == ConnectionState::AnswerCreated {
                    self.transition(ConnectionState::Connecting);
                }
            }
            Err(e) => {
                tracing::warn!(peer_id = %self.peer_id, error = %e, "Ignoring ICE candidate");
            }
        }
    }

    async fn flush_pending_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            self.apply_candidate(candidate).await;
        }
    }

    // ========================================================================
    // TRANSPORT CALLBACKS
    // ========================================================================

    /// Feed a transport callback through the state machine
    pub async fn on_transport_event(&mut self, event: TransportEvent) {
        if self.state == ConnectionState::Closed {
            tracing::trace!(peer_id = %self.peer_id, ?event, "Event for closed link ignored");
            return;
        }

        match event {
            TransportEvent::IceCandidate(candidate) => {
                self.events.peer(PeerEvent::SignalToSend(Signal::IceCandidate { candidate }));
            }
            TransportEvent::DataChannelOpen => {
                self.channel_ready = true;
                self.transition(ConnectionState::Open);
                tracing::info!(peer_id = %self.peer_id, "Data channel open");
                self.events.peer(PeerEvent::ChannelOpen);
            }
            TransportEvent::DataChannelClosed => {
                tracing::info!(peer_id = %self.peer_id, "Data channel closed");
                self.close().await;
            }
            TransportEvent::DataChannelMessage(data) => match ChatEnvelope::from_bytes(&data) {
                Ok(envelope) => self.events.peer(PeerEvent::MessageReceived(envelope)),
                Err(e) => {
                    tracing::warn!(peer_id = %self.peer_id, error = %e, "Dropping undecodable frame");
                }
            },
            TransportEvent::RemoteStream(stream) => {
                tracing::debug!(peer_id = %self.peer_id, stream_id = %stream.id, "Remote stream");
                self.events.peer(PeerEvent::RemoteStream(stream));
            }
            TransportEvent::ConnectionState(state) => {
                if state.is_terminal() {
                    tracing::info!(peer_id = %self.peer_id, ?state, "Connection lost");
                    self.close().await;
                } else if self.state == ConnectionState::AnswerCreated {
                    self.transition(ConnectionState::Connecting);
                }
            }
        }
    }

    // ========================================================================
    // TRAFFIC
    // ========================================================================

    /// Send a frame if the channel is ready
    ///
    /// Best effort: returns `false` without error when the channel is not
    /// ready or the send fails.
    pub async fn send_message(&self, envelope: &ChatEnvelope) -> bool {
        if !self.channel_ready {
            tracing::trace!(peer_id = %self.peer_id, state = %self.state, "Channel not ready, frame dropped");
            return false;
        }

        let frame = match envelope.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(peer_id = %self.peer_id, error = %e, "Failed to encode frame");
                return false;
            }
        };

        match self.transport.send(Bytes::from(frame)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(peer_id = %self.peer_id, error = %e, "Send failed");
                false
            }
        }
    }

    /// Attach local media
    pub async fn add_local_stream(&self, stream: &MediaStream) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if let Err(e) = self.transport.add_local_stream(stream).await {
            tracing::warn!(peer_id = %self.peer_id, error = %e, "Failed to attach local stream");
        }
    }

    /// Detach local media
    pub async fn remove_local_stream(&self, stream_id: &str) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if let Err(e) = self.transport.remove_local_stream(stream_id).await {
            tracing::warn!(peer_id = %self.peer_id, error = %e, "Failed to detach local stream");
        }
    }

    /// Tear down the link
    ///
    /// Emits exactly one [`PeerEvent::Closed`]; later calls do nothing.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }

        self.transition(ConnectionState::Closed);
        self.channel_ready = false;
        self.pending_candidates.clear();

        if let Err(e) = self.transport.close().await {
            tracing::debug!(peer_id = %self.peer_id, error = %e, "Transport close failed");
        }
        self.events.peer(PeerEvent::Closed);
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn transition(&mut self, next: ConnectionState) {
        tracing::trace!(peer_id = %self.peer_id, from = %self.state, to = %next, "Link state");
        self.state = next;
    }

    fn invalid(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state,
        }
    }

    /// Give up on the handshake: close the link and report a signaling error
    async fn abandon(&mut self, step: &'static str, err: Error) -> Error {
        tracing::warn!(peer_id = %self.peer_id, step, error = %err, "Handshake step failed, closing link");
        self.close().await;

        match err {
            Error::SignalingError(_) => err,
            other => Error::SignalingError(format!("{}: {}", step, other)),
        }
    }
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink")
            .field("peer_id", &self.peer_id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("channel_ready", &self.channel_ready)
            .finish()
    }
}

fn transport_failure(err: Error) -> Error {
    match err {
        Error::TransportFailure(_) => err,
        other => Error::TransportFailure(other.to_string()),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::events::{LinkEvent, LinkPayload};
    use crate::network::MemoryNetwork;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    /// Run transport callbacks through the link, return the peer events
    async fn pump(link: &mut PeerLink, rx: &mut UnboundedReceiver<LinkEvent>) -> Vec<PeerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event.payload {
                LinkPayload::Transport(t) => link.on_transport_event(t).await,
                LinkPayload::Peer(p) => out.push(p),
            }
        }
        out
    }

    async fn link(
        net: &MemoryNetwork,
        local: &str,
        remote: &str,
        role: Role,
    ) -> (PeerLink, UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = LinkEventSink::new(remote, 1, tx);
        let link = PeerLink::connect(&net.transport(local), remote, role, &LinkConfig::default(), sink)
            .await
            .unwrap();
        (link, rx)
    }

    async fn open_pair(
        net: &MemoryNetwork,
    ) -> (PeerLink, UnboundedReceiver<LinkEvent>, PeerLink, UnboundedReceiver<LinkEvent>) {
        let (mut a, mut rx_a) = link(net, "alice", "bob", Role::Initiator).await;
        let (mut b, mut rx_b) = link(net, "bob", "alice", Role::Responder).await;

        let offer = a.create_offer().await.unwrap();
        let answer = b.handle_offer(offer).await.unwrap();
        a.handle_answer(answer).await.unwrap();

        pump(&mut a, &mut rx_a).await;
        pump(&mut b, &mut rx_b).await;
        (a, rx_a, b, rx_b)
    }

    fn closed_count(events: &[PeerEvent]) -> usize {
        events.iter().filter(|e| matches!(e, PeerEvent::Closed)).count()
    }

    #[tokio::test]
    async fn test_initiator_and_responder_reach_open() {
        let net = MemoryNetwork::new();
        let (mut a, mut rx_a) = link(&net, "alice", "bob", Role::Initiator).await;
        let (mut b, mut rx_b) = link(&net, "bob", "alice", Role::Responder).await;

        let offer = a.create_offer().await.unwrap();
        assert_eq!(a.state(), ConnectionState::AwaitingAnswer);

        let answer = b.handle_offer(offer).await.unwrap();
        assert_eq!(b.state(), ConnectionState::AnswerCreated);

        a.handle_answer(answer).await.unwrap();
        assert_eq!(a.state(), ConnectionState::Connecting);

        let a_events = pump(&mut a, &mut rx_a).await;
        let b_events = pump(&mut b, &mut rx_b).await;

        assert_eq!(a.state(), ConnectionState::Open);
        assert_eq!(b.state(), ConnectionState::Open);
        assert!(a.is_channel_ready() && b.is_channel_ready());
        assert!(a_events.iter().any(|e| matches!(e, PeerEvent::ChannelOpen)));
        assert!(a_events
            .iter()
            .any(|e| matches!(e, PeerEvent::SignalToSend(Signal::IceCandidate { .. }))));
        assert!(b_events.iter().any(|e| matches!(e, PeerEvent::ChannelOpen)));
    }

    #[tokio::test]
    async fn test_handle_answer_without_offer_is_rejected() {
        let net = MemoryNetwork::new();
        let (mut a, _rx) = link(&net, "alice", "bob", Role::Initiator).await;

        let result = a.handle_answer(SessionDescription::answer("memory:99")).await;

        assert!(matches!(
            result,
            Err(Error::InvalidState { state: ConnectionState::Idle, .. })
        ));
        assert_eq!(a.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_role_guards() {
        let net = MemoryNetwork::new();
        let (mut responder, _rx1) = link(&net, "bob", "alice", Role::Responder).await;
        let (mut initiator, _rx2) = link(&net, "alice", "bob", Role::Initiator).await;

        assert!(matches!(responder.create_offer().await, Err(Error::InvalidState { .. })));
        assert!(matches!(
            initiator.handle_offer(SessionDescription::offer("memory:1")).await,
            Err(Error::InvalidState { .. })
        ));
        assert_eq!(responder.state(), ConnectionState::Idle);
        assert_eq!(initiator.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_send_before_open_is_noop() {
        let net = MemoryNetwork::new();
        let (a, _rx) = link(&net, "alice", "bob", Role::Initiator).await;

        let sent = a
            .send_message(&ChatEnvelope::Chat {
                encrypted: "x".into(),
                from: "alice".into(),
            })
            .await;

        assert!(!sent);
        assert_eq!(a.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_frames_arrive_as_envelopes() {
        let net = MemoryNetwork::new();
        let (a, _rx_a, mut b, mut rx_b) = open_pair(&net).await;

        let envelope = ChatEnvelope::Chat {
            encrypted: "Zm9v".into(),
            from: "alice".into(),
        };
        assert!(a.send_message(&envelope).await);

        let events = pump(&mut b, &mut rx_b).await;
        assert!(matches!(
            events.as_slice(),
            [PeerEvent::MessageReceived(received)] if *received == envelope
        ));
    }

    #[tokio::test]
    async fn test_close_twice_notifies_once() {
        let net = MemoryNetwork::new();
        let (mut a, mut rx_a, _b, _rx_b) = open_pair(&net).await;

        a.close().await;
        a.close().await;

        let events = pump(&mut a, &mut rx_a).await;
        assert_eq!(closed_count(&events), 1);
        assert_eq!(a.state(), ConnectionState::Closed);
        assert!(!a.is_channel_ready());
    }

    #[tokio::test]
    async fn test_remote_close_closes_local_once() {
        let net = MemoryNetwork::new();
        let (mut a, _rx_a, mut b, mut rx_b) = open_pair(&net).await;

        a.close().await;

        // DataChannelClosed and ConnectionState(Closed) both arrive
        let events = pump(&mut b, &mut rx_b).await;
        assert_eq!(closed_count(&events), 1);
        assert_eq!(b.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_transport_failure_closes_link() {
        let net = MemoryNetwork::new();
        let (mut a, mut rx_a, _b, _rx_b) = open_pair(&net).await;

        net.fail_connection("alice", "bob");

        let events = pump(&mut a, &mut rx_a).await;
        assert_eq!(closed_count(&events), 1);
        assert_eq!(a.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_malformed_candidate_is_swallowed() {
        let net = MemoryNetwork::new();
        let (mut a, mut rx_a, _b, _rx_b) = open_pair(&net).await;

        a.handle_ice_candidate(IceCandidate {
            candidate: "not a candidate".into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        })
        .await;

        assert_eq!(a.state(), ConnectionState::Open);
        assert_eq!(closed_count(&pump(&mut a, &mut rx_a).await), 0);
    }

    #[tokio::test]
    async fn test_early_candidates_are_queued() {
        let net = MemoryNetwork::new();
        let (mut a, _rx_a) = link(&net, "alice", "bob", Role::Initiator).await;
        let (mut b, _rx_b) = link(&net, "bob", "alice", Role::Responder).await;

        let offer = a.create_offer().await.unwrap();
        let early = IceCandidate {
            candidate: "candidate:1 1 udp 1 127.0.0.1 9 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        };

        // Initiator has no remote description yet
        a.handle_ice_candidate(early).await;
        assert_eq!(a.pending_candidates.len(), 1);

        let answer = b.handle_offer(offer).await.unwrap();
        a.handle_answer(answer).await.unwrap();
        assert!(a.pending_candidates.is_empty());
        assert_eq!(a.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_bad_offer_closes_responder() {
        let net = MemoryNetwork::new();
        let (mut b, mut rx_b) = link(&net, "bob", "alice", Role::Responder).await;

        let result = b.handle_offer(SessionDescription::offer("garbage")).await;

        assert!(matches!(result, Err(Error::SignalingError(_))));
        assert_eq!(b.state(), ConnectionState::Closed);
        assert_eq!(closed_count(&pump(&mut b, &mut rx_b).await), 1);
    }
}
