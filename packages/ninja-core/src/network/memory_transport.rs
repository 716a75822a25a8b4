//! # In-Memory Transport
//!
//! A loopback [`Transport`] that connects endpoints living in the same
//! process. It follows the same offer/answer choreography as a real peer
//! connection, so the session logic above it runs unchanged:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        MEMORY NETWORK                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Endpoint #1 (alice → bob)             Endpoint #2 (bob → alice)       │
//! │  ─────────────────────────             ─────────────────────────       │
//! │  create_offer()  ── "memory:1" ──────► set_remote_description()        │
//! │                                        create_answer()                  │
//! │  set_remote_description() ◄── "memory:2"                               │
//! │        │                                                                │
//! │        └──► paired: DataChannelOpen + Connected on both sinks          │
//! │                                                                         │
//! │  send(bytes) ─────────────── DataChannelMessage ──────────────►        │
//! │  close()     ─────────────── DataChannelClosed + Closed ──────►        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every endpoint gathers one synthetic host candidate after setting its
//! local description. Remote candidates are validated but otherwise have no
//! effect on pairing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::events::LinkEventSink;
use super::protocol::{IceCandidate, SdpType, SessionDescription};
use super::transport::{
    LinkConfig, MediaStream, Transport, TransportEvent, TransportLink, TransportState,
};
use crate::error::{Error, Result};

const SDP_PREFIX: &str = "memory:";

struct Endpoint {
    local_id: String,
    remote_id: String,
    sink: LinkEventSink,
    local_description: Option<SdpType>,
    remote_endpoint: Option<u64>,
    data_channel: bool,
    paired: bool,
    local_streams: Vec<MediaStream>,
}

#[derive(Default)]
struct NetworkState {
    endpoints: HashMap<u64, Endpoint>,
    next_id: u64,
}

/// A process-local switchboard connecting [`MemoryTransport`]s
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport for the participant `local_id`
    pub fn transport(&self, local_id: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            local_id: local_id.into(),
        }
    }

    /// Number of paired, open endpoints (two per live connection)
    pub fn open_endpoints(&self) -> usize {
        self.state
            .lock()
            .endpoints
            .values()
            .filter(|e| e.paired)
            .count()
    }

    /// Number of endpoints not yet closed
    pub fn live_endpoints(&self) -> usize {
        self.state.lock().endpoints.len()
    }

    /// Simulate a network failure between two participants
    ///
    /// Both sides see their connection state go to `Failed`.
    pub fn fail_connection(&self, a: &str, b: &str) {
        let sinks: Vec<LinkEventSink> = {
            let state = self.state.lock();
            state
                .endpoints
                .values()
                .filter(|e| {
                    (e.local_id == a && e.remote_id == b) || (e.local_id == b && e.remote_id == a)
                })
                .map(|e| e.sink.clone())
                .collect()
        };

        tracing::debug!(a, b, endpoints = sinks.len(), "Simulating connection failure");
        for sink in sinks {
            sink.transport(TransportEvent::ConnectionState(TransportState::Failed));
        }
    }
}

/// One participant's view of a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    local_id: String,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn create_link(
        &self,
        peer_id: &str,
        _config: &LinkConfig,
        sink: LinkEventSink,
    ) -> Result<Box<dyn TransportLink>> {
        let mut state = self.network.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.endpoints.insert(
            id,
            Endpoint {
                local_id: self.local_id.clone(),
                remote_id: peer_id.to_string(),
                sink,
                local_description: None,
                remote_endpoint: None,
                data_channel: false,
                paired: false,
                local_streams: Vec::new(),
            },
        );

        Ok(Box::new(MemoryLink {
            network: self.network.clone(),
            id,
        }))
    }
}

struct MemoryLink {
    network: MemoryNetwork,
    id: u64,
}

impl MemoryLink {
    fn describe(&self, sdp_type: SdpType) -> Result<SessionDescription> {
        let sink = {
            let mut state = self.network.state.lock();
            let endpoint = live_endpoint(&mut state, self.id)?;

            match sdp_type {
                SdpType::Offer if endpoint.local_description.is_some() => {
                    return Err(Error::SignalingError("offer already created".into()));
                }
                SdpType::Answer if endpoint.remote_endpoint.is_none() => {
                    return Err(Error::SignalingError("no remote offer to answer".into()));
                }
                _ => {}
            }

            endpoint.local_description = Some(sdp_type);
            endpoint.sink.clone()
        };

        sink.transport(TransportEvent::IceCandidate(host_candidate(self.id)));

        let sdp = format!("{}{}", SDP_PREFIX, self.id);
        Ok(match sdp_type {
            SdpType::Offer => SessionDescription::offer(sdp),
            SdpType::Answer => SessionDescription::answer(sdp),
        })
    }

    /// Wire both endpoints together and raise the open callbacks
    fn pair(state: &mut NetworkState, a: u64, b: u64) -> Vec<(LinkEventSink, TransportEvent)> {
        let mut events = Vec::new();
        let channel = state.endpoints.get(&a).map(|e| e.data_channel).unwrap_or(false)
            || state.endpoints.get(&b).map(|e| e.data_channel).unwrap_or(false);

        for (this, other) in [(a, b), (b, a)] {
            let remote_streams = state
                .endpoints
                .get(&other)
                .map(|e| e.local_streams.clone())
                .unwrap_or_default();

            if let Some(endpoint) = state.endpoints.get_mut(&this) {
                endpoint.paired = true;
                endpoint.remote_endpoint = Some(other);
                let sink = endpoint.sink.clone();

                events.push((sink.clone(), TransportEvent::ConnectionState(TransportState::Connected)));
                if channel {
                    events.push((sink.clone(), TransportEvent::DataChannelOpen));
                }
                for stream in remote_streams {
                    events.push((sink.clone(), TransportEvent::RemoteStream(stream)));
                }
            }
        }

        events
    }

    /// Sink of the paired remote endpoint, if it is still alive
    fn remote_sink(state: &NetworkState, id: u64) -> Option<LinkEventSink> {
        let endpoint = state.endpoints.get(&id)?;
        if !endpoint.paired {
            return None;
        }
        let remote = state.endpoints.get(&endpoint.remote_endpoint?)?;
        Some(remote.sink.clone())
    }
}

#[async_trait]
impl TransportLink for MemoryLink {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.describe(SdpType::Offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.describe(SdpType::Answer)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let remote_id = parse_endpoint(&description.sdp)?;

        let events = {
            let mut state = self.network.state.lock();

            let remote = state
                .endpoints
                .get(&remote_id)
                .ok_or_else(|| Error::SignalingError(format!("unknown endpoint {}", remote_id)))?;
            let remote_answered_us =
                remote.local_description == Some(SdpType::Answer) && remote.remote_endpoint == Some(self.id);

            let endpoint = live_endpoint(&mut state, self.id)?;
            match description.sdp_type {
                SdpType::Offer => {
                    endpoint.remote_endpoint = Some(remote_id);
                    Vec::new()
                }
                SdpType::Answer => {
                    if endpoint.local_description != Some(SdpType::Offer) {
                        return Err(Error::SignalingError("answer without a local offer".into()));
                    }
                    if !remote_answered_us {
                        return Err(Error::SignalingError("answer does not match our offer".into()));
                    }
                    Self::pair(&mut state, self.id, remote_id)
                }
            }
        };

        for (sink, event) in events {
            sink.transport(event);
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.network.state.lock();
        live_endpoint(&mut state, self.id)?;

        if !candidate.candidate.starts_with("candidate:") {
            return Err(Error::SignalingError(format!(
                "malformed ICE candidate: {:?}",
                candidate.candidate
            )));
        }
        Ok(())
    }

    async fn create_data_channel(&self, _label: &str, _ordered: bool) -> Result<()> {
        let mut state = self.network.state.lock();
        live_endpoint(&mut state, self.id)?.data_channel = true;
        Ok(())
    }

    async fn send(&self, data: Bytes) -> Result<()> {
        let sink = {
            let mut state = self.network.state.lock();
            live_endpoint(&mut state, self.id)?;
            Self::remote_sink(&state, self.id)
                .ok_or_else(|| Error::TransportFailure("data channel is not open".into()))?
        };

        sink.transport(TransportEvent::DataChannelMessage(data));
        Ok(())
    }

    async fn add_local_stream(&self, stream: &MediaStream) -> Result<()> {
        let sink = {
            let mut state = self.network.state.lock();
            live_endpoint(&mut state, self.id)?.local_streams.push(stream.clone());
            Self::remote_sink(&state, self.id)
        };

        if let Some(sink) = sink {
            sink.transport(TransportEvent::RemoteStream(stream.clone()));
        }
        Ok(())
    }

    async fn remove_local_stream(&self, stream_id: &str) -> Result<()> {
        let mut state = self.network.state.lock();
        live_endpoint(&mut state, self.id)?
            .local_streams
            .retain(|s| s.id != stream_id);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let sink = {
            let mut state = self.network.state.lock();
            let remote = Self::remote_sink(&state, self.id);
            state.endpoints.remove(&self.id).and_then(|_| remote)
        };

        if let Some(sink) = sink {
            sink.transport(TransportEvent::DataChannelClosed);
            sink.transport(TransportEvent::ConnectionState(TransportState::Closed));
        }
        Ok(())
    }
}

fn live_endpoint(state: &mut NetworkState, id: u64) -> Result<&mut Endpoint> {
    state
        .endpoints
        .get_mut(&id)
        .ok_or_else(|| Error::TransportFailure("link is closed".into()))
}

fn parse_endpoint(sdp: &str) -> Result<u64> {
    sdp.strip_prefix(SDP_PREFIX)
        .and_then(|id| id.trim().parse().ok())
        .ok_or_else(|| Error::SignalingError(format!("unrecognized session description: {:?}", sdp)))
}

fn host_candidate(id: u64) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{} 1 udp 2130706431 127.0.0.1 {} typ host", id, 40000 + id),
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: Some(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::events::{LinkEvent, LinkPayload};
    use tokio::sync::mpsc;

    fn sink(peer: &str) -> (LinkEventSink, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (LinkEventSink::new(peer, 1, tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let LinkPayload::Transport(t) = event.payload {
                out.push(t);
            }
        }
        out
    }

    async fn paired(net: &MemoryNetwork) -> (
        Box<dyn TransportLink>,
        mpsc::UnboundedReceiver<LinkEvent>,
        Box<dyn TransportLink>,
        mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        let config = LinkConfig::default();
        let (sink_a, rx_a) = sink("bob");
        let (sink_b, rx_b) = sink("alice");
        let a = net.transport("alice").create_link("bob", &config, sink_a).await.unwrap();
        let b = net.transport("bob").create_link("alice", &config, sink_b).await.unwrap();

        a.create_data_channel("chat", true).await.unwrap();
        let offer = a.create_offer().await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        a.set_remote_description(answer).await.unwrap();

        (a, rx_a, b, rx_b)
    }

    #[tokio::test]
    async fn test_offer_answer_pairs_endpoints() {
        let net = MemoryNetwork::new();
        let (_a, mut rx_a, _b, mut rx_b) = paired(&net).await;

        let a_events = drain(&mut rx_a);
        let b_events = drain(&mut rx_b);

        assert!(a_events.iter().any(|e| matches!(e, TransportEvent::IceCandidate(_))));
        assert!(a_events.iter().any(|e| matches!(e, TransportEvent::DataChannelOpen)));
        assert!(b_events.iter().any(|e| matches!(e, TransportEvent::DataChannelOpen)));
        assert_eq!(net.open_endpoints(), 2);
    }

    #[tokio::test]
    async fn test_send_delivers_to_remote() {
        let net = MemoryNetwork::new();
        let (a, _rx_a, _b, mut rx_b) = paired(&net).await;
        drain(&mut rx_b);

        a.send(Bytes::from_static(b"hello")).await.unwrap();

        let events = drain(&mut rx_b);
        assert!(matches!(
            events.as_slice(),
            [TransportEvent::DataChannelMessage(data)] if &data[..] == b"hello"
        ));
    }

    #[tokio::test]
    async fn test_send_before_pairing_fails() {
        let net = MemoryNetwork::new();
        let (sink_a, _rx) = sink("bob");
        let a = net
            .transport("alice")
            .create_link("bob", &LinkConfig::default(), sink_a)
            .await
            .unwrap();

        assert!(matches!(
            a.send(Bytes::from_static(b"x")).await,
            Err(Error::TransportFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_close_notifies_remote() {
        let net = MemoryNetwork::new();
        let (a, _rx_a, _b, mut rx_b) = paired(&net).await;
        drain(&mut rx_b);

        a.close().await.unwrap();
        a.close().await.unwrap();

        let events = drain(&mut rx_b);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], TransportEvent::DataChannelClosed));
        assert_eq!(net.open_endpoints(), 1);
    }

    #[tokio::test]
    async fn test_closed_endpoints_are_released() {
        let net = MemoryNetwork::new();
        let (a, _rx_a, b, mut rx_b) = paired(&net).await;
        let (sink_c, _rx_c) = sink("dave");
        let c = net
            .transport("carol")
            .create_link("dave", &LinkConfig::default(), sink_c)
            .await
            .unwrap();
        assert_eq!(net.live_endpoints(), 3);

        a.close().await.unwrap();
        assert_eq!(net.live_endpoints(), 2);
        drain(&mut rx_b);

        b.close().await.unwrap();
        c.close().await.unwrap();
        assert_eq!(net.live_endpoints(), 0);

        // Closing the second side notifies nobody
        assert!(drain(&mut rx_b).is_empty());
        assert!(matches!(
            b.send(Bytes::from_static(b"x")).await,
            Err(Error::TransportFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_inputs_rejected() {
        let net = MemoryNetwork::new();
        let (sink_a, _rx) = sink("bob");
        let a = net
            .transport("alice")
            .create_link("bob", &LinkConfig::default(), sink_a)
            .await
            .unwrap();

        let bad_sdp = a.set_remote_description(SessionDescription::offer("v=0 garbage")).await;
        assert!(matches!(bad_sdp, Err(Error::SignalingError(_))));

        let bad_candidate = a
            .add_ice_candidate(IceCandidate {
                candidate: "garbage".into(),
                sdp_mid: None,
                sdp_m_line_index: None,
            })
            .await;
        assert!(matches!(bad_candidate, Err(Error::SignalingError(_))));
    }

    #[tokio::test]
    async fn test_streams_cross_on_pairing_and_after() {
        let net = MemoryNetwork::new();
        let config = LinkConfig::default();
        let (sink_a, mut rx_a) = sink("bob");
        let (sink_b, mut rx_b) = sink("alice");
        let a = net.transport("alice").create_link("bob", &config, sink_a).await.unwrap();
        let b = net.transport("bob").create_link("alice", &config, sink_b).await.unwrap();

        let early = MediaStream::camera_and_microphone();
        a.add_local_stream(&early).await.unwrap();

        a.create_data_channel("chat", true).await.unwrap();
        b.set_remote_description(a.create_offer().await.unwrap()).await.unwrap();
        a.set_remote_description(b.create_answer().await.unwrap()).await.unwrap();

        let b_events = drain(&mut rx_b);
        assert!(b_events
            .iter()
            .any(|e| matches!(e, TransportEvent::RemoteStream(s) if s.id == early.id)));

        drain(&mut rx_a);
        let late = MediaStream::camera_and_microphone();
        b.add_local_stream(&late).await.unwrap();
        let a_events = drain(&mut rx_a);
        assert!(a_events
            .iter()
            .any(|e| matches!(e, TransportEvent::RemoteStream(s) if s.id == late.id)));
    }

    #[tokio::test]
    async fn test_fail_connection_reaches_both_sides() {
        let net = MemoryNetwork::new();
        let (_a, mut rx_a, _b, mut rx_b) = paired(&net).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        net.fail_connection("alice", "bob");

        for events in [drain(&mut rx_a), drain(&mut rx_b)] {
            assert!(matches!(
                events.as_slice(),
                [TransportEvent::ConnectionState(TransportState::Failed)]
            ));
        }
    }
}
