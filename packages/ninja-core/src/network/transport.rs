//! # Transport Abstraction
//!
//! The narrow contract between a `PeerLink` and whatever actually moves
//! bytes and media between two endpoints.
//!
//! ## Contract
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         TRANSPORT CONTRACT                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Transport::create_link(peer, config, sink) ──► Box<dyn TransportLink> │
//! │                                                                         │
//! │  TransportLink (calls)               LinkEventSink (callbacks)         │
//! │  ─────────────────────               ─────────────────────────         │
//! │  create_offer / create_answer        IceCandidate      (onicecandidate)│
//! │  set_remote_description              RemoteStream      (ontrack)       │
//! │  add_ice_candidate                   ConnectionState   (onstatechange) │
//! │  create_data_channel                 DataChannelOpen/Closed            │
//! │  send                                DataChannelMessage (onmessage)    │
//! │  add/remove_local_stream                                               │
//! │  close                                                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Backends:
//! - [`MemoryTransport`](super::MemoryTransport): in-process loopback
//! - `WebRtcTransport` (feature `webrtc`): the `webrtc` crate

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::events::LinkEventSink;
use super::protocol::{IceCandidate, SessionDescription};
use crate::error::Result;

/// Public STUN servers used when no configuration is provided
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// A STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs
    pub urls: Vec<String>,
    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// A server without credentials
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Per-link transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// ICE servers for reachability discovery
    pub ice_servers: Vec<IceServer>,
    /// Label of the chat data channel
    pub data_channel_label: String,
    /// Whether the data channel delivers in order
    pub ordered: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_STUN_SERVERS.iter().map(|url| IceServer::new(*url)).collect(),
            data_channel_label: "chat".to_string(),
            ordered: true,
        }
    }
}

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Microphone
    Audio,
    /// Camera
    Video,
}

/// One track of a media stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    /// Track id
    pub id: String,
    /// Audio or video
    pub kind: TrackKind,
}

/// Opaque handle to a local or remote media stream
///
/// Capture and rendering happen outside this crate; the core only moves
/// the handle between links and the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStream {
    /// Stream id
    pub id: String,
    /// Tracks in the stream
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    /// A camera + microphone stream with generated ids
    pub fn camera_and_microphone() -> Self {
        let id = crate::crypto::generate_id();
        Self {
            tracks: vec![
                MediaTrack {
                    id: format!("{}-audio", id),
                    kind: TrackKind::Audio,
                },
                MediaTrack {
                    id: format!("{}-video", id),
                    kind: TrackKind::Video,
                },
            ],
            id,
        }
    }
}

/// Connection state reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// ICE checks in progress
    Connecting,
    /// Connected
    Connected,
    /// Temporarily lost
    Disconnected,
    /// Gave up
    Failed,
    /// Closed
    Closed,
}

impl TransportState {
    /// Whether the link can no longer carry traffic
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

/// Callback raised by a transport link
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A local ICE candidate was gathered
    IceCandidate(IceCandidate),
    /// The chat data channel opened
    DataChannelOpen,
    /// The chat data channel closed
    DataChannelClosed,
    /// A frame arrived on the chat data channel
    DataChannelMessage(Bytes),
    /// The remote side added media
    ///
    /// May repeat for one stream id as its tracks arrive, each time with
    /// every track known so far.
    RemoteStream(MediaStream),
    /// The connection changed state
    ConnectionState(TransportState),
}

/// Factory for transport links
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a link to `peer_id`
    ///
    /// Callbacks for the new link are delivered through `sink`.
    async fn create_link(
        &self,
        peer_id: &str,
        config: &LinkConfig,
        sink: LinkEventSink,
    ) -> Result<Box<dyn TransportLink>>;
}

/// One endpoint of a direct connection
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Create an offer and apply it as the local description
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create an answer and apply it as the local description
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply the remote side's offer or answer
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Add a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Open the chat data channel (initiator only)
    async fn create_data_channel(&self, label: &str, ordered: bool) -> Result<()>;

    /// Send a frame on the chat data channel
    async fn send(&self, data: Bytes) -> Result<()>;

    /// Attach local media
    async fn add_local_stream(&self, stream: &MediaStream) -> Result<()>;

    /// Detach local media
    async fn remove_local_stream(&self, stream_id: &str) -> Result<()>;

    /// Tear down the channel and connection
    async fn close(&self) -> Result<()>;
}
