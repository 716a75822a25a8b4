//! # Network Module
//!
//! Direct peer-to-peer links between room participants.
//!
//! ## Network Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         NETWORK STACK                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    PeerLink (one per remote peer)               │   │
//! │  │                                                                 │   │
//! │  │  Handshake state machine: offer / answer / ICE                 │   │
//! │  │  Chat framing: ChatEnvelope JSON over the data channel         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                              │                                          │
//! │                              ▼                                          │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Transport / TransportLink traits                │   │
//! │  │                                                                 │   │
//! │  │  MemoryTransport   - in-process loopback                       │   │
//! │  │  WebRtcTransport   - `webrtc` crate (feature "webrtc")         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 SignalingChannel                                │   │
//! │  │                                                                 │   │
//! │  │  Delivers offers/answers/candidates before a link exists       │   │
//! │  │  MemorySignalingHub - in-process mailboxes                     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Connection Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      PEER CONNECTION FLOW                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. Initiator creates the link and the "chat" data channel             │
//! │                                                                         │
//! │  2. Offer ──signaling──► Responder                                     │
//! │     └─► Responder applies it and answers                               │
//! │                                                                         │
//! │  3. Answer ──signaling──► Initiator                                    │
//! │                                                                         │
//! │  4. ICE candidates trickle both ways                                   │
//! │                                                                         │
//! │  5. Data channel opens: link is Open, chat frames flow                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod events;
mod memory_transport;
mod peer;
mod protocol;
mod signaling;
mod transport;

#[cfg(feature = "webrtc")]
mod webrtc_transport;

pub use events::{LinkEvent, LinkEventSink, LinkPayload, PeerEvent};
pub use memory_transport::{MemoryNetwork, MemoryTransport};
pub use peer::{ConnectionState, PeerLink, Role};
pub use protocol::{ChatEnvelope, IceCandidate, SdpType, SessionDescription, Signal, SignalEnvelope};
pub use signaling::{MemorySignaling, MemorySignalingHub, SignalingChannel};
pub use transport::{
    IceServer, LinkConfig, MediaStream, MediaTrack, TrackKind, Transport, TransportEvent,
    TransportLink, TransportState, DEFAULT_STUN_SERVERS,
};

#[cfg(feature = "webrtc")]
pub use webrtc_transport::WebRtcTransport;
