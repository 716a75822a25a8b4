//! # Wire Protocol
//!
//! JSON frames exchanged between peers.
//!
//! ## Frames
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATA CHANNEL FRAMES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ChatEnvelope (the only thing sent over an open PeerLink)              │
//! │  ├── {"type":"chat",        "encrypted": "<b64>", "from": "<id>"}      │
//! │  ├── {"type":"signal",      "from": "<id>", "signal": {...}}           │
//! │  └── {"type":"peer-joined", "peerId": "<id>", "from": "<id>"}          │
//! │                                                                         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                         SIGNALING PAYLOADS                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Signal                                                                │
//! │  ├── {"type":"offer",         "offer":  {"type":"offer","sdp":".."}}   │
//! │  ├── {"type":"answer",        "answer": {"type":"answer","sdp":".."}}  │
//! │  └── {"type":"ice-candidate", "candidate": {"candidate":"..",          │
//! │                                   "sdpMid":"0","sdpMLineIndex":0}}     │
//! │                                                                         │
//! │  SignalEnvelope = { "from": "<id>", "signal": Signal }                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// SDP type of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer
    Offer,
    /// Answer
    Answer,
}

/// An SDP offer or answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Raw SDP
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// An ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default)]
    pub sdp_mid: Option<String>,
    /// Media line index
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

/// One handshake step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Signal {
    /// SDP offer from the initiator
    Offer {
        /// The offer
        offer: SessionDescription,
    },
    /// SDP answer from the responder
    Answer {
        /// The answer
        answer: SessionDescription,
    },
    /// Trickled ICE candidate
    IceCandidate {
        /// The candidate
        candidate: IceCandidate,
    },
}

impl Signal {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Offer { .. } => "offer",
            Signal::Answer { .. } => "answer",
            Signal::IceCandidate { .. } => "ice-candidate",
        }
    }
}

/// A signal addressed from one peer, carried by the signaling channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Sender's peer id
    pub from: String,
    /// Handshake step
    pub signal: Signal,
}

/// A frame on an established data channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChatEnvelope {
    /// Encrypted room message
    Chat {
        /// Base64 `nonce || ciphertext || tag`
        encrypted: String,
        /// Original sender
        from: String,
    },
    /// Handshake step tunnelled over an existing link
    Signal {
        /// Peer the signal comes from
        from: String,
        /// Handshake step
        signal: Signal,
    },
    /// Announcement that a peer wants into the room
    PeerJoined {
        /// The newcomer
        #[serde(rename = "peerId")]
        peer_id: String,
        /// Announcer
        from: String,
    },
}

impl ChatEnvelope {
    /// Encode to the JSON text sent on the data channel
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }

    /// Decode a data channel frame
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::DeserializationError(e.to_string()))
    }

    /// Sender recorded in the frame
    pub fn sender(&self) -> &str {
        match self {
            ChatEnvelope::Chat { from, .. }
            | ChatEnvelope::Signal { from, .. }
            | ChatEnvelope::PeerJoined { from, .. } => from,
        }
    }
}
