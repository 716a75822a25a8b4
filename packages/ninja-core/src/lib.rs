//! # Ninja Core
//!
//! Peer session coordination for a passphrase-protected P2P chat room.
//! Every participant derives the same AES-256-GCM key from the room
//! passphrase and salt, and links to the room host over a peer-to-peer
//! data channel. The host relays ciphertext between participants without
//! ever needing more than the same key everyone else has.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         NINJA CORE MODULES                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐   │
//! │  │                          Session                                 │   │
//! │  │                                                                  │   │
//! │  │  - Room lifecycle (create / join / leave)                        │   │
//! │  │  - Star relay: host rebroadcasts, everyone else talks to host    │   │
//! │  │  - Event loop + SessionHandle                                    │   │
//! │  └──────┬──────────────────────┬──────────────────────┬────────────┘   │
//! │         │                      │                      │                │
//! │  ┌──────▼──────┐  ┌────────────▼──────────┐  ┌────────▼────────┐       │
//! │  │    Room     │  │       Network         │  │     Storage     │       │
//! │  │             │  │                       │  │                 │       │
//! │  │ - Keys per  │  │ - PeerLink handshake  │  │ - SQLite        │       │
//! │  │   room      │  │ - Signaling channel   │  │ - In-memory     │       │
//! │  │ - Seal/open │  │ - Transports (memory, │  │ - Profile,      │       │
//! │  │   messages  │  │   WebRTC)             │  │   rooms, history│       │
//! │  └──────┬──────┘  └───────────────────────┘  └─────────────────┘       │
//! │         │                                                               │
//! │  ┌──────▼──────┐  ┌─────────────┐                                       │
//! │  │   Crypto    │  │  Messaging  │                                       │
//! │  │             │  │             │                                       │
//! │  │ - PBKDF2    │  │ - Message   │                                       │
//! │  │ - AES-GCM   │  │ - DM ids    │                                       │
//! │  └─────────────┘  └─────────────┘                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`crypto`] - Salts, key derivation, AES-GCM sealing
//! - [`messaging`] - Chat messages and DM conversation ids
//! - [`room`] - Room descriptors and the per-room key store
//! - [`network`] - Peer links, signaling, wire frames, transports
//! - [`session`] - The session coordinator and its event loop
//! - [`storage`] - Local persistence of profile, rooms and history
//!
//! ## Security Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SECURITY LAYERS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Layer 1: Transport Security (DTLS)                                    │
//! │  ──────────────────────────────────                                     │
//! │  WebRTC data channels are DTLS-encrypted hop by hop.                   │
//! │                                                                         │
//! │  Layer 2: Room Encryption (PBKDF2-SHA256 + AES-256-GCM)                │
//! │  ───────────────────────────────────────────────────────                │
//! │  Messages are sealed end to end under the room key. A relaying host    │
//! │  forwards the ciphertext it received, byte for byte.                   │
//! │                                                                         │
//! │  Layer 3: Passphrase Gate                                              │
//! │  ────────────────────────                                               │
//! │  A peer with the wrong passphrase can connect but cannot read or       │
//! │  inject. Frames that fail authentication are dropped and logged.       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use ninja_core::network::{MemoryNetwork, MemorySignalingHub};
//! use ninja_core::session::{spawn_session, SessionConfig, SessionCoordinator};
//!
//! let net = MemoryNetwork::new();
//! let hub = MemorySignalingHub::new();
//! let (signaling, signals) = hub.register("host");
//! let coordinator = SessionCoordinator::new(
//!     "host",
//!     Arc::new(net.transport("host")),
//!     Arc::new(signaling),
//!     SessionConfig::default(),
//! );
//! let (handle, _task) = spawn_session(coordinator, signals)?;
//! let descriptor = handle.create_room("lobby", "Lobby", "correct horse").await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod crypto;
pub mod error;
pub mod messaging;
pub mod network;
pub mod room;
pub mod session;
pub mod storage;
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use crypto::{RoomKey, Salt};
pub use error::{Error, Result};
pub use messaging::Message;
pub use room::{EncryptionContext, RoomDescriptor};
pub use session::{spawn_session, SessionConfig, SessionCoordinator, SessionEvent, SessionHandle};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Ninja Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
