//! # Room Module
//!
//! A room is a group of participants sharing one passphrase-derived key.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ROOM LIFECYCLE                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Host                                   Joiner                          │
//! │  ────                                   ──────                          │
//! │  init_room(id, pass) ──► salt                                          │
//! │  RoomDescriptor{id, name, salt, host} ── out of band ──►               │
//! │                                         join_room(id, pass, salt)      │
//! │                                                                         │
//! │  remove_room(id) on leave               remove_room(id) on leave       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The salt travels with the descriptor; only the passphrase is secret.

mod encryption_context;

pub use encryption_context::EncryptionContext;

use serde::{Deserialize, Serialize};

use crate::crypto::Salt;

/// Everything a joiner needs besides the passphrase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDescriptor {
    /// Room id
    pub room_id: String,
    /// Human-readable room name
    pub name: String,
    /// Public salt chosen by the creator
    pub salt: Salt,
    /// Peer id of the host, if known
    pub host_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_json_shape() {
        let descriptor = RoomDescriptor {
            room_id: "room-1".into(),
            name: "Dojo".into(),
            salt: Salt::from_bytes([1u8; 16]),
            host_id: Some("host".into()),
        };

        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["roomId"], "room-1");
        assert_eq!(value["hostId"], "host");
        assert_eq!(value["salt"].as_array().map(|a| a.len()), Some(16));

        let back: RoomDescriptor = serde_json::from_value(value).unwrap();
        assert_eq!(back, descriptor);
    }
}
