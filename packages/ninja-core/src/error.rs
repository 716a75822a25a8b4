//! # Error Handling
//!
//! Error types for Ninja Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Session Errors                                                    │
//! │  │   ├── SessionClosed         - Event loop has stopped                │
//! │  │   ├── AlreadyInRoom         - Leave the current room first          │
//! │  │   └── NotInRoom             - No room is active                     │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── KeyDerivationFailed   - PBKDF2 task failed                    │
//! │  │   ├── EncryptionFailed      - AES-GCM seal failed                   │
//! │  │   ├── AuthenticationFailure - Wrong key, tampered or malformed blob │
//! │  │   ├── NoKeyForRoom          - Encrypt/decrypt before key setup      │
//! │  │   ├── InvalidKey            - Bad key or salt length                │
//! │  │   ├── RoomKeyExists         - Room already has a key                │
//! │  │   └── SaltMismatch          - Room already keyed with another salt  │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   ├── StorageNotInitialized - No store attached                     │
//! │  │   └── DatabaseError         - SQLite failure                        │
//! │  │                                                                      │
//! │  ├── Network Errors                                                    │
//! │  │   ├── SignalingError        - Offer/answer/candidate rejected       │
//! │  │   ├── InvalidState          - Operation not valid in link state     │
//! │  │   ├── TransportFailure      - Channel or connection dropped         │
//! │  │   └── PeerNotFound          - No link for that peer                 │
//! │  │                                                                      │
//! │  └── Room Errors                                                       │
//! │      └── RoomNotFound          - No saved room with that id            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `AuthenticationFailure` never reaches the UI from the relay path: the
//! coordinator logs it and drops the message so one bad actor cannot
//! disrupt the room.

use thiserror::Error;

use crate::network::ConnectionState;

/// Result type alias for Ninja Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Ninja Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Session Errors (100-199)
    // ========================================================================

    /// The session event loop has stopped
    #[error("Session is closed.")]
    SessionClosed,

    /// A room is already active on this session
    #[error("Already in room {0}. Leave it before creating or joining another.")]
    AlreadyInRoom(String),

    /// No room is active
    #[error("Not in a room.")]
    NotInRoom,

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// Key derivation failed
    #[error("Failed to derive room key: {0}")]
    KeyDerivationFailed(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Ciphertext did not authenticate under the room key
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    /// No key is stored for the room
    #[error("No key for room: {0}")]
    NoKeyForRoom(String),

    /// Invalid key or salt format/length
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The room already has a key
    #[error("Room {0} already has a key.")]
    RoomKeyExists(String),

    /// The room is keyed under a different salt
    #[error("Room {0} is already keyed with a different salt.")]
    SaltMismatch(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// No persistence backend is attached
    #[error("Storage has not been initialized.")]
    StorageNotInitialized,

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    // ========================================================================
    // Network Errors (500-599)
    // ========================================================================

    /// Malformed or rejected offer/answer/candidate
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// The link is not in a state that allows the operation
    #[error("Cannot {operation} while link is {state}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// State the link was in
        state: ConnectionState,
    },

    /// The underlying connection failed or dropped
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// No link exists for the peer
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    // ========================================================================
    // Room Errors (700-799)
    // ========================================================================

    /// No saved room with this id
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Session
    /// - 300-399: Crypto
    /// - 400-499: Storage
    /// - 500-599: Network
    /// - 700-799: Rooms
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Session (100-199)
            Error::SessionClosed => 100,
            Error::AlreadyInRoom(_) => 101,
            Error::NotInRoom => 102,

            // Crypto (300-399)
            Error::KeyDerivationFailed(_) => 300,
            Error::EncryptionFailed(_) => 301,
            Error::AuthenticationFailure(_) => 302,
            Error::NoKeyForRoom(_) => 303,
            Error::InvalidKey(_) => 304,
            Error::RoomKeyExists(_) => 305,
            Error::SaltMismatch(_) => 306,

            // Storage (400-499)
            Error::StorageNotInitialized => 400,
            Error::DatabaseError(_) => 401,

            // Network (500-599)
            Error::SignalingError(_) => 500,
            Error::InvalidState { .. } => 501,
            Error::TransportFailure(_) => 502,
            Error::PeerNotFound(_) => 503,

            // Rooms (700-799)
            Error::RoomNotFound(_) => 700,

            // Internal (900-999)
            Error::Internal(_) => 900,
            Error::SerializationError(_) => 901,
            Error::DeserializationError(_) => 902,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors leave the session usable: the failed message or
    /// link is dropped and a fresh attempt may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationFailure(_)
                | Error::SignalingError(_)
                | Error::TransportFailure(_)
                | Error::PeerNotFound(_)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::SessionClosed.code(), 100);
        assert_eq!(Error::KeyDerivationFailed("test".into()).code(), 300);
        assert_eq!(Error::NoKeyForRoom("room".into()).code(), 303);
        assert_eq!(Error::StorageNotInitialized.code(), 400);
        assert_eq!(Error::SignalingError("test".into()).code(), 500);
        assert_eq!(Error::RoomNotFound("room".into()).code(), 700);
        assert_eq!(Error::Internal("test".into()).code(), 900);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::AuthenticationFailure("tag".into()).is_recoverable());
        assert!(Error::TransportFailure("dropped".into()).is_recoverable());
        assert!(!Error::NoKeyForRoom("room".into()).is_recoverable());
        assert!(!Error::NotInRoom.is_recoverable());
    }

    #[test]
    fn test_invalid_state_message() {
        let err = Error::InvalidState {
            operation: "handle answer",
            state: ConnectionState::Idle,
        };
        assert_eq!(err.to_string(), "Cannot handle answer while link is idle");
        assert_eq!(err.code(), 501);
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse: std::result::Result<u32, _> = serde_json::from_str("not json");
        let err: Error = parse.unwrap_err().into();
        assert_eq!(err.code(), 901);
    }
}
