//! # Key Derivation Functions
//!
//! Turns a room passphrase and salt into the room's AES-256-GCM key.
//!
//! ## Room Key Derivation
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    PASSPHRASE → ROOM KEY                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌───────────────────────┐      ┌───────────────────────┐              │
//! │  │  Passphrase (secret)  │      │  Salt (16 bytes,      │              │
//! │  │  shared out of band   │      │  public, per room)    │              │
//! │  └───────────┬───────────┘      └───────────┬───────────┘              │
//! │              └──────────────┬───────────────┘                          │
//! │                             ▼                                           │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  PBKDF2-HMAC-SHA256(                                            │   │
//! │  │    password   = passphrase,                                     │   │
//! │  │    salt       = room salt,                                      │   │
//! │  │    iterations = 100_000,                                        │   │
//! │  │    length     = 32 bytes                                        │   │
//! │  │  )                                                              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                ▼                                        │
//! │               Room Key (AES-256-GCM, in memory only)                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everyone who uses the same passphrase and salt gets a bit-identical key.
//! Anyone with a different passphrase gets a key that fails authentication
//! on every message.
//!
//! ## Security Considerations
//!
//! | Aspect | Design Choice |
//! |--------|---------------|
//! | KDF Algorithm | PBKDF2-HMAC-SHA256 |
//! | Work factor | 100,000 iterations |
//! | Salt | 16 random bytes, generated once by the room creator |
//! | Fingerprint | SHA-256 over a domain tag and the key, truncated to 64 bits |

use std::fmt;

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use super::encryption::{RoomKey, KEY_SIZE};
use crate::error::{Error, Result};

/// PBKDF2 iteration count for room keys
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Size of a room salt in bytes
pub const SALT_SIZE: usize = 16;

/// Domain separation strings
pub mod domain {
    /// Domain for room key fingerprints
    pub const KEY_FINGERPRINT: &[u8] = b"ninja-room-key-fingerprint-v1";
}

/// A room's public salt
///
/// Serializes as an array of 16 byte values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Generate a fresh random salt
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, checking the length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SALT_SIZE] = bytes.try_into().map_err(|_| {
            Error::InvalidKey(format!(
                "salt must be {} bytes, got {}",
                SALT_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", hex::encode(self.0))
    }
}

/// Generate a fresh 16-byte room salt
pub fn generate_salt() -> Salt {
    Salt::random()
}

/// Derive the room key from a passphrase and salt
///
/// Deterministic: identical inputs always yield identical keys. This is
/// CPU-bound (~100k HMAC rounds); async callers should run it on a
/// blocking thread.
pub fn derive_key(passphrase: &str, salt: &Salt) -> RoomKey {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt.as_bytes(), PBKDF2_ITERATIONS, &mut key);
    let room_key = RoomKey::from_bytes(key);
    key.zeroize();
    room_key
}

/// Short fingerprint of a room key
///
/// Participants can read these aloud to confirm they derived the same key
/// without revealing it. Returns 16 hex characters.
pub fn key_fingerprint(key: &RoomKey) -> String {
    let digest = Sha256::new()
        .chain_update(domain::KEY_FINGERPRINT)
        .chain_update(key.as_bytes())
        .finalize();
    hex::encode(&digest[..8])
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{decrypt, encrypt};

    #[test]
    fn test_derive_key_deterministic() {
        let salt = Salt::from_bytes([9u8; SALT_SIZE]);

        let k1 = derive_key("correct-horse", &salt);
        let k2 = derive_key("correct-horse", &salt);

        assert_eq!(k1.as_bytes(), k2.as_bytes());

        // A blob sealed under one derivation opens under the other
        let blob = encrypt(&k1, b"hi").unwrap();
        assert_eq!(decrypt(&k2, &blob).unwrap(), b"hi");
    }

    #[test]
    fn test_different_passphrase_different_key() {
        let salt = Salt::from_bytes([9u8; SALT_SIZE]);

        let k1 = derive_key("correct-horse", &salt);
        let k2 = derive_key("wrong-pass", &salt);

        assert_ne!(k1.as_bytes(), k2.as_bytes());
        let blob = encrypt(&k1, b"hi").unwrap();
        assert!(matches!(decrypt(&k2, &blob), Err(Error::AuthenticationFailure(_))));
    }

    #[test]
    fn test_different_salt_different_key() {
        let k1 = derive_key("correct-horse", &Salt::from_bytes([1u8; SALT_SIZE]));
        let k2 = derive_key("correct-horse", &Salt::from_bytes([2u8; SALT_SIZE]));

        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_generate_salt_is_random() {
        let a = generate_salt();
        let b = generate_salt();
        assert_ne!(a, b);
    }

    #[test]
    fn test_salt_from_slice_checks_length() {
        assert!(Salt::from_slice(&[0u8; SALT_SIZE]).is_ok());
        assert!(matches!(Salt::from_slice(&[0u8; 8]), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_salt_serializes_as_byte_array() {
        let salt = Salt::from_bytes([3u8; SALT_SIZE]);
        let json = serde_json::to_string(&salt).unwrap();
        assert_eq!(json, "[3,3,3,3,3,3,3,3,3,3,3,3,3,3,3,3]");

        let back: Salt = serde_json::from_str(&json).unwrap();
        assert_eq!(back, salt);
    }

    #[test]
    fn test_key_fingerprint() {
        let key = RoomKey::from_bytes([5u8; KEY_SIZE]);
        let fp = key_fingerprint(&key);

        assert_eq!(fp.len(), 16);
        assert_eq!(fp, key_fingerprint(&RoomKey::from_bytes([5u8; KEY_SIZE])));
        assert_ne!(fp, key_fingerprint(&RoomKey::from_bytes([6u8; KEY_SIZE])));
    }
}
