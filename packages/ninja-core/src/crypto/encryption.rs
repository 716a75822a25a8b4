//! # Encryption Module
//!
//! AES-256-GCM encryption for room message confidentiality and integrity.
//!
//! ## Blob Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         ENCRYPTED BLOB                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────┬───────────────────────────────┬──────────────────┐   │
//! │  │ Nonce        │ Ciphertext                    │ Auth Tag         │   │
//! │  │ 12 bytes     │ len(plaintext) bytes          │ 16 bytes         │   │
//! │  │ (random)     │                               │                  │   │
//! │  └──────────────┴───────────────────────────────┴──────────────────┘   │
//! │                                                                         │
//! │  decrypt() needs nothing but the blob and the room key.               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//!
//! | Property | Guarantee |
//! |----------|-----------|
//! | Confidentiality | Only holders of the room key can read the message |
//! | Integrity | Any modification is detected |
//! | Fail-closed | Wrong key, tampering and truncation all yield `AuthenticationFailure` |

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce as AesNonce,
};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

use crate::error::{Error, Result};

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Size of the room key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// A nonce (number used once) for AES-GCM encryption
///
/// ## Critical Security Requirement
///
/// **NEVER reuse a nonce with the same key!**
///
/// Nonces are drawn from the OS CSPRNG, which is safe for up to 2^32
/// messages per key (birthday bound for 96-bit nonces).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Nonce(pub [u8; NONCE_SIZE]);

impl Nonce {
    /// Generate a cryptographically random nonce
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// A room's AES-256-GCM key, derived from the passphrase and salt
///
/// Zeroized when dropped. Never serialized and never logged.
#[derive(Clone, ZeroizeOnDrop)]
pub struct RoomKey([u8; KEY_SIZE]);

impl RoomKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw key bytes
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RoomKey(<redacted>)")
    }
}

/// Encrypt `plaintext` under `key`
///
/// A fresh random nonce is generated per call and prepended to the output,
/// so the returned blob is `nonce || ciphertext || tag`.
///
/// ## Example
///
/// ```ignore
/// let key = RoomKey::from_bytes([0u8; 32]);
/// let blob = encrypt(&key, b"hi")?;
/// assert_eq!(decrypt(&key, &blob)?, b"hi");
/// ```
pub fn encrypt(key: &RoomKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = Nonce::random();
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::EncryptionFailed(format!("Invalid key: {}", e)))?;

    let ciphertext = cipher
        .encrypt(AesNonce::from_slice(&nonce.0), plaintext)
        .map_err(|e| Error::EncryptionFailed(format!("Encryption failed: {}", e)))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(nonce.as_bytes());
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a blob produced by [`encrypt`]
///
/// ## Errors
///
/// Returns `AuthenticationFailure` if:
/// - The blob is too short to hold a nonce and tag
/// - The ciphertext was tampered with
/// - The key is wrong
pub fn decrypt(key: &RoomKey, blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::AuthenticationFailure(format!(
            "blob is {} bytes, need at least {}",
            blob.len(),
            NONCE_SIZE + TAG_SIZE
        )));
    }

    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::AuthenticationFailure(format!("Invalid key: {}", e)))?;

    cipher
        .decrypt(AesNonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::AuthenticationFailure("authentication tag mismatch".into()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_encrypt_decrypt_basic() {
        let key = RoomKey::from_bytes([42u8; 32]);
        let plaintext = b"Hello, room!";

        let blob = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &blob).unwrap();

        assert_eq!(decrypted, plaintext);
        assert_eq!(blob.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        let key = RoomKey::from_bytes([42u8; 32]);

        let blob = encrypt(&key, b"").unwrap();
        let decrypted = decrypt(&key, &blob).unwrap();

        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = RoomKey::from_bytes([42u8; 32]);
        let mut blob = encrypt(&key, b"Hello, room!").unwrap();

        blob[NONCE_SIZE] ^= 0xFF;

        let result = decrypt(&key, &blob);
        assert!(matches!(result, Err(Error::AuthenticationFailure(_))));
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = RoomKey::from_bytes([1u8; 32]);
        let other = RoomKey::from_bytes([2u8; 32]);
        let blob = encrypt(&key, b"secret").unwrap();

        let result = decrypt(&other, &blob);
        assert!(matches!(result, Err(Error::AuthenticationFailure(_))));
    }

    #[test]
    fn test_truncated_blob_fails() {
        let key = RoomKey::from_bytes([42u8; 32]);

        assert!(matches!(decrypt(&key, &[]), Err(Error::AuthenticationFailure(_))));
        assert!(matches!(
            decrypt(&key, &[0u8; NONCE_SIZE + TAG_SIZE - 1]),
            Err(Error::AuthenticationFailure(_))
        ));
    }

    #[test]
    fn test_nonces_never_repeat() {
        let key = RoomKey::from_bytes([7u8; 32]);
        let mut seen = HashSet::new();

        for _ in 0..10_000 {
            let blob = encrypt(&key, b"x").unwrap();
            let mut nonce = [0u8; NONCE_SIZE];
            nonce.copy_from_slice(&blob[..NONCE_SIZE]);
            seen.insert(nonce);
        }

        assert_eq!(seen.len(), 10_000);
    }

    #[test]
    fn test_room_key_debug_is_redacted() {
        let key = RoomKey::from_bytes([0xAB; 32]);
        assert_eq!(format!("{:?}", key), "RoomKey(<redacted>)");
    }
}
