//! # Cryptography Module
//!
//! The primitives every room is built on.
//!
//! ## Security Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Room creator                         Joiner                            │
//! │  ────────────                         ──────                            │
//! │  generate_salt() ──── salt (public) ────► RoomDescriptor.salt          │
//! │        │                                        │                       │
//! │        ▼                                        ▼                       │
//! │  derive_key(pass, salt)               derive_key(pass, salt)           │
//! │        │                                        │                       │
//! │        └────────── identical RoomKey ───────────┘                       │
//! │                                                                         │
//! │  encrypt(key, json) → nonce || ciphertext || tag                       │
//! │  decrypt(key, blob) → json | AuthenticationFailure                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Algorithm Choices
//!
//! | Algorithm | Purpose |
//! |-----------|---------|
//! | PBKDF2-HMAC-SHA256 (100k) | Passphrase → room key |
//! | AES-256-GCM | Message encryption (AEAD) |
//! | UUID v4 | Room, user and message identifiers |
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: `RoomKey` is zeroized when dropped
//! 2. **Secure Random**: `rand::rngs::OsRng` for nonces and salts
//! 3. **No Nonce Reuse**: a fresh random nonce for every encryption

mod encryption;
mod kdf;

pub use encryption::{decrypt, encrypt, Nonce, RoomKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use kdf::{
    derive_key, generate_salt, key_fingerprint, Salt, PBKDF2_ITERATIONS, SALT_SIZE,
};

/// Generate a globally unique opaque identifier
///
/// UUID v4: 122 random bits, so collisions are negligible.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_id_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_generate_id_is_uuid_v4() {
        let id = generate_id();
        let parsed = uuid::Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }
}
