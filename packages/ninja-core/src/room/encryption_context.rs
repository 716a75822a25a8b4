//! Per-room key store.
//!
//! Keys live only in memory and are zeroized when a room is removed or the
//! context is dropped.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use zeroize::Zeroizing;

use crate::crypto::{self, RoomKey, Salt};
use crate::error::{Error, Result};
use crate::messaging::Message;

struct RoomSecret {
    key: RoomKey,
    salt: Salt,
}

/// Room id → (key, salt)
#[derive(Default)]
pub struct EncryptionContext {
    rooms: HashMap<String, RoomSecret>,
}

impl EncryptionContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the key for a new room
    ///
    /// Generates the room's salt, derives the key and returns the salt so
    /// the creator can publish it in the room descriptor.
    pub async fn init_room(&mut self, room_id: &str, passphrase: &str) -> Result<Salt> {
        if self.rooms.contains_key(room_id) {
            return Err(Error::RoomKeyExists(room_id.to_string()));
        }

        let salt = crypto::generate_salt();
        let key = derive_off_thread(passphrase, salt).await?;
        self.rooms.insert(room_id.to_string(), RoomSecret { key, salt });

        tracing::debug!(room_id, "Room key initialized");
        Ok(salt)
    }

    /// Derive the key for an existing room from its published salt
    pub async fn join_room(&mut self, room_id: &str, passphrase: &str, salt: Salt) -> Result<()> {
        if let Some(existing) = self.rooms.get(room_id) {
            if existing.salt != salt {
                return Err(Error::SaltMismatch(room_id.to_string()));
            }
        }

        let key = derive_off_thread(passphrase, salt).await?;
        self.rooms.insert(room_id.to_string(), RoomSecret { key, salt });

        tracing::debug!(room_id, "Room key derived from published salt");
        Ok(())
    }

    /// Serialize, encrypt and base64-encode a message for the room
    pub fn encrypt_message(&self, room_id: &str, message: &Message) -> Result<String> {
        let secret = self.secret(room_id)?;
        let plaintext = Zeroizing::new(serde_json::to_vec(message)?);
        let blob = crypto::encrypt(&secret.key, &plaintext)?;
        Ok(STANDARD.encode(blob))
    }

    /// Inverse of [`encrypt_message`](Self::encrypt_message)
    ///
    /// Anything that is not a valid sealed message under this room's key
    /// (bad base64, wrong key, tampering, non-message plaintext) reports
    /// `AuthenticationFailure`.
    pub fn decrypt_message(&self, room_id: &str, blob: &str) -> Result<Message> {
        let secret = self.secret(room_id)?;

        let raw = STANDARD
            .decode(blob)
            .map_err(|e| Error::AuthenticationFailure(format!("malformed blob: {}", e)))?;
        let plaintext = Zeroizing::new(crypto::decrypt(&secret.key, &raw)?);

        serde_json::from_slice(&plaintext)
            .map_err(|e| Error::AuthenticationFailure(format!("not a chat message: {}", e)))
    }

    /// Discard the key and salt for a room
    pub fn remove_room(&mut self, room_id: &str) {
        if self.rooms.remove(room_id).is_some() {
            tracing::debug!(room_id, "Room key discarded");
        }
    }

    /// Whether a key is held for the room
    pub fn has_key(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// The salt the room was keyed with
    pub fn salt(&self, room_id: &str) -> Option<Salt> {
        self.rooms.get(room_id).map(|s| s.salt)
    }

    /// Fingerprint of the room key, for out-of-band comparison
    pub fn fingerprint(&self, room_id: &str) -> Option<String> {
        self.rooms.get(room_id).map(|s| crypto::key_fingerprint(&s.key))
    }

    fn secret(&self, room_id: &str) -> Result<&RoomSecret> {
        self.rooms
            .get(room_id)
            .ok_or_else(|| Error::NoKeyForRoom(room_id.to_string()))
    }
}

impl std::fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("rooms", &self.rooms.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Runs PBKDF2 on the blocking pool.
async fn derive_off_thread(passphrase: &str, salt: Salt) -> Result<RoomKey> {
    let passphrase = Zeroizing::new(passphrase.to_owned());
    tokio::task::spawn_blocking(move || crypto::derive_key(&passphrase, &salt))
        .await
        .map_err(|e| Error::KeyDerivationFailed(e.to_string()))
}
