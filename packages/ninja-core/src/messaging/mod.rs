//! # Messaging Module
//!
//! The plaintext chat message and its canonical byte form.
//!
//! A [`Message`] never crosses the wire in the clear. The room's
//! `EncryptionContext` serializes it to JSON, seals the bytes under the
//! room key and ships the base64 blob inside a `chat` envelope:
//!
//! ```text
//! Message ──serde_json──► {"text","username","userId","timestamp","isDM"}
//!                                        │
//!                              AES-256-GCM (room key)
//!                                        ▼
//!                   {"type":"chat","encrypted":"<base64>","from":"<peer>"}
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A chat message
///
/// Immutable once constructed; read it through the accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    text: String,
    username: String,
    user_id: String,
    #[serde(rename = "timestamp")]
    timestamp_millis: i64,
    #[serde(rename = "isDM", default)]
    is_dm: bool,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn new(
        text: impl Into<String>,
        username: impl Into<String>,
        user_id: impl Into<String>,
        is_dm: bool,
    ) -> Self {
        Self::with_timestamp(
            text,
            username,
            user_id,
            crate::time::now_timestamp_millis(),
            is_dm,
        )
    }

    /// Create a message with an explicit timestamp
    pub fn with_timestamp(
        text: impl Into<String>,
        username: impl Into<String>,
        user_id: impl Into<String>,
        timestamp_millis: i64,
        is_dm: bool,
    ) -> Self {
        Self {
            text: text.into(),
            username: username.into(),
            user_id: user_id.into(),
            timestamp_millis,
            is_dm,
        }
    }

    /// Message body
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Display name of the author at send time
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Author's user id
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Unix timestamp (milliseconds) taken by the author
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }

    /// Whether this is a direct message
    pub fn is_dm(&self) -> bool {
        self.is_dm
    }
}

/// Deterministic conversation ID for a DM between two users
///
/// Both parties derive the same id regardless of argument order.
pub fn dm_conversation_id(user_a: &str, user_b: &str) -> String {
    let (first, second) = if user_a < user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };

    let mut hasher = Sha256::new();
    hasher.update(first.as_bytes());
    hasher.update(b"|");
    hasher.update(second.as_bytes());

    let hash = hasher.finalize();
    hex::encode(&hash[..16])
}
