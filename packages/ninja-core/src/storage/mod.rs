//! # Storage Module
//!
//! Local persistence for the user's profile, known rooms and chat history.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Persistence (trait)                                            │   │
//! │  │                                                                 │   │
//! │  │  profile   - local id, username, avatar                        │   │
//! │  │  rooms     - id, name, public salt, host id                    │   │
//! │  │  messages  - room history, keyed by room id                    │   │
//! │  │  dms       - direct messages, keyed by conversation id         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │             │                                  │                        │
//! │             ▼                                  ▼                        │
//! │  ┌─────────────────────┐          ┌─────────────────────────────┐      │
//! │  │  MemoryStore        │          │  SqliteStore                │      │
//! │  │  tests, demos       │          │  file or in-memory SQLite   │      │
//! │  └─────────────────────┘          └─────────────────────────────┘      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Room keys and passphrases are never persisted. Rejoining a saved room
//! always asks for the passphrase again.

mod memory;
mod schema;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crypto::{self, Salt};
use crate::error::Result;
use crate::messaging::Message;
use crate::room::RoomDescriptor;

/// Default number of history rows returned by `load_messages`
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// The local user's profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Stable local peer id
    pub id: String,
    /// Display name
    pub username: String,
    /// Avatar (URL or data URI)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Creation time (Unix seconds)
    pub created_at: i64,
}

impl Profile {
    /// A fresh profile with a random id and a `User<n>` name
    pub fn generate() -> Self {
        let n: u32 = rand::thread_rng().gen_range(0..10_000);
        Self {
            id: crypto::generate_id(),
            username: format!("User{}", n),
            avatar: None,
            created_at: crate::time::now_timestamp(),
        }
    }
}

/// A room the user has created or joined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    /// Room id
    pub id: String,
    /// Room name
    pub name: String,
    /// Public salt
    pub salt: Salt,
    /// Host peer id
    pub host_id: Option<String>,
    /// When the room was first saved (Unix seconds)
    pub created_at: i64,
}

impl RoomRecord {
    /// Build a record for `descriptor`, stamped now
    pub fn from_descriptor(descriptor: &RoomDescriptor) -> Self {
        Self {
            id: descriptor.room_id.clone(),
            name: descriptor.name.clone(),
            salt: descriptor.salt,
            host_id: descriptor.host_id.clone(),
            created_at: crate::time::now_timestamp(),
        }
    }

    /// What a joiner needs to rejoin
    pub fn to_descriptor(&self) -> RoomDescriptor {
        RoomDescriptor {
            room_id: self.id.clone(),
            name: self.name.clone(),
            salt: self.salt,
            host_id: self.host_id.clone(),
        }
    }
}

/// Storage backend for profile, rooms and history
///
/// Implementations must be safe to share across tasks.
pub trait Persistence: Send + Sync {
    /// The saved profile, if any
    fn load_profile(&self) -> Result<Option<Profile>>;

    /// Replace the saved profile
    fn save_profile(&self, profile: &Profile) -> Result<()>;

    /// All saved rooms, oldest first
    fn load_rooms(&self) -> Result<Vec<RoomRecord>>;

    /// Insert or update a room by id
    ///
    /// Updating keeps the original `created_at`.
    fn save_room(&self, room: &RoomRecord) -> Result<()>;

    /// Append a room message to history
    fn save_message(&self, room_id: &str, message: &Message) -> Result<()>;

    /// The last `limit` messages of a room, oldest first
    fn load_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>>;

    /// Append a direct message to a conversation
    fn save_dm(&self, conversation_id: &str, message: &Message) -> Result<()>;

    /// All direct messages of a conversation, oldest first
    fn load_dms(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Look up one saved room
    fn load_room(&self, room_id: &str) -> Result<Option<RoomRecord>> {
        Ok(self.load_rooms()?.into_iter().find(|r| r.id == room_id))
    }
}

/// Load the saved profile, creating and saving one on first run
pub fn load_or_create_profile(store: &dyn Persistence) -> Result<Profile> {
    if let Some(profile) = store.load_profile()? {
        return Ok(profile);
    }

    let profile = Profile::generate();
    store.save_profile(&profile)?;
    tracing::info!(id = %profile.id, username = %profile.username, "Created new profile");
    Ok(profile)
}

/// Keep the last `limit` items of a chronologically sorted list
pub(crate) fn tail<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    if items.len() > limit {
        items.drain(..items.len() - limit);
    }
    items
}
