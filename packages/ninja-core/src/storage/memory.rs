//! # Memory Store
//!
//! [`Persistence`] kept entirely in process memory. Nothing survives a
//! restart; used by tests, demos and ephemeral sessions.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{tail, Persistence, Profile, RoomRecord};
use crate::error::Result;
use crate::messaging::Message;

#[derive(Default)]
struct Tables {
    profile: Option<Profile>,
    rooms: Vec<RoomRecord>,
    messages: HashMap<String, Vec<Message>>,
    dms: HashMap<String, Vec<Message>>,
}

/// In-memory [`Persistence`]
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

/// Insert keeping the list sorted by timestamp; equal stamps keep arrival order
fn insert_chronological(list: &mut Vec<Message>, message: &Message) {
    let at = list.partition_point(|m| m.timestamp_millis() <= message.timestamp_millis());
    list.insert(at, message.clone());
}

impl Persistence for MemoryStore {
    fn load_profile(&self) -> Result<Option<Profile>> {
        Ok(self.tables.read().profile.clone())
    }

    fn save_profile(&self, profile: &Profile) -> Result<()> {
        self.tables.write().profile = Some(profile.clone());
        Ok(())
    }

    fn load_rooms(&self) -> Result<Vec<RoomRecord>> {
        Ok(self.tables.read().rooms.clone())
    }

    fn save_room(&self, room: &RoomRecord) -> Result<()> {
        let mut tables = self.tables.write();
        match tables.rooms.iter_mut().find(|r| r.id == room.id) {
            Some(existing) => {
                existing.name = room.name.clone();
                existing.salt = room.salt;
                existing.host_id = room.host_id.clone();
            }
            None => tables.rooms.push(room.clone()),
        }
        Ok(())
    }

    fn save_message(&self, room_id: &str, message: &Message) -> Result<()> {
        let mut tables = self.tables.write();
        insert_chronological(tables.messages.entry(room_id.to_string()).or_default(), message);
        Ok(())
    }

    fn load_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>> {
        let all = self
            .tables
            .read()
            .messages
            .get(room_id)
            .cloned()
            .unwrap_or_default();
        Ok(tail(all, limit))
    }

    fn save_dm(&self, conversation_id: &str, message: &Message) -> Result<()> {
        let mut tables = self.tables.write();
        insert_chronological(tables.dms.entry(conversation_id.to_string()).or_default(), message);
        Ok(())
    }

    fn load_dms(&self, conversation_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .tables
            .read()
            .dms
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}
