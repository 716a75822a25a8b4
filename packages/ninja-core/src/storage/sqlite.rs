//! # SQLite Store
//!
//! [`Persistence`] backed by a SQLite database through `rusqlite`.
//!
//! ```text
//! ┌─────────────────┐
//! │  SqliteStore    │  Persistence impl
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │    rusqlite     │  one connection behind a mutex
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │   SQLite DB     │  file, or in-memory for tests
//! └─────────────────┘
//! ```

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::{schema, Persistence, Profile, RoomRecord};
use crate::crypto::Salt;
use crate::error::{Error, Result};
use crate::messaging::Message;

/// SQLite-backed [`Persistence`]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?;
        Self::with_connection(conn)
    }

    /// Create a throwaway in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::DatabaseError(format!("Failed to create in-memory database: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .ok();

        match version {
            None => {
                conn.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| Error::DatabaseError(format!("Failed to set schema version: {}", e)))?;

                tracing::info!("Database schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(Error::DatabaseError(format!(
                    "Database schema version {} is newer than supported {}",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(v) => {
                tracing::debug!("Database schema version: {}", v);
            }
        }

        Ok(())
    }

    fn append(&self, table: &'static str, key_column: &'static str, key: &str, message: &Message) -> Result<()> {
        let conn = self.conn.lock();
        let sql = format!(
            "INSERT INTO {} ({}, text, username, user_id, timestamp) VALUES (?, ?, ?, ?, ?)",
            table, key_column
        );
        conn.execute(
            &sql,
            params![
                key,
                message.text(),
                message.username(),
                message.user_id(),
                message.timestamp_millis(),
            ],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to save message: {}", e)))?;
        Ok(())
    }

    /// Newest `limit` rows for `key`, returned oldest first
    fn recent(
        &self,
        table: &'static str,
        key_column: &'static str,
        key: &str,
        limit: Option<usize>,
        is_dm: bool,
    ) -> Result<Vec<Message>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT text, username, user_id, timestamp FROM {} WHERE {} = ?
             ORDER BY timestamp DESC, seq DESC LIMIT ?",
            table, key_column
        );
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![key, limit], |row| {
                Ok(Message::with_timestamp(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get(3)?,
                    is_dm,
                ))
            })
            .map_err(|e| Error::DatabaseError(format!("Failed to query messages: {}", e)))?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row.map_err(|e| Error::DatabaseError(format!("Failed to read message: {}", e)))?);
        }

        // Reverse to get chronological order
        messages.reverse();
        Ok(messages)
    }
}

fn decode_salt(hex_salt: &str) -> Result<Salt> {
    let bytes = hex::decode(hex_salt)
        .map_err(|e| Error::DatabaseError(format!("Corrupt room salt: {}", e)))?;
    Salt::from_slice(&bytes)
}

impl Persistence for SqliteStore {
    fn load_profile(&self) -> Result<Option<Profile>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, avatar, created_at FROM profile WHERE slot = 0",
            [],
            |row| {
                Ok(Profile {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    avatar: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| Error::DatabaseError(format!("Failed to load profile: {}", e)))
    }

    fn save_profile(&self, profile: &Profile) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO profile (slot, id, username, avatar, created_at)
             VALUES (0, ?, ?, ?, ?)",
            params![profile.id, profile.username, profile.avatar, profile.created_at],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to save profile: {}", e)))?;
        Ok(())
    }

    fn load_rooms(&self) -> Result<Vec<RoomRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, name, salt, host_id, created_at FROM rooms ORDER BY created_at, rowid")
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(|e| Error::DatabaseError(format!("Failed to query rooms: {}", e)))?;

        let mut rooms = Vec::new();
        for row in rows {
            let (id, name, salt, host_id, created_at) =
                row.map_err(|e| Error::DatabaseError(format!("Failed to read room: {}", e)))?;
            rooms.push(RoomRecord {
                id,
                name,
                salt: decode_salt(&salt)?,
                host_id,
                created_at,
            });
        }
        Ok(rooms)
    }

    fn save_room(&self, room: &RoomRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO rooms (id, name, salt, host_id, created_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                salt = excluded.salt,
                host_id = excluded.host_id",
            params![
                room.id,
                room.name,
                hex::encode(room.salt.as_bytes()),
                room.host_id,
                room.created_at,
            ],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to save room: {}", e)))?;
        Ok(())
    }

    fn load_room(&self, room_id: &str) -> Result<Option<RoomRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, name, salt, host_id, created_at FROM rooms WHERE id = ?",
                params![room_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| Error::DatabaseError(format!("Failed to load room: {}", e)))?;

        row.map(|(id, name, salt, host_id, created_at)| {
            Ok(RoomRecord {
                id,
                name,
                salt: decode_salt(&salt)?,
                host_id,
                created_at,
            })
        })
        .transpose()
    }

    fn save_message(&self, room_id: &str, message: &Message) -> Result<()> {
        self.append("messages", "room_id", room_id, message)
    }

    fn load_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>> {
        self.recent("messages", "room_id", room_id, Some(limit), false)
    }

    fn save_dm(&self, conversation_id: &str, message: &Message) -> Result<()> {
        self.append("direct_messages", "conversation_id", conversation_id, message)
    }

    fn load_dms(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.recent("direct_messages", "conversation_id", conversation_id, None, true)
    }
}

// ============================================================================
// TESTS
// ============================================================================
