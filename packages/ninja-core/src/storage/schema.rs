//! # Database Schema
//!
//! SQL schema definitions for the local SQLite store.
//!
//! ## Schema Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐    ┌─────────────────┐      ┌─────────────────┐    │
//! │  │    profile      │    │     rooms       │      │    messages     │    │
//! │  ├─────────────────┤    ├─────────────────┤      ├─────────────────┤    │
//! │  │ id              │    │ id              │◄─────│ room_id         │    │
//! │  │ username        │    │ name            │      │ text            │    │
//! │  │ avatar          │    │ salt (hex)      │      │ username        │    │
//! │  │ created_at      │    │ host_id         │      │ user_id         │    │
//! │  └─────────────────┘    │ created_at      │      │ timestamp       │    │
//! │                         └─────────────────┘      └─────────────────┘    │
//! │                                                                         │
//! │  ┌─────────────────┐                                                    │
//! │  │  direct_messages│                                                    │
//! │  ├─────────────────┤                                                    │
//! │  │ conversation_id │                                                    │
//! │  │ text, username  │                                                    │
//! │  │ user_id         │                                                    │
//! │  │ timestamp       │                                                    │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Local profile (single row)
CREATE TABLE IF NOT EXISTS profile (
    slot INTEGER PRIMARY KEY CHECK (slot = 0),
    id TEXT NOT NULL,
    username TEXT NOT NULL,
    avatar TEXT,
    created_at INTEGER NOT NULL
);

-- Rooms the user created or joined
-- The salt is public; the key is never stored
CREATE TABLE IF NOT EXISTS rooms (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    salt TEXT NOT NULL,
    host_id TEXT,
    created_at INTEGER NOT NULL
);

-- Room history
CREATE TABLE IF NOT EXISTS messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    room_id TEXT NOT NULL,
    text TEXT NOT NULL,
    username TEXT NOT NULL,
    user_id TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_room ON messages(room_id, timestamp);

-- Direct messages
CREATE TABLE IF NOT EXISTS direct_messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    text TEXT NOT NULL,
    username TEXT NOT NULL,
    user_id TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_dms_conversation ON direct_messages(conversation_id, timestamp);
"#;
