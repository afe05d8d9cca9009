//! SQLite-backed session store.
//!
//! Shares its schema with the passkey registration service, which owns the
//! rows. The relay only reads sessions and purges expired ones.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use courier_services::{SessionStore, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT UNIQUE NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    last_login TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    passkey_id TEXT,
    public_key TEXT,
    is_registered BOOLEAN DEFAULT FALSE
);
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL,
    username TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    expires_at TIMESTAMP DEFAULT (datetime('now', '+24 hours')),
    FOREIGN KEY (user_id) REFERENCES users (id)
);
CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);
CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
";

pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> rusqlite::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionStore for SqliteSessionStore {
    fn identity_for(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        self.conn()
            .query_row(
                "SELECT s.username FROM sessions s
                 JOIN users u ON u.id = s.user_id
                 WHERE s.id = ?1
                   AND s.expires_at > CURRENT_TIMESTAMP
                   AND u.is_registered = 1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::backend)
    }

    fn cleanup_expired(&self) -> Result<usize, StoreError> {
        self.conn()
            .execute("DELETE FROM sessions WHERE expires_at < CURRENT_TIMESTAMP", [])
            .map_err(StoreError::backend)
    }
}
