//! Session store interface consumed at transport upgrade.
//!
//! Resolving a session id to an identity is the only thing the relay asks of
//! the auth system. Implementations own users, sessions, and credentials.

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session store backend failed: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(e))
    }
}

/// Blocking store lookups. Callers on an async runtime use `spawn_blocking`.
pub trait SessionStore: Send + Sync {
    /// Identity for a live session, or `None` when the session is unknown,
    /// expired, or belongs to an unregistered user.
    fn identity_for(&self, session_id: &str) -> Result<Option<String>, StoreError>;

    /// Remove expired sessions. Returns how many were removed.
    fn cleanup_expired(&self) -> Result<usize, StoreError>;
}

struct MemorySession {
    identity: String,
    expires_at: Instant,
}

/// In-process store for tests and embedding.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, MemorySession>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_id: impl Into<String>, identity: impl Into<String>, ttl: Duration) {
        self.sessions.insert(
            session_id.into(),
            MemorySession {
                identity: identity.into(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn revoke(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }
}

impl SessionStore for MemorySessionStore {
    fn identity_for(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .sessions
            .get(session_id)
            .filter(|s| s.expires_at > Instant::now())
            .map(|s| s.identity.clone()))
    }

    fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let before = self.sessions.len();
        let now = Instant::now();
        self.sessions.retain(|_, s| s.expires_at > now);
        Ok(before - self.sessions.len())
    }
}
