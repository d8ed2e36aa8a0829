//! In-memory session store keyed by an opaque cookie value.
//!
//! Handlers copy a session out, run a phase against the copy, and write it
//! back. No map guard lives across an `.await`.
//!
//! Every write pushes the session's expiry out by the store TTL. Expired
//! sessions are evicted lazily on access and by a background reaper.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, HeaderValue, header};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::dice::SessionData;

/// Default session lifetime since the last write.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
struct StoredSession {
    data: SessionData,
    expires_at: Instant,
}

impl StoredSession {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Sessions by id.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, StoredSession>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    /// Create an empty store whose sessions live `ttl` past their last write.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Fresh opaque session id.
    #[must_use]
    pub fn new_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Copy of the live session stored under `id`.
    #[must_use]
    pub fn load(&self, id: &str) -> Option<SessionData> {
        let entry = self.sessions.get(id)?;
        let stored = entry.value().clone();
        drop(entry);

        if stored.is_expired() {
            // Lazy eviction: remove on access
            self.sessions.remove_if(id, |_, s| s.is_expired());
            debug!(session_id = %id, "Lazy-evicted expired session");
            return None;
        }

        Some(stored.data)
    }

    /// Store `data` under `id`; empty sessions are dropped instead.
    pub fn save(&self, id: &str, data: SessionData) {
        if data.is_empty() {
            self.remove(id);
        } else {
            let stored = StoredSession {
                data,
                expires_at: Instant::now() + self.ttl,
            };
            self.sessions.insert(id.to_string(), stored);
        }
    }

    /// Forget the session under `id`.
    pub fn remove(&self, id: &str) {
        if self.sessions.remove(id).is_some() {
            debug!(session_id = %id, "Dropped session");
        }
    }

    /// Remove all expired sessions. Called periodically by the reaper.
    pub fn reap_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired());
        before.saturating_sub(self.sessions.len())
    }

    /// Number of stored sessions, expired ones not yet reaped included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Spawn a background task that reaps expired sessions every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    store: Arc<SessionStore>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = store.reap_expired();
                    if reaped > 0 {
                        debug!(count = reaped, "Reaped expired sessions");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Session reaper shutting down");
                    break;
                }
            }
        }
    });
}

/// Value of cookie `name` from request headers.
#[must_use]
pub fn session_id_from_headers(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `Set-Cookie` value binding `id` to the client.
#[must_use]
pub fn session_cookie(name: &str, id: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("{name}={id}; Path=/; HttpOnly; SameSite=Lax")).ok()
}
