//! TLS session resumption cache.
//!
//! Sessions handed out by the server are kept per host so the next
//! handshake to that host can resume. Entries expire after a fixed age.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default lifetime for a cached session.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Per-host cache of resumable sessions.
#[derive(Debug)]
pub struct SessionCache<T> {
    inner: Arc<Mutex<HashMap<String, Entry<T>>>>,
    ttl: Duration,
}

#[derive(Debug)]
struct Entry<T> {
    session: T,
    stored_at: Instant,
}

impl<T> Clone for SessionCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            ttl: self.ttl,
        }
    }
}

impl<T: Clone> SessionCache<T> {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Remember the latest session for `host`, replacing any previous one.
    pub fn store(&self, host: &str, session: T) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.insert(
            host.to_ascii_lowercase(),
            Entry {
                session,
                stored_at: Instant::now(),
            },
        );
    }

    /// Session for `host` if one is cached and still fresh.
    pub fn get(&self, host: &str) -> Option<T> {
        let key = host.to_ascii_lowercase();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.session.clone()),
            Some(_) => {
                inner.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn remove(&self, host: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(&host.to_ascii_lowercase());
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.retain(|_, entry| entry.stored_at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for SessionCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
