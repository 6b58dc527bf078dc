//! Connection pool.
//!
//! Idle HTTP/1.1 connections and shared HTTP/2 connections are kept per
//! [`PoolKey`]. Each key has a cap on open connections; callers beyond the
//! cap wait for a release (bounded by their deadline) or, with
//! [`PoolOverflow::Unpooled`], get a one-off connection. Expired idle
//! connections are swept lazily on acquire. No lock is held across I/O.

mod lease;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};
use crate::timeouts::Deadline;
use crate::transport::h2::H2Handle;
use crate::transport::{Proxy, Target};

pub use lease::{Connection, Lease, PooledConnection, Transport};

/// Identity of interchangeable connections.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct PoolKey {
    pub target: Target,
    pub profile: String,
    /// Proxy identity without the password.
    pub proxy: Option<String>,
}

impl PoolKey {
    pub fn new(target: Target, profile: &str, proxy: Option<&Proxy>) -> Self {
        Self {
            target,
            profile: profile.to_string(),
            proxy: proxy.map(|p| p.to_string()),
        }
    }

    pub(crate) fn detached() -> Self {
        Self {
            target: Target {
                scheme: crate::transport::Scheme::Http,
                host: String::new(),
                port: 0,
            },
            profile: String::new(),
            proxy: None,
        }
    }
}

/// Behaviour when a key is at its connection cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolOverflow {
    /// Wait for a connection to be released, up to the deadline.
    #[default]
    Wait,
    /// Open an extra connection that is closed after use.
    Unpooled,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle connections older than this are closed.
    pub idle_ttl: Duration,
    pub max_connections_per_key: usize,
    pub overflow: PoolOverflow,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(90),
            max_connections_per_key: 6,
            overflow: PoolOverflow::Wait,
        }
    }
}

impl PoolConfig {
    pub fn idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    pub fn max_connections_per_key(mut self, max: usize) -> Self {
        self.max_connections_per_key = max.max(1);
        self
    }

    pub fn overflow(mut self, overflow: PoolOverflow) -> Self {
        self.overflow = overflow;
        self
    }
}

/// Snapshot of pool occupancy and lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub busy: usize,
    pub http2: usize,
    /// Connections dialed over the pool's lifetime.
    pub created: u64,
    /// Leases served by an existing connection.
    pub reused: u64,
}

struct H2Entry {
    handle: H2Handle,
    last_used: Instant,
    _permit: OwnedSemaphorePermit,
}

struct KeyState {
    idle: Vec<Connection>,
    slots: Arc<Semaphore>,
    notify: Arc<Notify>,
    h2: Option<H2Entry>,
    busy: usize,
}

impl KeyState {
    fn new(max: usize) -> Self {
        Self {
            idle: Vec::new(),
            slots: Arc::new(Semaphore::new(max)),
            notify: Arc::new(Notify::new()),
            h2: None,
            busy: 0,
        }
    }

    /// Drop idle connections past their TTL and HTTP/2 connections that
    /// closed or sat unused past it.
    fn sweep(&mut self, ttl: Duration) {
        let before = self.idle.len();
        self.idle.retain(|c| c.last_used.elapsed() < ttl);
        let evicted = before - self.idle.len();
        if evicted > 0 {
            tracing::trace!(evicted, "evicted expired idle connections");
        }
        if let Some(h2) = &self.h2 {
            if !h2.handle.is_open() || h2.last_used.elapsed() >= ttl {
                tracing::trace!("dropping stale HTTP/2 connection");
                self.h2 = None;
            }
        }
    }
}

pub(crate) struct PoolInner {
    config: PoolConfig,
    keys: Mutex<HashMap<PoolKey, KeyState>>,
    next_id: AtomicU64,
    created: AtomicU64,
    reused: AtomicU64,
}

impl PoolInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PoolKey, KeyState>> {
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn checkin(&self, key: &PoolKey, mut conn: Connection, reusable: bool) {
        let mut keys = self.lock();
        let Some(state) = keys.get_mut(key) else {
            return;
        };
        state.busy = state.busy.saturating_sub(1);
        if reusable && conn.permit.is_some() {
            conn.last_used = Instant::now();
            tracing::trace!(id = conn.id, host = %key.target.host, "connection returned to pool");
            state.idle.push(conn);
        } else {
            tracing::trace!(id = conn.id, host = %key.target.host, "connection closed");
        }
        state.notify.notify_one();
    }
}

/// Pool of connections shared by a session.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                keys: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                created: AtomicU64::new(0),
                reused: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Lease a connection for `key`: a shared HTTP/2 connection, the most
    /// recently used idle HTTP/1.1 connection, or a new one from `dial`.
    ///
    /// Waiting for a free slot is bounded by `deadline` capped at
    /// `acquire_timeout`; expiry yields [`Error::PoolAcquireTimeout`].
    pub async fn acquire<F, Fut>(
        &self,
        key: &PoolKey,
        deadline: &Deadline,
        acquire_timeout: Option<Duration>,
        dial: F,
    ) -> Result<Lease>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Transport>>,
    {
        let wait_deadline = deadline.cap(acquire_timeout);
        let started = Instant::now();
        let permit = loop {
            let (slots, notify) = {
                let mut keys = self.inner.lock();
                let state = keys
                    .entry(key.clone())
                    .or_insert_with(|| KeyState::new(self.inner.config.max_connections_per_key));
                state.sweep(self.inner.config.idle_ttl);

                if let Some(h2) = state.h2.as_mut() {
                    h2.last_used = Instant::now();
                    self.inner.reused.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(host = %key.target.host, "reusing HTTP/2 connection");
                    return Ok(Lease::Http2 {
                        handle: h2.handle.clone(),
                        reused: true,
                    });
                }

                while let Some(conn) = state.idle.pop() {
                    if !conn.io.is_reusable() {
                        tracing::trace!(id = conn.id, "idle connection closed by peer");
                        continue;
                    }
                    state.busy += 1;
                    self.inner.reused.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(id = conn.id, host = %key.target.host, "reusing pooled connection");
                    return Ok(Lease::Http1(PooledConnection::new(
                        conn,
                        key.clone(),
                        Arc::downgrade(&self.inner),
                        true,
                    )));
                }
                (state.slots.clone(), state.notify.clone())
            };

            match slots.clone().try_acquire_owned() {
                Ok(permit) => break Some(permit),
                Err(_) if self.inner.config.overflow == PoolOverflow::Unpooled => {
                    tracing::debug!(host = %key.target.host, "pool full, opening unpooled connection");
                    break None;
                }
                Err(_) => {}
            }

            tracing::trace!(host = %key.target.host, "pool full, waiting for a connection");
            let wait = async {
                tokio::select! {
                    permit = slots.acquire_owned() => permit.ok(),
                    _ = notify.notified() => None,
                }
            };
            let woke = match wait_deadline.instant() {
                Some(at) => tokio::time::timeout_at(at, wait)
                    .await
                    .map_err(|_| Error::PoolAcquireTimeout(started.elapsed()))?,
                None => wait.await,
            };
            if let Some(permit) = woke {
                break Some(permit);
            }
        };

        let transport = dial().await?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.created.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        match transport {
            Transport::Http1(io) => {
                let pool = match &permit {
                    Some(_) => {
                        if let Some(state) = self.inner.lock().get_mut(key) {
                            state.busy += 1;
                        }
                        Arc::downgrade(&self.inner)
                    }
                    None => std::sync::Weak::new(),
                };
                tracing::debug!(id, host = %key.target.host, "new HTTP/1.1 connection");
                Ok(Lease::Http1(PooledConnection::new(
                    Connection {
                        id,
                        io,
                        created_at: now,
                        last_used: now,
                        permit,
                    },
                    key.clone(),
                    pool,
                    false,
                )))
            }
            Transport::Http2(handle) => {
                tracing::debug!(id, host = %key.target.host, "new HTTP/2 connection");
                if let Some(permit) = permit {
                    let mut keys = self.inner.lock();
                    if let Some(state) = keys.get_mut(key) {
                        if state.h2.is_none() {
                            state.h2 = Some(H2Entry {
                                handle: handle.clone(),
                                last_used: now,
                                _permit: permit,
                            });
                            state.notify.notify_waiters();
                        }
                    }
                }
                Ok(Lease::Http2 {
                    handle,
                    reused: false,
                })
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let keys = self.inner.lock();
        let mut stats = PoolStats {
            created: self.inner.created.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            ..Default::default()
        };
        for state in keys.values() {
            stats.idle += state.idle.len();
            stats.busy += state.busy;
            stats.http2 += usize::from(state.h2.as_ref().is_some_and(|h| h.handle.is_open()));
        }
        stats
    }

    /// Close every idle connection and forget shared HTTP/2 connections.
    /// Leased connections are unaffected.
    pub fn clear(&self) {
        let mut keys = self.inner.lock();
        for state in keys.values_mut() {
            state.idle.clear();
            state.h2 = None;
            state.notify.notify_waiters();
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}
