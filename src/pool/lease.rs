//! Connections as the pool hands them out.

use std::fmt;
use std::sync::Weak;
use std::time::Instant;

use tokio::sync::OwnedSemaphorePermit;

use super::{PoolInner, PoolKey};
use crate::error::{Error, Result};
use crate::transport::h1::H1Connection;
use crate::transport::h2::H2Handle;

/// A freshly dialed connection, before the pool files it.
pub enum Transport {
    Http1(H1Connection),
    Http2(H2Handle),
}

/// A pooled HTTP/1.1 connection with its bookkeeping.
pub struct Connection {
    pub(super) id: u64,
    pub(super) io: H1Connection,
    pub(super) created_at: Instant,
    pub(super) last_used: Instant,
    /// Slot in the per-key connection cap; `None` for overflow connections.
    pub(super) permit: Option<OwnedSemaphorePermit>,
}

impl Connection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("pooled", &self.permit.is_some())
            .field("idle_for", &self.last_used.elapsed())
            .finish()
    }
}

/// An HTTP/1.1 connection leased for one exchange.
///
/// [`release`](Self::release) returns it to the pool or discards it.
/// Dropping the lease discards the connection.
pub struct PooledConnection {
    conn: Option<Connection>,
    key: PoolKey,
    pool: Weak<PoolInner>,
    reused: bool,
}

impl PooledConnection {
    pub(super) fn new(conn: Connection, key: PoolKey, pool: Weak<PoolInner>, reused: bool) -> Self {
        Self {
            conn: Some(conn),
            key,
            pool,
            reused,
        }
    }

    /// A lease that belongs to no pool; release always closes it.
    pub fn detached(io: H1Connection) -> Self {
        let now = Instant::now();
        Self {
            conn: Some(Connection {
                id: 0,
                io,
                created_at: now,
                last_used: now,
                permit: None,
            }),
            key: PoolKey::detached(),
            pool: Weak::new(),
            reused: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.conn.as_ref().map(|c| c.id).unwrap_or_default()
    }

    /// Whether this lease reuses a connection from an earlier exchange.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn io(&mut self) -> Result<&mut H1Connection> {
        self.conn
            .as_mut()
            .map(|c| &mut c.io)
            .ok_or_else(|| Error::transport("connection already released"))
    }

    /// Hand the connection back: idle for reuse, or closed.
    pub fn release(mut self, reusable: bool) {
        self.checkin(reusable);
    }

    fn checkin(&mut self, reusable: bool) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) => pool.checkin(&self.key, conn, reusable),
            None => tracing::trace!(id = conn.id, "closing connection outside pool"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.checkin(false);
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id())
            .field("key", &self.key)
            .field("reused", &self.reused)
            .finish()
    }
}

/// What `ConnectionPool::acquire` hands out.
#[derive(Debug)]
pub enum Lease {
    Http1(PooledConnection),
    /// Shared HTTP/2 connection; each request opens its own stream.
    Http2 { handle: H2Handle, reused: bool },
}

impl Lease {
    pub fn is_reused(&self) -> bool {
        match self {
            Lease::Http1(conn) => conn.is_reused(),
            Lease::Http2 { reused, .. } => *reused,
        }
    }
}
