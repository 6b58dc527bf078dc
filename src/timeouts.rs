//! Timeout configuration and per-request deadlines.
//!
//! # Timeout Types
//!
//! - **total**: absolute deadline for a request, covering every redirect leg
//!   (pool wait, handshake, write, response head and buffered body)
//! - **connect**: cap on TCP + proxy + TLS setup, still bounded by total
//! - **read_idle**: maximum gap between body chunks of a streamed response
//! - **pool_acquire**: cap on waiting for a pooled connection slot
//!
//! # Usage
//!
//! ```rust,ignore
//! use guise::{Session, Timeouts};
//! use std::time::Duration;
//!
//! let session = Session::builder()
//!     .profile("chrome_131")
//!     .timeouts(Timeouts::api_defaults().total(Duration::from_secs(20)))
//!     .build()?;
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Per-phase request timeouts. `None` leaves a phase unbounded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Timeouts {
    /// Connection establishment (DNS + TCP + proxy + TLS).
    pub connect: Option<Duration>,

    /// Read idle timeout for streamed bodies. Resets on each chunk.
    pub read_idle: Option<Duration>,

    /// Absolute deadline for the whole request including redirects.
    ///
    /// For `stream(true)` responses the deadline also bounds body reads.
    pub total: Option<Duration>,

    /// Time waiting for a pooled connection slot.
    pub pool_acquire: Option<Duration>,
}

impl Timeouts {
    /// Every phase unbounded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults for ordinary API calls.
    ///
    /// - connect: 10s
    /// - read_idle: 30s
    /// - total: 30s
    /// - pool_acquire: 5s
    pub fn api_defaults() -> Self {
        Self {
            connect: Some(Duration::from_secs(10)),
            read_idle: Some(Duration::from_secs(30)),
            total: Some(Duration::from_secs(30)),
            pool_acquire: Some(Duration::from_secs(5)),
        }
    }

    /// Defaults for long-lived streamed responses: no total deadline, a
    /// generous idle timeout instead.
    pub fn streaming_defaults() -> Self {
        Self {
            connect: Some(Duration::from_secs(10)),
            read_idle: Some(Duration::from_secs(120)),
            total: None,
            pool_acquire: Some(Duration::from_secs(5)),
        }
    }

    pub fn connect(mut self, timeout: Duration) -> Self {
        self.connect = Some(timeout);
        self
    }

    pub fn read_idle(mut self, timeout: Duration) -> Self {
        self.read_idle = Some(timeout);
        self
    }

    pub fn total(mut self, timeout: Duration) -> Self {
        self.total = Some(timeout);
        self
    }

    pub fn pool_acquire(mut self, timeout: Duration) -> Self {
        self.pool_acquire = Some(timeout);
        self
    }

    /// Drop the overall deadline, e.g. for long downloads.
    pub fn no_total_timeout(mut self) -> Self {
        self.total = None;
        self
    }

    pub fn no_read_idle_timeout(mut self) -> Self {
        self.read_idle = None;
        self
    }
}

/// Absolute point in time shared by every phase of one request.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    started: Instant,
    at: Option<Instant>,
}

impl Deadline {
    /// Deadline `timeout` from now, or unbounded for `None`.
    pub fn after(timeout: Option<Duration>) -> Self {
        let started = Instant::now();
        Self {
            started,
            at: timeout.map(|t| started + t),
        }
    }

    pub fn unbounded() -> Self {
        Self::after(None)
    }

    /// A tighter deadline capped at `limit` from now.
    pub fn cap(&self, limit: Option<Duration>) -> Self {
        let capped = limit.map(|l| Instant::now() + l);
        let at = match (self.at, capped) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            started: self.started,
            at,
        }
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    /// Time left, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Run `fut` under this deadline; expiry maps to `Error::Timeout`.
    pub async fn run<T, F>(&self, phase: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.at {
            Some(at) => match tokio::time::timeout_at(at, fut).await {
                Ok(res) => res,
                Err(_) => Err(Error::timeout(phase, self.elapsed())),
            },
            None => fut.await,
        }
    }
}
