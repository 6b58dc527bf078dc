//! Error types for guise.

use std::io;
use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while issuing fingerprinted requests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// TLS handshake failed (certificate, protocol mismatch, alert).
    #[error("TLS handshake with {host} failed: {cause}")]
    TlsHandshake { host: String, cause: String },

    /// Transport-level failure: reset, short read, write failure, peer close.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed HTTP framing from the peer.
    #[error("HTTP protocol error: {0}")]
    HttpProtocol(String),

    /// HTTP status error raised by `Response::raise_for_status`.
    #[error("{status} {class} Error: {reason} for url: {url}")]
    HttpStatus {
        status: u16,
        class: &'static str,
        reason: &'static str,
        url: String,
    },

    /// Redirect chain exceeded the configured maximum.
    #[error("Exceeded {max} redirects")]
    TooManyRedirects { max: u32 },

    /// Invalid redirect target or non-replayable redirect.
    #[error("Invalid redirect: {0}")]
    InvalidRedirect(String),

    /// Body was already drained and released.
    #[error("The content for this response was already consumed")]
    ContentConsumed,

    /// Request deadline exceeded during the named phase.
    #[error("Operation timed out during {phase} after {elapsed:?}")]
    Timeout { phase: &'static str, elapsed: Duration },

    /// Pool acquire timeout (no connection slot became available).
    #[error("Pool acquire timeout after {0:?} - no connections available")]
    PoolAcquireTimeout(Duration),

    /// Profile name not present in the catalog.
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    /// Profile name already registered.
    #[error("Profile already registered: {0}")]
    DuplicateProfile(String),

    /// Proxy URL or proxy handshake failure.
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// TLS context construction error (not a handshake failure).
    #[error("TLS error: {0}")]
    Tls(String),

    /// Cookie parsing error.
    #[error("Cookie parse error: {0}")]
    CookieParse(String),

    /// Decompression error.
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Request could not be built (bad header, unsupported URL).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create a TLS handshake error.
    pub fn tls_handshake(host: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::TlsHandshake {
            host: host.into(),
            cause: cause.to_string(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create an HTTP protocol error.
    pub fn http_protocol(message: impl Into<String>) -> Self {
        Self::HttpProtocol(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(phase: &'static str, elapsed: Duration) -> Self {
        Self::Timeout { phase, elapsed }
    }

    /// Create a TLS configuration error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create a proxy error.
    pub fn proxy(message: impl Into<String>) -> Self {
        Self::Proxy(message.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Malformed JSON or malformed HTTP framing.
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Json(_) | Self::HttpProtocol(_))
    }

    /// Any deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::PoolAcquireTimeout(_))
    }

    /// Failures after which the connection must not be reused.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::HttpProtocol(_)
                | Self::Timeout { .. }
                | Self::Io(_)
                | Self::TlsHandshake { .. }
        )
    }

    /// Status code carried by an `HttpStatus` error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
