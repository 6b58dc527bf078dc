//! HTTP version of a connection or response.

use std::fmt;

/// Protocol negotiated for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HttpVersion {
    /// Only ever seen on responses; requests are always sent as HTTP/1.1.
    Http1_0,
    #[default]
    Http1_1,
    Http2,
}

impl HttpVersion {
    /// Get human-readable version string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http1_0 => "HTTP/1.0",
            Self::Http1_1 => "HTTP/1.1",
            Self::Http2 => "HTTP/2",
        }
    }

    /// Version selected by a negotiated ALPN protocol id; no ALPN means HTTP/1.1.
    pub fn from_alpn(alpn: Option<&[u8]>) -> Self {
        match alpn {
            Some(b"h2") => Self::Http2,
            _ => Self::Http1_1,
        }
    }

    /// Check if this version supports multiplexing.
    pub fn supports_multiplexing(&self) -> bool {
        matches!(self, Self::Http2)
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
