//! Network transport: dialing, TLS, and the HTTP/1.1 and HTTP/2 wire
//! protocols.

pub mod body;
pub mod connector;
pub mod h1;
pub mod h2;
pub mod proxy;
pub mod session_cache;
pub mod tcp;

use std::fmt;

use http::Method;
use url::Url;

use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::version::HttpVersion;

pub use connector::{AlpnProtocol, ClientIdentity, Connector, MaybeHttpsStream, TlsOptions};
pub use proxy::{Proxy, ProxyScheme};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

/// Origin a connection is made to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn from_url(url: &Url) -> Result<Self> {
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => return Err(Error::invalid_request(format!("unsupported URL scheme {other:?}"))),
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::invalid_request(format!("URL {url} has no host")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_ascii_lowercase();
        Ok(Self {
            scheme,
            port: url.port().unwrap_or(scheme.default_port()),
            host,
        })
    }

    pub fn is_https(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// `Host` header value: port omitted when it is the scheme default.
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.host_header())
    }
}

/// Everything but the body of an outgoing request, headers already in
/// wire order.
#[derive(Debug, Clone, Copy)]
pub struct RequestHead<'a> {
    pub method: &'a Method,
    pub url: &'a Url,
    pub target: &'a Target,
    pub headers: &'a Headers,
    /// Absolute-form request target, for plain-http requests sent to an
    /// HTTP proxy.
    pub absolute_form: bool,
    pub proxy_authorization: Option<&'a str>,
}

impl RequestHead<'_> {
    /// Path and query, `/` when empty.
    pub fn path(&self) -> String {
        let mut path = self.url.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = self.url.query() {
            path.push('?');
            path.push_str(query);
        }
        path
    }

    /// Request target as written on an HTTP/1.1 request line.
    pub fn request_target(&self) -> String {
        if self.absolute_form {
            let mut url = self.url.clone();
            url.set_fragment(None);
            url.to_string()
        } else {
            self.path()
        }
    }
}

/// Status line and headers of a final response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub version: HttpVersion,
    pub headers: Headers,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_url() {
        let t = Target::from_url(&Url::parse("https://Example.COM/path").unwrap()).unwrap();
        assert_eq!(t.scheme, Scheme::Https);
        assert_eq!(t.host, "example.com");
        assert_eq!(t.port, 443);
        assert_eq!(t.host_header(), "example.com");

        let t = Target::from_url(&Url::parse("http://[::1]:8080/").unwrap()).unwrap();
        assert_eq!(t.host, "::1");
        assert_eq!(t.host_header(), "[::1]:8080");
        assert_eq!(t.to_string(), "http://[::1]:8080");
    }

    #[test]
    fn test_request_target_forms() {
        let url = Url::parse("http://example.com/a/b?x=1#frag").unwrap();
        let target = Target::from_url(&url).unwrap();
        let headers = Headers::new();
        let mut head = RequestHead {
            method: &Method::GET,
            url: &url,
            target: &target,
            headers: &headers,
            absolute_form: false,
            proxy_authorization: None,
        };
        assert_eq!(head.request_target(), "/a/b?x=1");
        head.absolute_form = true;
        assert_eq!(head.request_target(), "http://example.com/a/b?x=1");
    }

    #[test]
    fn test_target_rejects_other_schemes() {
        let err = Target::from_url(&Url::parse("ftp://example.com/").unwrap()).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
