//! # guise
//!
//! HTTP client that presents the TLS and HTTP/2 fingerprint of a chosen
//! browser or client library.
//!
//! A [`Session`] is bound to one [`Profile`]: the profile decides the
//! ClientHello (cipher suites, extension order, groups, GREASE), the ALPN
//! offer, the HTTP/2 SETTINGS and pseudo-header order, and the default
//! request headers and their order. HTTP/1.1 and HTTP/2 run over BoringSSL
//! with pooled connections, cookie persistence, redirects and streaming
//! bodies.
//!
//! ```no_run
//! # async fn demo() -> guise::Result<()> {
//! let session = guise::Session::new("firefox_133")?;
//! let mut response = session
//!     .post("https://httpbin.org/post")
//!     .json(&serde_json::json!({ "hello": "world" }))
//!     .send()
//!     .await?;
//! let mut lines = response.iter_lines(1024, None)?;
//! while let Some(line) = lines.next().await? {
//!     println!("{line}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod cookie;
pub mod encoding;
pub mod error;
pub mod fingerprint;
pub mod headers;
pub mod pool;
pub mod redirect;
pub mod request;
pub mod response;
pub mod session;
pub mod status;
pub mod stream;
pub mod timeouts;
pub mod transport;
pub mod version;

pub use cookie::{Cookie, CookieJar};
pub use error::{Error, Result};
pub use fingerprint::{catalog, Profile};
pub use headers::Headers;
pub use http::Method;
pub use pool::{PoolConfig, PoolOverflow, PoolStats};
pub use request::{Body, Request};
pub use response::{RedirectHop, Response};
pub use session::{RequestBuilder, Session, SessionBuilder};
pub use stream::{ChunkStream, LineStream};
pub use timeouts::Timeouts;
pub use transport::Proxy;
pub use version::HttpVersion;
