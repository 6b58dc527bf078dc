//! Sessions: a profile, a cookie jar, default headers and a connection
//! pool shared by every request issued through them.
//!
//! ```no_run
//! # async fn demo() -> guise::Result<()> {
//! let session = guise::Session::builder().profile("chrome_131").build()?;
//! let mut response = session.get("https://example.com/").send().await?;
//! response.raise_for_status()?;
//! println!("{}", response.text().await?);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use serde::Serialize;
use tokio::sync::mpsc;
use url::Url;

use crate::cookie::CookieJar;
use crate::encoding::ContentDecoder;
use crate::error::{Error, Result};
use crate::fingerprint::profiles::{catalog, Profile};
use crate::headers::Headers;
use crate::pool::{ConnectionPool, Lease, PoolConfig, PoolKey, PoolStats, Transport};
use crate::redirect::{self, DEFAULT_MAX_REDIRECTS};
use crate::request::{form_encode, json_encode, Body, Request};
use crate::response::{RedirectHop, Response};
use crate::timeouts::{Deadline, Timeouts};
use crate::transport::body::ResponseBody;
use crate::transport::h1::{expects_body, H1Body, H1Connection};
use crate::transport::tcp::TcpOptions;
use crate::transport::{h2, ClientIdentity, Connector, Proxy, RequestHead, Target, TlsOptions};

/// Profile used when none is named.
pub const DEFAULT_PROFILE: &str = "chrome_131";

/// HTTP client bound to one emulation profile.
///
/// Cheap to clone; clones share the cookie jar and the connection pool.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    profile: Arc<Profile>,
    connector: Connector,
    pool: ConnectionPool,
    /// Profile defaults overlaid with caller defaults, in profile order.
    headers: Headers,
    cookies: Mutex<CookieJar>,
    proxy: Option<Proxy>,
    timeouts: Timeouts,
    max_redirects: u32,
}

/// One leg of a request as it goes on the wire.
struct Leg {
    method: Method,
    url: Url,
    headers: Headers,
}

impl Session {
    /// Session with a built-in or registered profile and default settings.
    pub fn new(profile: &str) -> Result<Self> {
        Self::builder().profile(profile).build()
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn profile(&self) -> &Arc<Profile> {
        &self.inner.profile
    }

    /// Headers sent with every request unless overridden.
    pub fn default_headers(&self) -> &Headers {
        &self.inner.headers
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.inner.timeouts
    }

    /// Snapshot of the session cookie jar.
    pub fn cookies(&self) -> CookieJar {
        self.jar().clone()
    }

    /// Edit the session cookie jar in place.
    pub fn update_cookies<R>(&self, f: impl FnOnce(&mut CookieJar) -> R) -> R {
        f(&mut self.jar())
    }

    /// Write the jar in Netscape cookies.txt format.
    pub async fn save_cookies(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = self.cookies();
        snapshot.save_to_file(path).await
    }

    /// Merge cookies from a Netscape cookies.txt file; returns how many
    /// were read.
    pub async fn load_cookies(&self, path: impl AsRef<Path>) -> Result<usize> {
        let mut loaded = CookieJar::new();
        let count = loaded.load_from_file(path).await?;
        self.jar().merge(&loaded);
        Ok(count)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Drop idle pooled connections.
    pub fn clear_pool(&self) {
        self.inner.pool.clear();
    }

    fn jar(&self) -> MutexGuard<'_, CookieJar> {
        self.inner.cookies.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        RequestBuilder {
            session: self.clone(),
            request: Url::parse(url)
                .map_err(Error::from)
                .map(|url| Request::new(method, url)),
        }
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: &str) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    pub fn patch(&self, url: &str) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    pub fn delete(&self, url: &str) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    pub fn head(&self, url: &str) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    pub fn options(&self, url: &str) -> RequestBuilder {
        self.request(Method::OPTIONS, url)
    }

    /// Send `request`, following redirects unless it opts out.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let Request {
            method,
            url,
            headers,
            mut body,
            timeout,
            proxy,
            allow_redirects,
            max_redirects,
            stream,
        } = request;
        let deadline = Deadline::after(timeout.or(self.inner.timeouts.total));
        let max_redirects = max_redirects.unwrap_or(self.inner.max_redirects);
        let proxy = proxy.as_ref().or(self.inner.proxy.as_ref());

        let mut leg = Leg { method, url, headers };
        let mut history: Vec<RedirectHop> = Vec::new();
        let mut cookies = CookieJar::new();

        loop {
            let replay = if allow_redirects { body.try_clone() } else { None };
            let mut response = self
                .send_leg(&leg, std::mem::take(&mut body), proxy, &deadline, &mut cookies)
                .await?;

            let plan = if allow_redirects {
                redirect::plan(response.status_code(), &leg.method, &leg.url, response.headers())?
            } else {
                None
            };
            let Some(plan) = plan else {
                response.set_history(history);
                if !stream {
                    response.buffer().await?;
                }
                return Ok(response);
            };

            if history.len() as u32 >= max_redirects {
                tracing::debug!(max = max_redirects, url = %leg.url, "redirect limit reached");
                return Err(Error::TooManyRedirects { max: max_redirects });
            }
            // Drain so the connection goes back to the pool; a broken body
            // only costs the connection.
            if let Err(e) = response.buffer().await {
                tracing::debug!(error = %e, "discarding redirect body");
            }

            body = if plan.keep_body {
                replay.ok_or_else(|| {
                    Error::InvalidRedirect(format!(
                        "{} redirect needs the request body again, but a streamed body cannot be replayed",
                        response.status_code()
                    ))
                })?
            } else {
                Body::Empty
            };
            tracing::debug!(
                status = response.status_code(),
                from = %leg.url,
                to = %plan.url,
                method = %plan.method,
                "following redirect"
            );
            history.push(RedirectHop {
                status: response.status_code(),
                url: leg.url.clone(),
                headers: response.headers().clone(),
            });
            redirect::rewrite_headers(&mut leg.headers, &leg.url, &plan);
            leg.url = plan.url;
            leg.method = plan.method;
        }
    }

    /// Issue one leg: acquire a connection, send, read the head.
    async fn send_leg(
        &self,
        leg: &Leg,
        body: Body,
        proxy: Option<&Proxy>,
        deadline: &Deadline,
        cookies: &mut CookieJar,
    ) -> Result<Response> {
        let inner = &self.inner;
        let target = Target::from_url(&leg.url)?;
        let headers = self.leg_headers(leg, &target, &body);
        let absolute_form = proxy.is_some_and(|p| p.forwards_plain_http(target.scheme.as_str()));
        let proxy_authorization = if absolute_form {
            proxy.and_then(Proxy::basic_auth)
        } else {
            None
        };
        let head = RequestHead {
            method: &leg.method,
            url: &leg.url,
            target: &target,
            headers: &headers,
            absolute_form,
            proxy_authorization: proxy_authorization.as_deref(),
        };

        let key = PoolKey::new(target.clone(), &inner.profile.name, proxy);
        let lease = inner
            .pool
            .acquire(&key, deadline, inner.timeouts.pool_acquire, || {
                self.dial(&target, proxy, deadline)
            })
            .await?;
        let reused = lease.is_reused();
        tracing::debug!(method = %leg.method, url = %leg.url, reused, "sending request");

        let read_idle = inner.timeouts.read_idle;
        let (status, version, response_headers, body) = match lease {
            Lease::Http1(mut conn) => {
                let (response_head, framing, keep_alive) = deadline
                    .run("request", async {
                        let io = conn.io()?;
                        io.write_request(&head, body).await?;
                        io.read_response_head(&leg.method).await
                    })
                    .await?;
                let decoder = ContentDecoder::from_headers(&response_head.headers)?;
                let body = ResponseBody::http1(H1Body::new(conn, framing, keep_alive), decoder, read_idle, *deadline);
                (response_head.status, response_head.version, response_head.headers, body)
            }
            Lease::Http2 { handle, .. } => {
                let (response_head, stream) = deadline.run("request", handle.send_request(&head, body)).await?;
                let decoder = ContentDecoder::from_headers(&response_head.headers)?;
                let body = ResponseBody::http2(stream, decoder, read_idle, *deadline);
                (response_head.status, response_head.version, response_head.headers, body)
            }
        };
        tracing::debug!(status, %version, url = %leg.url, "response head");

        if self.jar().store_from_headers(&response_headers, &leg.url) > 0 {
            cookies.store_from_headers(&response_headers, &leg.url);
        }

        Ok(Response::new(
            status,
            version,
            response_headers,
            leg.url.clone(),
            cookies.clone(),
            body,
        ))
    }

    /// Session defaults, then the request's headers, then the jar's
    /// `Cookie` and the framing headers, all in profile header order.
    /// HTTP/2 drops the connection-specific ones again.
    fn leg_headers(&self, leg: &Leg, target: &Target, body: &Body) -> Headers {
        let mut headers = self.inner.headers.clone();
        headers.merge(&leg.headers);
        let mut cookie: Vec<String> = headers.get_all("cookie").into_iter().map(str::to_string).collect();
        cookie.extend(self.jar().cookie_header(&leg.url));
        headers.remove("cookie");
        if !cookie.is_empty() {
            headers.append("Cookie", cookie.join("; "));
        }
        if !headers.contains("host") {
            headers.append("Host", target.host_header());
        }
        if !headers.contains("connection") {
            headers.append("Connection", "keep-alive");
        }
        if !headers.contains("content-length") && !headers.contains("transfer-encoding") {
            match body.len() {
                Some(0) if !expects_body(&leg.method) => {}
                Some(n) => headers.append("Content-Length", n.to_string()),
                None => {}
            }
        }
        headers.sort_by_order(&self.inner.profile.header_order);
        headers
    }

    async fn dial(&self, target: &Target, proxy: Option<&Proxy>, deadline: &Deadline) -> Result<Transport> {
        let connect_deadline = deadline.cap(self.inner.timeouts.connect);
        let stream = self.inner.connector.connect(target, proxy, &connect_deadline).await?;
        if stream.is_h2() {
            let handle = connect_deadline
                .run("http2 handshake", h2::handshake(stream, &self.inner.profile.http2))
                .await?;
            Ok(Transport::Http2(handle))
        } else {
            Ok(Transport::Http1(H1Connection::new(stream)))
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("profile", &self.inner.profile.name)
            .field("proxy", &self.inner.proxy)
            .field("pool", &self.inner.pool)
            .finish()
    }
}

enum ProfileChoice {
    Named(String),
    Custom(Box<Profile>),
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    profile: ProfileChoice,
    headers: Headers,
    proxy: Option<String>,
    tls: TlsOptions,
    tcp: TcpOptions,
    timeouts: Timeouts,
    max_redirects: u32,
    pool: PoolConfig,
    cookies: CookieJar,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            profile: ProfileChoice::Named(DEFAULT_PROFILE.to_string()),
            headers: Headers::new(),
            proxy: None,
            tls: TlsOptions::default(),
            tcp: TcpOptions::default(),
            timeouts: Timeouts::api_defaults(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            pool: PoolConfig::default(),
            cookies: CookieJar::new(),
        }
    }

    /// Profile by catalog name.
    pub fn profile(mut self, name: impl Into<String>) -> Self {
        self.profile = ProfileChoice::Named(name.into());
        self
    }

    /// Use a profile that is not in the catalog.
    pub fn custom_profile(mut self, profile: Profile) -> Self {
        self.profile = ProfileChoice::Custom(Box::new(profile));
        self
    }

    /// Default header; replaces the profile's value for the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers.merge(&headers);
        self
    }

    /// `http://`, `socks5://` or `socks5h://` proxy URL, with optional
    /// credentials.
    pub fn proxy(mut self, url: impl Into<String>) -> Self {
        self.proxy = Some(url.into());
        self
    }

    /// Skip certificate and hostname verification.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.tls.insecure = insecure;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Total deadline per request, redirects included.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.total = Some(timeout);
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool = config;
        self
    }

    /// Trust an extra root certificate (PEM or DER).
    pub fn add_root_certificate(mut self, cert: impl Into<Vec<u8>>) -> Self {
        self.tls.extra_roots.push(cert.into());
        self
    }

    /// Present a client certificate (PEM certificate and key).
    pub fn client_certificate(mut self, cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        self.tls.identity = Some(ClientIdentity::from_pem(cert_pem, key_pem));
        self
    }

    /// Offer only HTTP/1.1 in ALPN.
    pub fn http1_only(mut self, http1_only: bool) -> Self {
        self.tls.http1_only = http1_only;
        self
    }

    /// Start from an existing jar.
    pub fn cookie_jar(mut self, jar: CookieJar) -> Self {
        self.cookies = jar;
        self
    }

    pub fn tcp_options(mut self, options: TcpOptions) -> Self {
        self.tcp = options;
        self
    }

    pub fn build(self) -> Result<Session> {
        let profile = match self.profile {
            ProfileChoice::Named(name) => catalog().get(&name)?,
            ProfileChoice::Custom(profile) => {
                profile.validate()?;
                Arc::new(*profile)
            }
        };
        let proxy = self.proxy.as_deref().map(Proxy::parse).transpose()?;
        let connector = Connector::new(Arc::clone(&profile), self.tls, self.tcp)?;

        let mut headers = profile.default_headers();
        headers.merge(&self.headers);
        headers.sort_by_order(&profile.header_order);

        tracing::debug!(
            profile = %profile.name,
            ja3 = %profile.ja3_hash(),
            proxy = ?proxy,
            "session created"
        );
        Ok(Session {
            inner: Arc::new(SessionInner {
                profile,
                connector,
                pool: ConnectionPool::new(self.pool),
                headers,
                cookies: Mutex::new(self.cookies),
                proxy,
                timeouts: self.timeouts,
                max_redirects: self.max_redirects,
            }),
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A request being assembled; errors surface from [`send`](Self::send).
pub struct RequestBuilder {
    session: Session,
    request: Result<Request>,
}

impl RequestBuilder {
    fn with(mut self, f: impl FnOnce(&mut Request) -> Result<()>) -> Self {
        if let Ok(request) = &mut self.request {
            if let Err(e) = f(request) {
                self.request = Err(e);
            }
        }
        self
    }

    /// A `Cookie` set here is sent ahead of the jar's cookies and kept on
    /// same-origin redirects. It is never stored in the jar.
    pub fn header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(|r| {
            r.headers.insert(name, value);
            Ok(())
        })
    }

    pub fn headers(self, headers: Headers) -> Self {
        self.with(|r| {
            r.headers.merge(&headers);
            Ok(())
        })
    }

    pub fn body(self, body: impl Into<Body>) -> Self {
        self.with(|r| {
            r.body = body.into();
            Ok(())
        })
    }

    /// Body produced chunk by chunk; sent chunked on HTTP/1.1.
    pub fn body_stream(self, chunks: mpsc::Receiver<Bytes>) -> Self {
        self.with(|r| {
            r.body = Body::Stream(chunks);
            Ok(())
        })
    }

    /// URL-encoded form body.
    pub fn form<K: AsRef<str>, V: AsRef<str>>(self, pairs: &[(K, V)]) -> Self {
        let encoded = form_encode(pairs);
        self.with(|r| {
            if !r.headers.contains("content-type") {
                r.headers.insert("Content-Type", "application/x-www-form-urlencoded");
            }
            r.body = Body::from(encoded);
            Ok(())
        })
    }

    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Self {
        let encoded = json_encode(value);
        self.with(|r| {
            if !r.headers.contains("content-type") {
                r.headers.insert("Content-Type", "application/json");
            }
            r.body = Body::Bytes(encoded?);
            Ok(())
        })
    }

    /// Deadline for this request, replacing the session's total timeout.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.with(|r| {
            r.timeout = Some(timeout);
            Ok(())
        })
    }

    pub fn proxy(self, url: &str) -> Self {
        self.with(|r| {
            r.proxy = Some(Proxy::parse(url)?);
            Ok(())
        })
    }

    pub fn allow_redirects(self, allow: bool) -> Self {
        self.with(|r| {
            r.allow_redirects = allow;
            Ok(())
        })
    }

    pub fn max_redirects(self, max: u32) -> Self {
        self.with(|r| {
            r.max_redirects = Some(max);
            Ok(())
        })
    }

    /// Leave the body on the connection until it is read.
    pub fn stream(self, stream: bool) -> Self {
        self.with(|r| {
            r.stream = stream;
            Ok(())
        })
    }

    pub fn build(self) -> Result<Request> {
        self.request
    }

    pub async fn send(self) -> Result<Response> {
        let request = self.request?;
        self.session.execute(request).await
    }
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder").field("request", &self.request).finish()
    }
}
