//! BoringSSL handshake engine.
//!
//! A [`Connector`] owns one `SslConnector` built from a profile's TLS
//! parameters and reuses it for every handshake of a session. Sessions
//! handed out by servers are cached per host and offered on the next
//! handshake.
//!
//! BoringSSL picks the extension order itself; with the stock bindings the
//! profile's cipher order, groups, signature algorithms, ALPN, GREASE,
//! permutation, certificate compression and version range are applied.
//! [`crate::fingerprint::ClientHelloEncoder`] renders the exact hello for
//! inspection.

use std::io::{self, Read};
use std::mem::MaybeUninit;
use std::os::raw::c_int;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use boring::pkey::PKey;
use boring::ssl::{
    NameType, SslConnector, SslMethod, SslOptions, SslSession, SslSessionCacheMode, SslVerifyMode,
};
use boring::x509::X509;
use boring_sys::{CRYPTO_BUFFER, SSL, SSL_CTX};
use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring::SslStream;

use super::proxy::Proxy;
use super::session_cache::SessionCache;
use super::tcp::{self, TcpOptions};
use super::Target;
use crate::error::{Error, Result};
use crate::fingerprint::tls::{self as tlsp, ext, group, CertCompression};
use crate::fingerprint::Profile;
use crate::timeouts::Deadline;
use crate::version::HttpVersion;

extern "C" {
    /// Enable GREASE (RFC 8701) values in the ClientHello.
    pub fn SSL_CTX_set_grease_enabled(ctx: *mut SSL_CTX, enabled: c_int) -> c_int;
    /// Randomize extension order per connection (Chrome 110+ behavior).
    pub fn SSL_CTX_set_permute_extensions(ctx: *mut SSL_CTX, enabled: c_int) -> c_int;
}

/// Copy a decompressed certificate into a new `CRYPTO_BUFFER`.
unsafe fn emit_buffer(out: *mut *mut CRYPTO_BUFFER, data: &[u8], expected: usize) -> c_int {
    if data.len() != expected {
        return 0;
    }
    let buffer = boring_sys::CRYPTO_BUFFER_new(data.as_ptr(), data.len(), std::ptr::null_mut());
    if buffer.is_null() {
        return 0;
    }
    *out = buffer;
    1
}

unsafe extern "C" fn decompress_brotli_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    let mut decompressed = Vec::with_capacity(uncompressed_len);
    let mut decoder = brotli::Decompressor::new(compressed, 4096);
    match decoder.read_to_end(&mut decompressed) {
        Ok(_) => emit_buffer(out, &decompressed, uncompressed_len),
        Err(_) => 0,
    }
}

unsafe extern "C" fn decompress_zlib_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    let mut decompressed = Vec::with_capacity(uncompressed_len);
    let mut decoder = flate2::read::ZlibDecoder::new(compressed);
    match decoder.read_to_end(&mut decompressed) {
        Ok(_) => emit_buffer(out, &decompressed, uncompressed_len),
        Err(_) => 0,
    }
}

unsafe extern "C" fn decompress_zstd_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    match zstd::bulk::decompress(compressed, uncompressed_len) {
        Ok(decompressed) => emit_buffer(out, &decompressed, uncompressed_len),
        Err(_) => 0,
    }
}

/// PEM client certificate and private key for mutual TLS.
#[derive(Clone)]
pub struct ClientIdentity {
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
}

impl ClientIdentity {
    pub fn from_pem(cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
        }
    }
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity").finish_non_exhaustive()
    }
}

/// Session-wide TLS settings layered over the profile.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Skip chain and hostname verification.
    pub insecure: bool,
    /// Extra trust anchors (PEM or DER) on top of the system store.
    pub extra_roots: Vec<Vec<u8>>,
    pub identity: Option<ClientIdentity>,
    /// Offer only `http/1.1` in ALPN.
    pub http1_only: bool,
}

/// Negotiated ALPN protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlpnProtocol {
    H2,
    Http1,
    /// Plain TCP, or no ALPN agreed.
    Unknown,
}

impl AlpnProtocol {
    pub fn is_h2(&self) -> bool {
        matches!(self, Self::H2)
    }

    pub fn http_version(&self) -> HttpVersion {
        match self {
            Self::H2 => HttpVersion::Http2,
            _ => HttpVersion::Http1_1,
        }
    }
}

/// Plain TCP or TLS over TCP.
#[derive(Debug)]
pub enum MaybeHttpsStream {
    Http(TcpStream),
    Https(SslStream<TcpStream>),
}

impl MaybeHttpsStream {
    pub fn alpn_protocol(&self) -> AlpnProtocol {
        match self {
            MaybeHttpsStream::Http(_) => AlpnProtocol::Unknown,
            MaybeHttpsStream::Https(stream) => match stream.ssl().selected_alpn_protocol() {
                Some(b"h2") => AlpnProtocol::H2,
                Some(b"http/1.1") => AlpnProtocol::Http1,
                _ => AlpnProtocol::Unknown,
            },
        }
    }

    pub fn is_h2(&self) -> bool {
        self.alpn_protocol().is_h2()
    }

    fn tcp(&self) -> &TcpStream {
        match self {
            MaybeHttpsStream::Http(stream) => stream,
            MaybeHttpsStream::Https(stream) => stream.get_ref(),
        }
    }

    /// Whether an idle connection can still carry a request.
    ///
    /// Peeks the socket without blocking: pending bytes or EOF on an idle
    /// connection mean the peer closed it or sent something unsolicited.
    pub fn is_open(&self) -> bool {
        let mut probe = [MaybeUninit::<u8>::uninit(); 1];
        match SockRef::from(self.tcp()).peek(&mut probe) {
            Err(e) => e.kind() == io::ErrorKind::WouldBlock,
            Ok(_) => false,
        }
    }
}

impl AsyncRead for MaybeHttpsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeHttpsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_flush(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// ALPN protocols offered for `profile`.
pub fn alpn_for(profile: &Profile, http1_only: bool) -> Vec<String> {
    if http1_only {
        return vec!["http/1.1".to_string()];
    }
    profile
        .tls
        .alpn
        .iter()
        .filter(|p| p.as_str() == "h2" || p.as_str() == "http/1.1")
        .cloned()
        .collect()
}

/// Fingerprinted TLS dialer for one profile.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

struct ConnectorInner {
    profile: Arc<Profile>,
    options: TlsOptions,
    tcp: TcpOptions,
    ssl: SslConnector,
    sessions: SessionCache<SslSession>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("profile", &self.inner.profile.name)
            .field("insecure", &self.inner.options.insecure)
            .finish_non_exhaustive()
    }
}

impl Connector {
    pub fn new(profile: Arc<Profile>, options: TlsOptions, tcp: TcpOptions) -> Result<Self> {
        let sessions = SessionCache::new();
        let ssl = configure_ssl(&profile, &options, &sessions)?;
        Ok(Self {
            inner: Arc::new(ConnectorInner {
                profile,
                options,
                tcp,
                ssl,
                sessions,
            }),
        })
    }

    pub fn profile(&self) -> &Arc<Profile> {
        &self.inner.profile
    }

    pub fn http1_only(&self) -> bool {
        self.inner.options.http1_only
    }

    /// Cached TLS sessions, one per host.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Dial `target` (directly or through `proxy`) and run the TLS
    /// handshake for https targets. Both phases observe `deadline`.
    pub async fn connect(
        &self,
        target: &Target,
        proxy: Option<&Proxy>,
        deadline: &Deadline,
    ) -> Result<MaybeHttpsStream> {
        let tcp = deadline
            .run("connect", async {
                match proxy {
                    Some(proxy) => {
                        proxy
                            .dial(&target.host, target.port, target.scheme.as_str(), &self.inner.tcp)
                            .await
                    }
                    None => tcp::dial(&target.host, target.port, &self.inner.tcp).await,
                }
            })
            .await?;

        if !target.is_https() {
            return Ok(MaybeHttpsStream::Http(tcp));
        }
        deadline
            .run("tls handshake", self.handshake(&target.host, tcp))
            .await
            .map(MaybeHttpsStream::Https)
    }

    async fn handshake(&self, host: &str, tcp: TcpStream) -> Result<SslStream<TcpStream>> {
        let mut config = self
            .inner
            .ssl
            .configure()
            .map_err(|e| Error::tls(format!("failed to configure SSL: {e}")))?;
        if self.inner.options.insecure {
            config.set_verify_hostname(false);
        }
        if let Some(session) = self.inner.sessions.get(host) {
            // The session came from this context, so offering it back is sound.
            if let Err(e) = unsafe { config.set_session(&session) } {
                tracing::debug!(host, error = %e, "could not offer cached TLS session");
            }
        }

        let stream = tokio_boring::connect(config, host, tcp)
            .await
            .map_err(|e| Error::tls_handshake(host, e))?;

        let profile = &self.inner.profile;
        tracing::debug!(
            host,
            profile = %profile.name,
            ja3 = %profile.ja3_hash(),
            alpn = ?stream.ssl().selected_alpn_protocol().map(String::from_utf8_lossy),
            resumed = stream.ssl().session_reused(),
            "tls handshake complete"
        );
        Ok(stream)
    }
}

fn configure_ssl(
    profile: &Profile,
    options: &TlsOptions,
    sessions: &SessionCache<SslSession>,
) -> Result<SslConnector> {
    let spec = &profile.tls;
    let mut builder = SslConnector::builder(SslMethod::tls_client())
        .map_err(|e| Error::tls(format!("failed to create SSL connector: {e}")))?;

    for root in &options.extra_roots {
        let certs = match X509::from_der(root) {
            Ok(cert) => vec![cert],
            Err(_) => X509::stack_from_pem(root)
                .map_err(|e| Error::tls(format!("invalid root certificate: {e}")))?,
        };
        for cert in certs {
            builder
                .cert_store_mut()
                .add_cert(cert)
                .map_err(|e| Error::tls(format!("failed to add root certificate: {e}")))?;
        }
    }

    if let Some(identity) = &options.identity {
        let cert = X509::from_pem(&identity.cert_pem)
            .map_err(|e| Error::tls(format!("invalid client certificate: {e}")))?;
        let key = PKey::private_key_from_pem(&identity.key_pem)
            .map_err(|e| Error::tls(format!("invalid client key: {e}")))?;
        builder
            .set_certificate(&cert)
            .map_err(|e| Error::tls(format!("failed to set client certificate: {e}")))?;
        builder
            .set_private_key(&key)
            .map_err(|e| Error::tls(format!("failed to set client key: {e}")))?;
    }

    if options.insecure {
        builder.set_verify(SslVerifyMode::NONE);
    }

    let tls12: Vec<u16> = spec
        .cipher_suites
        .iter()
        .copied()
        .filter(|&id| !tlsp::is_tls13_cipher(id))
        .collect();
    let (ciphers, skipped) = tlsp::boring_list(&tls12, tlsp::cipher_name);
    if !skipped.is_empty() {
        tracing::debug!(profile = %profile.name, ?skipped, "cipher suites not expressible");
    }
    if !ciphers.is_empty() {
        builder
            .set_cipher_list(&ciphers)
            .map_err(|e| Error::tls(format!("failed to set cipher list: {e}")))?;
    }

    let (curves, skipped) = tlsp::boring_list(&spec.supported_groups, tlsp::group_name);
    if !skipped.is_empty() {
        tracing::debug!(profile = %profile.name, ?skipped, "groups not expressible");
    }
    if !curves.is_empty() && builder.set_curves_list(&curves).is_err() {
        let classical: Vec<u16> = spec
            .supported_groups
            .iter()
            .copied()
            .filter(|&g| g != group::X25519_MLKEM768 && g != group::X25519_KYBER768_DRAFT00)
            .collect();
        let (curves, _) = tlsp::boring_list(&classical, tlsp::group_name);
        tracing::warn!(profile = %profile.name, "post-quantum groups unavailable, offering {curves}");
        builder
            .set_curves_list(&curves)
            .map_err(|e| Error::tls(format!("failed to set groups: {e}")))?;
    }

    let (sigalgs, _) = tlsp::boring_list(&spec.signature_algorithms, tlsp::sigalg_name);
    if !sigalgs.is_empty() {
        builder
            .set_sigalgs_list(&sigalgs)
            .map_err(|e| Error::tls(format!("failed to set signature algorithms: {e}")))?;
    }

    builder
        .set_min_proto_version(Some(spec.min_version.to_boring()))
        .map_err(|e| Error::tls(format!("failed to set min TLS version: {e}")))?;
    builder
        .set_max_proto_version(Some(spec.max_version.to_boring()))
        .map_err(|e| Error::tls(format!("failed to set max TLS version: {e}")))?;

    if !spec.extensions.contains(&ext::SESSION_TICKET) {
        builder.set_options(SslOptions::NO_TICKET);
    }

    unsafe {
        let ctx = builder.as_ptr() as *mut SSL_CTX;
        SSL_CTX_set_grease_enabled(ctx, c_int::from(spec.grease));
        SSL_CTX_set_permute_extensions(ctx, c_int::from(spec.permute_extensions));

        if spec.extensions.contains(&ext::STATUS_REQUEST) {
            boring_sys::SSL_CTX_enable_ocsp_stapling(ctx);
        }
        if spec.extensions.contains(&ext::SIGNED_CERTIFICATE_TIMESTAMP) {
            boring_sys::SSL_CTX_enable_signed_cert_timestamps(ctx);
        }

        // Clients only ever decompress.
        for alg in &spec.cert_compression {
            let decompress: boring_sys::ssl_cert_decompression_func_t = match alg {
                CertCompression::Brotli => Some(decompress_brotli_cert),
                CertCompression::Zlib => Some(decompress_zlib_cert),
                CertCompression::Zstd => Some(decompress_zstd_cert),
            };
            if boring_sys::SSL_CTX_add_cert_compression_alg(ctx, alg.id(), None, decompress) != 1 {
                tracing::debug!(profile = %profile.name, ?alg, "certificate compression not registered");
            }
        }
    }

    let alpn = alpn_for(profile, options.http1_only);
    if !alpn.is_empty() {
        builder
            .set_alpn_protos(&tlsp::alpn_wire(&alpn))
            .map_err(|e| Error::tls(format!("failed to set ALPN: {e}")))?;
    }

    builder.set_session_cache_mode(SslSessionCacheMode::CLIENT);
    let cache = sessions.clone();
    builder.set_new_session_callback(move |ssl, session| {
        if let Some(host) = ssl.servername(NameType::HOST_NAME) {
            tracing::trace!(host, "caching TLS session");
            cache.store(host, session);
        }
    });

    Ok(builder.build())
}
