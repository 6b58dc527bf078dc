use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use boring::ssl::SslAcceptor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

/// A request as the mock server saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Request target exactly as sent (origin-form or absolute-form).
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Index of the accepted connection that carried this request.
    pub connection: usize,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Header names in wire order, lowercased.
    pub fn header_names(&self) -> Vec<String> {
        self.headers.iter().map(|(n, _)| n.to_ascii_lowercase()).collect()
    }

    pub fn path(&self) -> &str {
        match self.target.find("://") {
            Some(scheme_end) => {
                let rest = &self.target[scheme_end + 3..];
                rest.find('/').map_or("/", |i| &rest[i..])
            }
            None => &self.target,
        }
    }
}

/// Scripted response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    raw: Option<Vec<u8>>,
}

impl MockResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::status(200).body(body)
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            raw: None,
        }
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::status(status).header("Location", location)
    }

    /// Bytes written verbatim, framing included.
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            raw: Some(bytes.into()),
            ..Self::status(200)
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    fn to_bytes(&self) -> Vec<u8> {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }
        let mut out = format!("HTTP/1.1 {} Mock\r\n", self.status).into_bytes();
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", self.body.len()).as_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    fn closes(&self) -> bool {
        if let Some(raw) = &self.raw {
            return raw.windows(17).any(|w| w.eq_ignore_ascii_case(b"connection: close"));
        }
        self.headers
            .iter()
            .any(|(n, v)| n.eq_ignore_ascii_case("connection") && v.eq_ignore_ascii_case("close"))
    }
}

type Handler = Arc<dyn Fn(&RecordedRequest) -> MockResponse + Send + Sync>;

#[derive(Clone, Default)]
struct Shared {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    connections: Arc<AtomicUsize>,
}

/// HTTP/1.1 server on a random local port that answers every request with
/// the handler's response and keeps connections alive.
pub struct MockHttpServer {
    port: u16,
    shared: Shared,
    task: tokio::task::JoinHandle<()>,
}

impl MockHttpServer {
    /// Plain-text server.
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    {
        Self::spawn(None, Arc::new(handler)).await
    }

    /// TLS server using `acceptor`.
    pub async fn start_tls<F>(acceptor: SslAcceptor, handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    {
        Self::spawn(Some(acceptor), Arc::new(handler)).await
    }

    async fn spawn(acceptor: Option<SslAcceptor>, handler: Handler) -> Self {
        let acceptor = acceptor.map(Arc::new);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let port = listener.local_addr().expect("local addr").port();
        let shared = Shared::default();
        let state = shared.clone();
        let task = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let id = state.connections.fetch_add(1, Ordering::SeqCst);
                let state = state.clone();
                let handler = Arc::clone(&handler);
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match acceptor {
                        Some(acceptor) => match tokio_boring::accept(&acceptor, tcp).await {
                            Ok(tls) => serve(tls, id, state, handler).await,
                            Err(_) => tracing::debug!("mock tls accept failed"),
                        },
                        None => serve(tcp, id, state, handler).await,
                    }
                });
            }
        });
        Self { port, shared, task }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn url_tls(&self, path: &str) -> String {
        format!("https://localhost:{}{}", self.port, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve<S>(mut io: S, connection: usize, state: Shared, handler: Handler)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let request = match read_request(&mut io, &mut buf, connection).await {
            Some(request) => request,
            None => return,
        };
        let response = handler(&request);
        state.requests.lock().unwrap().push(request);
        if io.write_all(&response.to_bytes()).await.is_err() || io.flush().await.is_err() {
            return;
        }
        if response.closes() {
            let _ = io.shutdown().await;
            return;
        }
    }
}

async fn read_request<S>(io: &mut S, buf: &mut Vec<u8>, connection: usize) -> Option<RecordedRequest>
where
    S: AsyncRead + Unpin,
{
    let (mut request, head_len, framing) = loop {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut parsed = httparse::Request::new(&mut headers);
        if let Ok(httparse::Status::Complete(len)) = parsed.parse(buf) {
            let headers: Vec<(String, String)> = parsed
                .headers
                .iter()
                .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                .collect();
            let framing = body_framing(&headers);
            let request = RecordedRequest {
                method: parsed.method.unwrap_or_default().to_string(),
                target: parsed.path.unwrap_or_default().to_string(),
                headers,
                body: Vec::new(),
                connection,
            };
            break (request, len, framing);
        }
        if !fill(io, buf).await {
            return None;
        }
    };
    buf.drain(..head_len);

    match framing {
        Framing::Length(len) => {
            while buf.len() < len {
                if !fill(io, buf).await {
                    return None;
                }
            }
            request.body = buf.drain(..len).collect();
        }
        Framing::Chunked => loop {
            let Some(line_end) = find_crlf(buf) else {
                if !fill(io, buf).await {
                    return None;
                }
                continue;
            };
            let size_line = String::from_utf8_lossy(&buf[..line_end]).into_owned();
            let size = usize::from_str_radix(size_line.split(';').next()?.trim(), 16).ok()?;
            while buf.len() < line_end + 2 + size + 2 {
                if !fill(io, buf).await {
                    return None;
                }
            }
            request.body.extend_from_slice(&buf[line_end + 2..line_end + 2 + size]);
            buf.drain(..line_end + 2 + size + 2);
            if size == 0 {
                break;
            }
        },
    }
    Some(request)
}

enum Framing {
    Length(usize),
    Chunked,
}

fn body_framing(headers: &[(String, String)]) -> Framing {
    let chunked = headers
        .iter()
        .any(|(n, v)| n.eq_ignore_ascii_case("transfer-encoding") && v.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return Framing::Chunked;
    }
    let len = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse().ok())
        .unwrap_or(0);
    Framing::Length(len)
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Read more bytes; false on EOF, error or a long idle.
async fn fill<S: AsyncRead + Unpin>(io: &mut S, buf: &mut Vec<u8>) -> bool {
    let mut chunk = [0u8; 8192];
    match timeout(Duration::from_secs(10), io.read(&mut chunk)).await {
        Ok(Ok(n)) if n > 0 => {
            buf.extend_from_slice(&chunk[..n]);
            true
        }
        _ => false,
    }
}
