use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use boring::ssl::SslAcceptor;
use bytes::Bytes;
use h2::server::SendResponse;
use h2::RecvStream;
use http::{HeaderMap, HeaderValue, Request, Response};
use tokio::net::TcpListener;

/// HTTP/2 server over TLS built on the `h2` crate. Routes:
///
/// - `/echo`: request body back, method in `x-method`
/// - `/big?n=N`: N bytes of `z`
/// - `/trailers`: short body followed by `grpc-status: 0`
/// - `/headers`: request header names, one per line
/// - anything else: `"ok"`
pub struct MockH2Server {
    port: u16,
    connections: Arc<AtomicUsize>,
    task: tokio::task::JoinHandle<()>,
}

impl MockH2Server {
    pub async fn start(acceptor: SslAcceptor) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind h2 server");
        let port = listener.local_addr().expect("local addr").port();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);
        let acceptor = Arc::new(acceptor);
        let task = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let acceptor = Arc::clone(&acceptor);
                tokio::spawn(async move {
                    let Ok(tls) = tokio_boring::accept(&acceptor, tcp).await else {
                        return;
                    };
                    let Ok(mut conn) = h2::server::handshake(tls).await else {
                        return;
                    };
                    while let Some(Ok((request, respond))) = conn.accept().await {
                        tokio::spawn(async move {
                            if let Err(e) = handle(request, respond).await {
                                tracing::debug!("h2 handler failed: {e}");
                            }
                        });
                    }
                });
            }
        });
        Self { port, connections, task }
    }

    pub fn url(&self, path: &str) -> String {
        format!("https://localhost:{}{}", self.port, path)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockH2Server {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle(request: Request<RecvStream>, mut respond: SendResponse<Bytes>) -> Result<(), h2::Error> {
    let (parts, mut body) = request.into_parts();
    let mut received = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        let _ = body.flow_control().release_capacity(chunk.len());
        received.extend_from_slice(&chunk);
    }

    let mut head = Response::builder().status(200);
    let (payload, trailers) = match parts.uri.path() {
        "/echo" => {
            head = head.header("x-method", parts.method.as_str());
            (Bytes::from(received), None)
        }
        "/big" => {
            let n = parts
                .uri
                .query()
                .and_then(|q| q.strip_prefix("n="))
                .and_then(|n| n.parse().ok())
                .unwrap_or(1 << 16);
            (Bytes::from(vec![b'z'; n]), None)
        }
        "/trailers" => {
            let mut trailers = HeaderMap::new();
            trailers.insert("grpc-status", HeaderValue::from_static("0"));
            (Bytes::from_static(b"framed"), Some(trailers))
        }
        "/headers" => {
            let names: Vec<&str> = parts.headers.keys().map(|k| k.as_str()).collect();
            let authority = parts.uri.authority().map(|a| a.as_str()).unwrap_or_default();
            (Bytes::from(format!("authority={authority}\n{}", names.join("\n"))), None)
        }
        _ => (Bytes::from_static(b"ok"), None),
    };

    let response = head.body(()).expect("response head");
    let mut send = respond.send_response(response, false)?;
    match trailers {
        Some(trailers) => {
            send.send_data(payload, false)?;
            send.send_trailers(trailers)?;
        }
        None => send.send_data(payload, true)?,
    }
    Ok(())
}
