//! HTTP/2 client with full fingerprint control.
//!
//! Unlike general-purpose HTTP/2 stacks, which fix their own SETTINGS and
//! header layout, this implementation sends exactly what the profile
//! describes:
//! - **SETTINGS order** and values
//! - **connection WINDOW_UPDATE** right after SETTINGS
//! - **PRIORITY frames** and the HEADERS priority block
//! - **pseudo-header order**, e.g. Chrome's `:method, :authority, :scheme, :path`
//!
//! A spawned driver task owns the connection ([`connection`]); an
//! [`H2Handle`] is a cheap clone that opens streams on it, so the pool can
//! hand the same connection to many concurrent requests.

mod connection;
pub mod frame;
pub mod hpack;
mod huffman;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use self::connection::{BodyEvent, Command, Driver, OpenStream};
use crate::error::{Error, Result};
use crate::fingerprint::http2::{Http2Spec, PseudoHeader};
use crate::headers::Headers;
use crate::request::Body;
use crate::transport::h1::{expects_body, validate_header_name, validate_header_value};
use crate::transport::{RequestHead, ResponseHead};

/// Connection-specific headers that are illegal in HTTP/2.
const CONNECTION_HEADERS: [&str; 6] = [
    "connection",
    "host",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// Send the preface and start the connection driver.
///
/// Returns once the opening frames are written; the peer's SETTINGS are
/// processed by the driver as they arrive.
pub async fn handshake<S>(io: S, spec: &Http2Spec) -> Result<H2Handle>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (commands, rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let mut driver = Driver::new(io, spec, rx, closed.clone());
    driver.flush().await?;
    tracing::debug!(akamai = %spec.akamai_fingerprint(), "HTTP/2 connection started");
    tokio::spawn(driver.run());
    Ok(H2Handle {
        commands,
        closed,
        pseudo_order: spec.pseudo_header_order.clone().into(),
    })
}

/// Shared handle to one HTTP/2 connection.
#[derive(Clone)]
pub struct H2Handle {
    commands: mpsc::UnboundedSender<Command>,
    closed: Arc<AtomicBool>,
    pseudo_order: Arc<[PseudoHeader]>,
}

impl H2Handle {
    /// Whether new streams can still be opened.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.commands.is_closed()
    }

    /// Open a stream, send the request and wait for the response head.
    pub async fn send_request(&self, head: &RequestHead<'_>, body: Body) -> Result<(ResponseHead, H2Body)> {
        let fields = request_fields(head, &body, &self.pseudo_order)?;
        let (opened_tx, opened_rx) = oneshot::channel();
        let (response_tx, response_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::unbounded_channel();
        self.send(Command::Open(OpenStream {
            headers: fields,
            end_stream: body.is_empty(),
            opened_tx,
            response_tx,
            body_tx,
        }))?;
        let stream_id = opened_rx.await.map_err(|_| connection_gone())??;
        let body_stream = H2Body {
            stream_id,
            events: body_rx,
            commands: self.commands.clone(),
            trailers: None,
            done: false,
        };

        match body {
            Body::Empty => {}
            Body::Bytes(bytes) if bytes.is_empty() => {}
            Body::Bytes(bytes) => self.send_data(stream_id, bytes, true).await?,
            Body::Stream(mut rx) => {
                while let Some(chunk) = rx.recv().await {
                    if !chunk.is_empty() {
                        self.send_data(stream_id, chunk, false).await?;
                    }
                }
                self.send_data(stream_id, Bytes::new(), true).await?;
            }
        }

        let head = response_rx.await.map_err(|_| connection_gone())??;
        tracing::debug!(stream_id, status = head.status, "HTTP/2 response head");
        Ok((head, body_stream))
    }

    async fn send_data(&self, stream_id: u32, data: Bytes, end_stream: bool) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(Command::Data {
            stream_id,
            data,
            end_stream,
            done_tx,
        })?;
        done_rx.await.map_err(|_| connection_gone())?
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.commands.send(cmd).map_err(|_| connection_gone())
    }
}

impl fmt::Debug for H2Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("H2Handle").field("open", &self.is_open()).finish()
    }
}

fn connection_gone() -> Error {
    Error::transport("HTTP/2 connection closed")
}

/// Header fields for a request: pseudo-headers in profile order, then the
/// regular headers lowercased, in their given order.
fn request_fields(head: &RequestHead<'_>, body: &Body, order: &[PseudoHeader]) -> Result<Vec<(String, String)>> {
    let mut fields = Vec::with_capacity(order.len() + head.headers.len() + 1);
    for pseudo in order {
        let value = match pseudo {
            PseudoHeader::Method => head.method.as_str().to_string(),
            PseudoHeader::Authority => head
                .headers
                .get("host")
                .map(str::to_string)
                .unwrap_or_else(|| head.target.host_header()),
            PseudoHeader::Scheme => head.target.scheme.as_str().to_string(),
            PseudoHeader::Path => head.path(),
        };
        fields.push((pseudo.name().to_string(), value));
    }

    for (name, value) in head.headers.iter() {
        let name = name.to_ascii_lowercase();
        if CONNECTION_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if name == "te" && !value.eq_ignore_ascii_case("trailers") {
            continue;
        }
        validate_header_name(&name)?;
        validate_header_value(value)?;
        fields.push((name, value.to_string()));
    }

    if !head.headers.contains("content-length") {
        match body.len() {
            Some(0) if !expects_body(head.method) => {}
            Some(n) => fields.push(("content-length".to_string(), n.to_string())),
            None => {}
        }
    }
    Ok(fields)
}

/// Response body of one HTTP/2 stream.
///
/// Bytes are credited back to the peer's flow-control windows as they are
/// handed out. Dropping the body before END_STREAM resets the stream.
pub struct H2Body {
    stream_id: u32,
    events: mpsc::UnboundedReceiver<Result<BodyEvent>>,
    commands: mpsc::UnboundedSender<Command>,
    trailers: Option<Headers>,
    done: bool,
}

impl H2Body {
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn trailers(&self) -> Option<&Headers> {
        self.trailers.as_ref()
    }

    /// Next chunk as received; `None` after END_STREAM.
    pub async fn next_raw(&mut self) -> Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        loop {
            match self.events.recv().await {
                Some(Ok(BodyEvent::Data(data))) => {
                    let _ = self.commands.send(Command::Release {
                        stream_id: self.stream_id,
                        len: data.len(),
                    });
                    return Ok(Some(data));
                }
                Some(Ok(BodyEvent::Trailers(trailers))) => self.trailers = Some(trailers),
                Some(Ok(BodyEvent::End)) => {
                    self.done = true;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Err(e);
                }
                None => {
                    self.done = true;
                    return Err(Error::transport("HTTP/2 stream ended without END_STREAM"));
                }
            }
        }
    }
}

impl Drop for H2Body {
    fn drop(&mut self) {
        let mut unread = 0;
        while let Ok(event) = self.events.try_recv() {
            match event {
                Ok(BodyEvent::Data(data)) => unread += data.len(),
                Ok(BodyEvent::End) => self.done = true,
                _ => {}
            }
        }
        if unread > 0 {
            let _ = self.commands.send(Command::Release {
                stream_id: self.stream_id,
                len: unread,
            });
        }
        if !self.done {
            let _ = self.commands.send(Command::Reset {
                stream_id: self.stream_id,
            });
        }
    }
}

impl fmt::Debug for H2Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("H2Body")
            .field("stream_id", &self.stream_id)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::frame::{flags, FrameHeader, FrameType, CONNECTION_PREFACE, FRAME_HEADER_SIZE};
    use super::hpack::{Decoder, Encoder};
    use super::*;
    use crate::fingerprint::profiles;
    use crate::transport::Target;
    use bytes::BytesMut;
    use http::Method;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use url::Url;

    async fn read_frame(io: &mut DuplexStream) -> (FrameHeader, Vec<u8>) {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        io.read_exact(&mut header).await.unwrap();
        let header = FrameHeader::parse(&header).unwrap();
        let mut payload = vec![0u8; header.length as usize];
        io.read_exact(&mut payload).await.unwrap();
        (header, payload)
    }

    fn server_frame(encode: impl FnOnce(&mut BytesMut)) -> BytesMut {
        let mut buf = BytesMut::new();
        encode(&mut buf);
        buf
    }

    #[tokio::test]
    async fn test_chrome_opening_frames_and_exchange() {
        let profile = profiles::chrome_131();
        let spec = profile.http2.clone();
        let (client_io, mut server) = tokio::io::duplex(1 << 20);

        let handle = handshake(client_io, &spec).await.unwrap();
        assert!(handle.is_open());

        let mut preface = [0u8; 24];
        server.read_exact(&mut preface).await.unwrap();
        assert_eq!(&preface[..], CONNECTION_PREFACE);

        let (settings, payload) = read_frame(&mut server).await;
        assert_eq!(settings.frame_type, FrameType::Settings);
        let ids: Vec<u16> = payload.chunks(6).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
        let expected: Vec<u16> = spec.settings.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, expected);

        if spec.window_update > 0 {
            let (wu, payload) = read_frame(&mut server).await;
            assert_eq!(wu.frame_type, FrameType::WindowUpdate);
            assert_eq!(u32::from_be_bytes(payload[..4].try_into().unwrap()), spec.window_update);
        }
        for _ in &spec.priority_frames {
            let (p, _) = read_frame(&mut server).await;
            assert_eq!(p.frame_type, FrameType::Priority);
        }

        server
            .write_all(&server_frame(|b| super::frame::encode_settings(b, &[(3, 100)])))
            .await
            .unwrap();

        let request = tokio::spawn({
            let handle = handle.clone();
            async move {
                let url = Url::parse("https://example.com/search?q=1").unwrap();
                let target = Target::from_url(&url).unwrap();
                let mut headers = Headers::new();
                headers.append("User-Agent", "guise-test");
                headers.append("Connection", "keep-alive");
                let head = RequestHead {
                    method: &Method::GET,
                    url: &url,
                    target: &target,
                    headers: &headers,
                    absolute_form: false,
                    proxy_authorization: None,
                };
                let (head, mut body) = handle.send_request(&head, Body::Empty).await.unwrap();
                let mut collected = Vec::new();
                while let Some(chunk) = body.next_raw().await.unwrap() {
                    collected.extend_from_slice(&chunk);
                }
                (head, collected, body.trailers().cloned())
            }
        });

        // SETTINGS ACK, then the request HEADERS.
        let (ack, _) = read_frame(&mut server).await;
        assert_eq!(ack.frame_type, FrameType::Settings);
        assert!(ack.has(flags::ACK));
        let (headers, block) = read_frame(&mut server).await;
        assert_eq!(headers.frame_type, FrameType::Headers);
        assert_eq!(headers.stream_id, spec.first_stream_id());
        assert!(headers.has(flags::END_STREAM) && headers.has(flags::END_HEADERS));
        let block = if headers.has(flags::PRIORITY) { &block[5..] } else { &block[..] };
        let fields = Decoder::new(4096).decode(block).unwrap();
        let pseudo: Vec<&str> = fields.iter().take(4).map(|(n, _)| n.as_str()).collect();
        let expected: Vec<&str> = spec.pseudo_header_order.iter().map(|p| p.name()).collect();
        assert_eq!(pseudo, expected);
        assert!(fields.iter().any(|(n, v)| n == ":path" && v == "/search?q=1"));
        assert!(fields.iter().any(|(n, v)| n == "user-agent" && v == "guise-test"));
        assert!(!fields.iter().any(|(n, _)| n == "connection"));

        let sid = headers.stream_id;
        let mut encoder = Encoder::new(4096);
        let response = encoder.encode([(":status", "200"), ("content-type", "text/plain")]);
        let trailers = encoder.encode([("grpc-status", "0")]);
        let out = server_frame(|b| {
            super::frame::encode_headers(b, sid, &response, None, false, 16_384);
            super::frame::encode_data(b, sid, b"hello ", false);
            super::frame::encode_data(b, sid, b"world", false);
            super::frame::encode_headers(b, sid, &trailers, None, true, 16_384);
        });
        server.write_all(&out).await.unwrap();

        let (head, body, trailers) = request.await.unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.headers.get("content-type"), Some("text/plain"));
        assert_eq!(body, b"hello world");
        assert_eq!(trailers.unwrap().get("grpc-status"), Some("0"));
    }

    #[tokio::test]
    async fn test_goaway_closes_handle() {
        let spec = profiles::firefox_133().http2.clone();
        let (client_io, mut server) = tokio::io::duplex(1 << 16);
        let handle = handshake(client_io, &spec).await.unwrap();
        server
            .write_all(&server_frame(|b| super::frame::encode_goaway(b, 0, super::frame::ErrorCode::NoError)))
            .await
            .unwrap();
        for _ in 0..50 {
            if !handle.is_open() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!handle.is_open());
    }

    #[tokio::test]
    async fn test_reset_by_peer_fails_request() {
        let spec = profiles::chrome_131().http2.clone();
        let first = spec.first_stream_id();
        let (client_io, mut server) = tokio::io::duplex(1 << 16);
        let handle = handshake(client_io, &spec).await.unwrap();

        let request = tokio::spawn(async move {
            let url = Url::parse("https://example.com/").unwrap();
            let target = Target::from_url(&url).unwrap();
            let headers = Headers::new();
            let head = RequestHead {
                method: &Method::POST,
                url: &url,
                target: &target,
                headers: &headers,
                absolute_form: false,
                proxy_authorization: None,
            };
            handle.send_request(&head, Body::from("payload")).await
        });

        let reset = server_frame(|b| super::frame::encode_rst_stream(b, first, super::frame::ErrorCode::RefusedStream));
        // Give the client time to open the stream before resetting it.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        server.write_all(&reset).await.unwrap();
        let err = request.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
