//! HTTP/1.1 client codec (RFC 9112).
//!
//! Requests are written by hand so header order and casing are exactly what
//! the caller prepared; response heads are parsed with httparse. Bodies are
//! streamed straight off the connection by [`H1Body`], which hands the
//! connection back to the pool once the message is complete.

use bytes::{Buf, Bytes, BytesMut};
use http::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::connector::MaybeHttpsStream;
use super::{RequestHead, ResponseHead};
use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::pool::PooledConnection;
use crate::request::Body;
use crate::version::HttpVersion;

/// Maximum response head size.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Maximum number of response headers.
const MAX_HEADERS_COUNT: usize = 128;

/// Maximum chunk-size or trailer line length.
const MAX_LINE: usize = 8 * 1024;

const READ_CHUNK: usize = 16 * 1024;

/// Requests up to this size go out in a single write with the head.
const COALESCE_LIMIT: usize = 64 * 1024;

/// An HTTP/1.1 connection: the stream plus bytes read past the last message.
#[derive(Debug)]
pub struct H1Connection {
    stream: MaybeHttpsStream,
    buf: BytesMut,
}

impl H1Connection {
    pub fn new(stream: MaybeHttpsStream) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Idle and usable for another request.
    pub fn is_reusable(&self) -> bool {
        self.buf.is_empty() && self.stream.is_open()
    }

    /// Read more bytes into the buffer. Returns 0 at end of stream.
    async fn fill(&mut self) -> Result<usize> {
        self.buf.reserve(READ_CHUNK);
        match self.stream.read_buf(&mut self.buf).await {
            Ok(n) => Ok(n),
            // TLS peers that close without close_notify.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(0),
            Err(e) => Err(Error::transport(format!("read failed: {e}"))),
        }
    }

    /// Write the request line, headers and body.
    pub async fn write_request(&mut self, head: &RequestHead<'_>, body: Body) -> Result<()> {
        let mut out = encode_head(head, &body)?;
        match body {
            Body::Empty => self.write_all(&out).await?,
            Body::Bytes(bytes) if out.len() + bytes.len() <= COALESCE_LIMIT => {
                out.extend_from_slice(&bytes);
                self.write_all(&out).await?;
            }
            Body::Bytes(bytes) => {
                self.write_all(&out).await?;
                self.write_all(&bytes).await?;
            }
            Body::Stream(mut rx) => {
                self.write_all(&out).await?;
                while let Some(chunk) = rx.recv().await {
                    if chunk.is_empty() {
                        continue;
                    }
                    let mut frame = Vec::with_capacity(chunk.len() + 12);
                    frame.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                    frame.extend_from_slice(&chunk);
                    frame.extend_from_slice(b"\r\n");
                    self.write_all(&frame).await?;
                }
                self.write_all(b"0\r\n\r\n").await?;
            }
        }
        self.stream
            .flush()
            .await
            .map_err(|e| Error::transport(format!("flush failed: {e}")))
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream
            .write_all(data)
            .await
            .map_err(|e| Error::transport(format!("write failed: {e}")))
    }

    /// Read the next final response head, skipping 1xx responses.
    ///
    /// Returns the head, the body framing and whether the connection may be
    /// kept alive afterwards.
    pub async fn read_response_head(&mut self, method: &Method) -> Result<(ResponseHead, Framing, bool)> {
        loop {
            let parsed = loop {
                if let Some(parsed) = parse_head(&self.buf)? {
                    break parsed;
                }
                if self.buf.len() >= MAX_HEAD_SIZE {
                    return Err(Error::http_protocol("response head too large"));
                }
                if self.fill().await? == 0 {
                    return Err(Error::transport(if self.buf.is_empty() {
                        "connection closed before response".to_string()
                    } else {
                        "connection closed inside response head".to_string()
                    }));
                }
            };
            let (head, consumed) = parsed;
            self.buf.advance(consumed);

            if (100..200).contains(&head.status) {
                tracing::trace!(status = head.status, "skipping informational response");
                continue;
            }

            let framing = framing_for(method, &head)?;
            let keep_alive = keep_alive(&head) && framing != Framing::UntilClose;
            return Ok((head, framing, keep_alive));
        }
    }
}

fn encode_head(head: &RequestHead<'_>, body: &Body) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(1024);
    out.extend_from_slice(head.method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(head.request_target().as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    let has = |name: &str| head.headers.contains(name);
    if !has("host") {
        write_header(&mut out, "Host", &head.target.host_header())?;
    }
    for (name, value) in head.headers.iter() {
        write_header(&mut out, name, value)?;
    }
    if !has("connection") {
        write_header(&mut out, "Connection", "keep-alive")?;
    }
    if let Some(auth) = head.proxy_authorization {
        write_header(&mut out, "Proxy-Authorization", auth)?;
    }
    if !has("content-length") && !has("transfer-encoding") {
        match body {
            Body::Stream(_) => write_header(&mut out, "Transfer-Encoding", "chunked")?,
            Body::Bytes(b) => write_header(&mut out, "Content-Length", &b.len().to_string())?,
            Body::Empty if expects_body(head.method) => write_header(&mut out, "Content-Length", "0")?,
            Body::Empty => {}
        }
    }
    out.extend_from_slice(b"\r\n");
    Ok(out)
}

fn write_header(out: &mut Vec<u8>, name: &str, value: &str) -> Result<()> {
    validate_header_name(name)?;
    validate_header_value(value)?;
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
    Ok(())
}

pub(crate) fn expects_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Parse a response head from `buf`; `None` if incomplete.
fn parse_head(buf: &[u8]) -> Result<Option<(ResponseHead, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
    let mut response = httparse::Response::new(&mut headers);
    let consumed = match response.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(Error::http_protocol(format!("malformed response head: {e}"))),
    };
    let status = response
        .code
        .ok_or_else(|| Error::http_protocol("missing status code"))?;
    let version = match response.version {
        Some(0) => HttpVersion::Http1_0,
        _ => HttpVersion::Http1_1,
    };
    let headers: Headers = response
        .headers
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
        .collect();
    Ok(Some((
        ResponseHead {
            status,
            version,
            headers,
        },
        consumed,
    )))
}

/// How the end of a response body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

/// Body framing per RFC 9112 §6.3.
pub fn framing_for(method: &Method, head: &ResponseHead) -> Result<Framing> {
    if *method == Method::HEAD || matches!(head.status, 100..=199 | 204 | 304) {
        return Ok(Framing::Empty);
    }
    let te = head.headers.get_all("transfer-encoding");
    if !te.is_empty() {
        let last = te
            .iter()
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .last();
        return Ok(match last {
            Some(coding) if coding.eq_ignore_ascii_case("chunked") => Framing::Chunked,
            _ => Framing::UntilClose,
        });
    }
    let lengths = head.headers.get_all("content-length");
    if lengths.is_empty() {
        return Ok(Framing::UntilClose);
    }
    let length = parse_content_length(&lengths.join(","))?;
    Ok(if length == 0 {
        Framing::Empty
    } else {
        Framing::Length(length)
    })
}

fn keep_alive(head: &ResponseHead) -> bool {
    let tokens: Vec<String> = head
        .headers
        .get_all("connection")
        .iter()
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .collect();
    if tokens.iter().any(|t| t == "close") {
        return false;
    }
    match head.version {
        HttpVersion::Http1_0 => tokens.iter().any(|t| t == "keep-alive"),
        _ => true,
    }
}

/// Content-Length per RFC 9112 §6.2: repeated values must all agree.
fn parse_content_length(value: &str) -> Result<u64> {
    let mut length = None;
    for part in value.split(',').map(str::trim) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::http_protocol(format!("invalid Content-Length: {value}")));
        }
        let n: u64 = part
            .parse()
            .map_err(|_| Error::http_protocol(format!("invalid Content-Length: {value}")))?;
        match length {
            Some(prev) if prev != n => {
                return Err(Error::http_protocol(format!("conflicting Content-Length values: {value}")))
            }
            _ => length = Some(n),
        }
    }
    length.ok_or_else(|| Error::http_protocol("empty Content-Length"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
}

#[derive(Debug)]
enum State {
    Length(u64),
    Chunked(ChunkState),
    UntilClose,
    Done,
}

/// Streaming response body read off a leased HTTP/1.1 connection.
///
/// On clean completion the connection goes back to the pool if it can be
/// kept alive; on error, or when dropped early, it is discarded.
#[derive(Debug)]
pub struct H1Body {
    lease: Option<PooledConnection>,
    state: State,
    keep_alive: bool,
}

impl H1Body {
    pub fn new(lease: PooledConnection, framing: Framing, keep_alive: bool) -> Self {
        let state = match framing {
            Framing::Empty | Framing::Length(0) => State::Done,
            Framing::Length(n) => State::Length(n),
            Framing::Chunked => State::Chunked(ChunkState::Size),
            Framing::UntilClose => State::UntilClose,
        };
        let mut body = Self {
            lease: Some(lease),
            state,
            keep_alive,
        };
        if matches!(body.state, State::Done) {
            body.finish();
        }
        body
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Next slice of the (still content-encoded) body; `None` at the end.
    pub async fn next_raw(&mut self) -> Result<Option<Bytes>> {
        if self.is_done() {
            return Ok(None);
        }
        match self.step().await {
            Ok(Some(data)) => {
                // Release as soon as the last byte is in hand.
                if matches!(self.state, State::Length(0)) {
                    self.state = State::Done;
                    self.finish();
                }
                Ok(Some(data))
            }
            Ok(None) => {
                self.state = State::Done;
                self.finish();
                Ok(None)
            }
            Err(e) => {
                self.state = State::Done;
                if let Some(lease) = self.lease.take() {
                    lease.release(false);
                }
                Err(e)
            }
        }
    }

    fn finish(&mut self) {
        if let Some(mut lease) = self.lease.take() {
            // Leftover bytes mean the peer sent more than one message.
            let clean = lease.io().map(|c| c.buf.is_empty()).unwrap_or(false);
            lease.release(self.keep_alive && clean);
        }
    }

    async fn step(&mut self) -> Result<Option<Bytes>> {
        let lease = self
            .lease
            .as_mut()
            .ok_or_else(|| Error::transport("connection already released"))?;
        let conn = lease.io()?;
        loop {
            match &mut self.state {
                State::Done => return Ok(None),
                State::Length(remaining) => {
                    if conn.buf.is_empty() && conn.fill().await? == 0 {
                        return Err(Error::transport(format!(
                            "connection closed with {remaining} body bytes outstanding"
                        )));
                    }
                    let take = (*remaining).min(conn.buf.len() as u64) as usize;
                    *remaining -= take as u64;
                    return Ok(Some(conn.buf.split_to(take).freeze()));
                }
                State::UntilClose => {
                    if conn.buf.is_empty() && conn.fill().await? == 0 {
                        return Ok(None);
                    }
                    return Ok(Some(conn.buf.split().freeze()));
                }
                State::Chunked(chunk) => match *chunk {
                    ChunkState::Size => {
                        let line = read_line(conn).await?;
                        let size = parse_chunk_size(&line)?;
                        *chunk = if size == 0 {
                            ChunkState::Trailers
                        } else {
                            ChunkState::Data(size)
                        };
                    }
                    ChunkState::Data(remaining) => {
                        if conn.buf.is_empty() && conn.fill().await? == 0 {
                            return Err(Error::transport("connection closed inside chunk"));
                        }
                        let take = remaining.min(conn.buf.len() as u64) as usize;
                        let left = remaining - take as u64;
                        *chunk = if left == 0 {
                            ChunkState::DataEnd
                        } else {
                            ChunkState::Data(left)
                        };
                        return Ok(Some(conn.buf.split_to(take).freeze()));
                    }
                    ChunkState::DataEnd => {
                        let line = read_line(conn).await?;
                        if !line.is_empty() {
                            return Err(Error::http_protocol("missing CRLF after chunk data"));
                        }
                        *chunk = ChunkState::Size;
                    }
                    ChunkState::Trailers => {
                        let line = read_line(conn).await?;
                        if line.is_empty() {
                            return Ok(None);
                        }
                        tracing::trace!(trailer = %String::from_utf8_lossy(&line), "ignoring trailer");
                    }
                },
            }
        }
    }
}

impl Drop for H1Body {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            tracing::trace!(id = lease.id(), "body dropped before completion, discarding connection");
            lease.release(false);
        }
    }
}

/// Read one CRLF-terminated line (without the terminator).
async fn read_line(conn: &mut H1Connection) -> Result<Bytes> {
    loop {
        if let Some(pos) = conn.buf.windows(2).position(|w| w == b"\r\n") {
            let line = conn.buf.split_to(pos).freeze();
            conn.buf.advance(2);
            return Ok(line);
        }
        if conn.buf.len() > MAX_LINE {
            return Err(Error::http_protocol("chunk line too long"));
        }
        if conn.fill().await? == 0 {
            return Err(Error::transport("connection closed inside chunked body"));
        }
    }
}

/// Hex chunk size, ignoring chunk extensions.
fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(line).map_err(|_| Error::http_protocol("non-ASCII chunk size"))?;
    let size = text.split(';').next().unwrap_or("").trim();
    if size.is_empty() {
        return Err(Error::http_protocol("empty chunk size"));
    }
    u64::from_str_radix(size, 16).map_err(|_| Error::http_protocol(format!("invalid chunk size: {size:?}")))
}

/// Header names must be RFC 9110 tokens.
pub(crate) fn validate_header_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.bytes().all(is_tchar) {
        return Err(Error::invalid_request(format!("invalid header name: {name:?}")));
    }
    Ok(())
}

fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z'
    )
}

/// Header values must not contain NUL, CR, or LF.
pub(crate) fn validate_header_value(value: &str) -> Result<()> {
    if value.bytes().any(|b| b == 0 || b == b'\r' || b == b'\n') {
        return Err(Error::invalid_request(
            "invalid character in header value (CR/LF/NUL not allowed)",
        ));
    }
    Ok(())
}
