//! HTTP/2 connection driver.
//!
//! One task per connection owns the socket, both HPACK contexts and all
//! stream state. Handles talk to it over a command channel; response heads
//! and body events flow back over per-stream channels. Frame handlers are
//! synchronous and only queue bytes in `write_buf`, which is flushed once
//! per loop turn.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use super::frame::{
    self, flags, ErrorCode, FrameHeader, FrameType, CONNECTION_PREFACE, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE,
    MAX_FRAME_SIZE_LIMIT,
};
use super::hpack::{Decoder, Encoder};
use crate::error::{Error, Result};
use crate::fingerprint::http2::{setting, Http2Spec, StreamDependency, DEFAULT_WINDOW};
use crate::headers::Headers;
use crate::transport::ResponseHead;
use crate::version::HttpVersion;

const MAX_WINDOW: i64 = (1 << 31) - 1;
const MAX_STREAM_ID: u32 = (1 << 31) - 1;
/// Cap on the encoder table regardless of what the peer allows.
const MAX_ENCODER_TABLE: u32 = 65_536;
/// Cap on an accumulated HEADERS + CONTINUATION block.
const MAX_HEADER_BLOCK: usize = 1 << 20;
const READ_CHUNK: usize = 16 * 1024;

/// What a stream's body channel carries.
#[derive(Debug)]
pub(crate) enum BodyEvent {
    Data(Bytes),
    Trailers(Headers),
    /// END_STREAM seen; nothing follows.
    End,
}

pub(crate) type BodyTx = mpsc::UnboundedSender<Result<BodyEvent>>;

pub(crate) struct OpenStream {
    /// Header fields in wire order, pseudo-headers first.
    pub headers: Vec<(String, String)>,
    pub end_stream: bool,
    pub opened_tx: oneshot::Sender<Result<u32>>,
    pub response_tx: oneshot::Sender<Result<ResponseHead>>,
    pub body_tx: BodyTx,
}

pub(crate) enum Command {
    Open(OpenStream),
    /// Request body bytes; `done_tx` fires once they are on the wire.
    Data {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
        done_tx: oneshot::Sender<Result<()>>,
    },
    /// The caller consumed `len` body bytes; credit the receive windows.
    Release { stream_id: u32, len: usize },
    /// The caller lost interest in the stream.
    Reset { stream_id: u32 },
}

struct Outbound {
    data: Bytes,
    end_stream: bool,
    done_tx: Option<oneshot::Sender<Result<()>>>,
}

struct Stream {
    /// Present until the final (non-1xx) response head arrives.
    response_tx: Option<oneshot::Sender<Result<ResponseHead>>>,
    body_tx: BodyTx,
    send_window: i64,
    recv_unacked: u32,
    outbound: VecDeque<Outbound>,
    local_closed: bool,
    remote_closed: bool,
}

impl Stream {
    fn fail(&mut self, err: Error) {
        match self.response_tx.take() {
            Some(tx) => {
                let _ = tx.send(Err(err));
            }
            None => {
                let _ = self.body_tx.send(Err(err));
            }
        }
        for out in self.outbound.drain(..) {
            if let Some(tx) = out.done_tx {
                let _ = tx.send(Err(Error::transport("stream closed before request body was sent")));
            }
        }
    }
}

/// A header block being assembled from HEADERS/PUSH_PROMISE + CONTINUATION.
struct HeaderBlock {
    stream_id: u32,
    buf: BytesMut,
    end_stream: bool,
    promised: Option<u32>,
}

pub(crate) struct Driver<S> {
    io: S,
    read_buf: BytesMut,
    write_buf: BytesMut,
    commands: mpsc::UnboundedReceiver<Command>,
    closed: Arc<AtomicBool>,
    encoder: Encoder,
    decoder: Decoder,
    streams: HashMap<u32, Stream>,
    pending_opens: VecDeque<OpenStream>,
    next_stream_id: u32,
    headers_priority: Option<StreamDependency>,

    local_stream_window: u32,
    local_conn_window: u32,
    local_max_frame_size: u32,
    conn_recv_unacked: u32,

    conn_send_window: i64,
    peer_initial_window: i64,
    peer_max_frame_size: u32,
    peer_max_concurrent: usize,

    continuation: Option<HeaderBlock>,
    goaway: Option<u32>,
}

impl<S> Driver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Queue the connection preface, SETTINGS in profile order, the
    /// connection WINDOW_UPDATE and the profile's PRIORITY frames.
    pub(crate) fn new(
        io: S,
        spec: &Http2Spec,
        commands: mpsc::UnboundedReceiver<Command>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        let mut write_buf = BytesMut::with_capacity(256);
        write_buf.extend_from_slice(CONNECTION_PREFACE);
        frame::encode_settings(&mut write_buf, &spec.settings);
        if spec.window_update > 0 {
            frame::encode_window_update(&mut write_buf, 0, spec.window_update);
        }
        for p in &spec.priority_frames {
            frame::encode_priority(&mut write_buf, p.stream_id, &p.dependency);
        }

        Self {
            io,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf,
            commands,
            closed,
            encoder: Encoder::new(4096),
            decoder: Decoder::new(spec.header_table_size() as usize),
            streams: HashMap::new(),
            pending_opens: VecDeque::new(),
            next_stream_id: spec.first_stream_id(),
            headers_priority: spec.headers_priority,
            local_stream_window: spec.initial_window_size(),
            local_conn_window: spec.connection_window(),
            local_max_frame_size: spec
                .setting(setting::MAX_FRAME_SIZE)
                .unwrap_or(DEFAULT_MAX_FRAME_SIZE)
                .max(DEFAULT_MAX_FRAME_SIZE),
            conn_recv_unacked: 0,
            conn_send_window: i64::from(DEFAULT_WINDOW),
            peer_initial_window: i64::from(DEFAULT_WINDOW),
            peer_max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            peer_max_concurrent: usize::MAX,
            continuation: None,
            goaway: None,
        }
    }

    /// Write whatever is queued. Used for the preface before the task is
    /// spawned so a dead socket fails the handshake.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let buf = self.write_buf.split();
        self.io
            .write_all(&buf)
            .await
            .map_err(|e| Error::transport(format!("HTTP/2 write failed: {e}")))?;
        self.io
            .flush()
            .await
            .map_err(|e| Error::transport(format!("HTTP/2 flush failed: {e}")))
    }

    pub(crate) async fn run(mut self) {
        let result = self.drive().await;
        self.closed.store(true, Ordering::Release);
        let message = match result {
            Ok(()) => {
                tracing::debug!("HTTP/2 connection finished");
                "HTTP/2 connection closed".to_string()
            }
            Err(e) => {
                tracing::debug!(error = %e, "HTTP/2 connection failed");
                frame::encode_goaway(&mut self.write_buf, 0, ErrorCode::ProtocolError);
                let _ = self.flush().await;
                format!("HTTP/2 connection error: {e}")
            }
        };
        for (_, mut stream) in self.streams.drain() {
            stream.fail(Error::transport(message.clone()));
        }
        for open in self.pending_opens.drain(..) {
            let _ = open.opened_tx.send(Err(Error::transport(message.clone())));
        }
        self.commands.close();
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                Command::Open(open) => {
                    let _ = open.opened_tx.send(Err(Error::transport(message.clone())));
                }
                Command::Data { done_tx, .. } => {
                    let _ = done_tx.send(Err(Error::transport(message.clone())));
                }
                Command::Release { .. } | Command::Reset { .. } => {}
            }
        }
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            if self.goaway.is_some() && self.streams.is_empty() && self.pending_opens.is_empty() {
                return Ok(());
            }
            self.read_buf.reserve(READ_CHUNK);
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        frame::encode_goaway(&mut self.write_buf, 0, ErrorCode::NoError);
                        let _ = self.flush().await;
                        return Ok(());
                    }
                },
                n = self.io.read_buf(&mut self.read_buf) => {
                    let n = n.map_err(|e| Error::transport(format!("HTTP/2 read failed: {e}")))?;
                    if n == 0 {
                        return Err(Error::transport("connection closed by peer"));
                    }
                    while let Some((header, payload)) = self.next_frame()? {
                        self.handle_frame(header, payload)?;
                    }
                }
            }
            self.flush().await?;
        }
    }

    fn next_frame(&mut self) -> Result<Option<(FrameHeader, Bytes)>> {
        let Some(header) = FrameHeader::parse(&self.read_buf) else {
            return Ok(None);
        };
        if header.length > self.local_max_frame_size {
            return Err(Error::http_protocol(format!(
                "frame of {} bytes exceeds max frame size",
                header.length
            )));
        }
        if self.read_buf.len() < FRAME_HEADER_SIZE + header.length as usize {
            return Ok(None);
        }
        self.read_buf.advance(FRAME_HEADER_SIZE);
        let payload = self.read_buf.split_to(header.length as usize).freeze();
        Ok(Some((header, payload)))
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Open(open) => {
                self.pending_opens.push_back(open);
                self.open_pending();
            }
            Command::Data {
                stream_id,
                data,
                end_stream,
                done_tx,
            } => match self.streams.get_mut(&stream_id) {
                Some(stream) if !stream.local_closed => {
                    stream.outbound.push_back(Outbound {
                        data,
                        end_stream,
                        done_tx: Some(done_tx),
                    });
                    self.flush_stream(stream_id);
                }
                _ => {
                    let _ = done_tx.send(Err(Error::transport(format!("stream {stream_id} is closed"))));
                }
            },
            Command::Release { stream_id, len } => self.release(stream_id, len as u32),
            Command::Reset { stream_id } => {
                if let Some(mut stream) = self.streams.remove(&stream_id) {
                    tracing::trace!(stream_id, "cancelling HTTP/2 stream");
                    frame::encode_rst_stream(&mut self.write_buf, stream_id, ErrorCode::Cancel);
                    stream.fail(Error::transport("stream cancelled"));
                    self.open_pending();
                }
            }
        }
    }

    /// Open queued streams while the peer's concurrency limit allows.
    fn open_pending(&mut self) {
        while self.streams.len() < self.peer_max_concurrent {
            let Some(open) = self.pending_opens.pop_front() else {
                break;
            };
            if open.opened_tx.is_closed() {
                continue;
            }
            if self.goaway.is_some() || self.next_stream_id > MAX_STREAM_ID {
                let _ = open
                    .opened_tx
                    .send(Err(Error::transport("HTTP/2 connection is not accepting new streams")));
                continue;
            }
            let stream_id = self.next_stream_id;
            self.next_stream_id += 2;
            if self.next_stream_id > MAX_STREAM_ID {
                self.closed.store(true, Ordering::Release);
            }

            let block = self
                .encoder
                .encode(open.headers.iter().map(|(n, v)| (n.as_str(), v.as_str())));
            frame::encode_headers(
                &mut self.write_buf,
                stream_id,
                &block,
                self.headers_priority.as_ref(),
                open.end_stream,
                self.peer_max_frame_size as usize,
            );
            tracing::trace!(stream_id, end_stream = open.end_stream, "opened HTTP/2 stream");

            if open.opened_tx.send(Ok(stream_id)).is_err() {
                frame::encode_rst_stream(&mut self.write_buf, stream_id, ErrorCode::Cancel);
                continue;
            }
            self.streams.insert(
                stream_id,
                Stream {
                    response_tx: Some(open.response_tx),
                    body_tx: open.body_tx,
                    send_window: self.peer_initial_window,
                    recv_unacked: 0,
                    outbound: VecDeque::new(),
                    local_closed: open.end_stream,
                    remote_closed: false,
                },
            );
        }
    }

    /// Credit `len` consumed bytes; WINDOW_UPDATE once half a window is owed.
    fn release(&mut self, stream_id: u32, len: u32) {
        if len == 0 {
            return;
        }
        self.conn_recv_unacked = self.conn_recv_unacked.saturating_add(len);
        if self.conn_recv_unacked >= self.local_conn_window / 2 {
            frame::encode_window_update(&mut self.write_buf, 0, self.conn_recv_unacked);
            self.conn_recv_unacked = 0;
        }
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if !stream.remote_closed {
                stream.recv_unacked = stream.recv_unacked.saturating_add(len);
                if stream.recv_unacked >= self.local_stream_window / 2 {
                    frame::encode_window_update(&mut self.write_buf, stream_id, stream.recv_unacked);
                    stream.recv_unacked = 0;
                }
            }
        }
    }

    /// Send as much queued request body as both send windows allow.
    fn flush_stream(&mut self, stream_id: u32) {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return;
        };
        while let Some(front) = stream.outbound.front_mut() {
            if !front.data.is_empty() {
                let allowed = self
                    .conn_send_window
                    .min(stream.send_window)
                    .min(i64::from(self.peer_max_frame_size));
                if allowed <= 0 {
                    break;
                }
                let n = (allowed as usize).min(front.data.len());
                let chunk = front.data.split_to(n);
                let end = front.data.is_empty() && front.end_stream;
                frame::encode_data(&mut self.write_buf, stream_id, &chunk, end);
                self.conn_send_window -= n as i64;
                stream.send_window -= n as i64;
                if !front.data.is_empty() {
                    continue;
                }
                if end {
                    stream.local_closed = true;
                }
            } else if front.end_stream {
                frame::encode_data(&mut self.write_buf, stream_id, &[], true);
                stream.local_closed = true;
            }
            if let Some(tx) = front.done_tx.take() {
                let _ = tx.send(Ok(()));
            }
            stream.outbound.pop_front();
        }
        self.maybe_remove(stream_id);
    }

    fn flush_all(&mut self) {
        let ids: Vec<u32> = self
            .streams
            .iter()
            .filter(|(_, s)| !s.outbound.is_empty())
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.flush_stream(id);
        }
    }

    fn maybe_remove(&mut self, stream_id: u32) {
        let finished = self
            .streams
            .get(&stream_id)
            .is_some_and(|s| s.local_closed && s.remote_closed);
        if finished {
            self.streams.remove(&stream_id);
            self.open_pending();
        }
    }

    fn reset_stream(&mut self, stream_id: u32, code: ErrorCode, reason: &str) {
        tracing::warn!(stream_id, ?code, reason, "resetting HTTP/2 stream");
        frame::encode_rst_stream(&mut self.write_buf, stream_id, code);
        if let Some(mut stream) = self.streams.remove(&stream_id) {
            stream.fail(Error::http_protocol(format!("stream {stream_id}: {reason}")));
            self.open_pending();
        }
    }

    fn handle_frame(&mut self, header: FrameHeader, payload: Bytes) -> Result<()> {
        if let Some(block) = &self.continuation {
            if header.frame_type != FrameType::Continuation || header.stream_id != block.stream_id {
                return Err(Error::http_protocol("expected CONTINUATION frame"));
            }
        }
        tracing::trace!(
            frame_type = ?header.frame_type,
            stream_id = header.stream_id,
            length = header.length,
            flags = header.flags,
            "received HTTP/2 frame"
        );
        match header.frame_type {
            FrameType::Data => self.on_data(header, payload),
            FrameType::Headers => self.on_headers(header, payload),
            FrameType::Continuation => self.on_continuation(header, payload),
            FrameType::Settings => self.on_settings(header, payload),
            FrameType::Ping => self.on_ping(header, payload),
            FrameType::GoAway => self.on_goaway(payload),
            FrameType::RstStream => self.on_rst_stream(header, payload),
            FrameType::WindowUpdate => self.on_window_update(header, payload),
            FrameType::PushPromise => self.on_push_promise(header, payload),
            FrameType::Priority | FrameType::Unknown(_) => Ok(()),
        }
    }

    fn on_data(&mut self, header: FrameHeader, payload: Bytes) -> Result<()> {
        let stream_id = header.stream_id;
        if stream_id == 0 {
            return Err(Error::http_protocol("DATA on stream 0"));
        }
        let payload = frame::strip_padding(&header, payload)?;
        let end_stream = header.has(flags::END_STREAM);

        let mut delivered = 0usize;
        let mut premature = false;
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if stream.response_tx.is_some() {
                premature = true;
            } else if !stream.remote_closed {
                let len = payload.len();
                if len > 0 && stream.body_tx.send(Ok(BodyEvent::Data(payload))).is_ok() {
                    delivered = len;
                }
                if end_stream {
                    stream.remote_closed = true;
                    let _ = stream.body_tx.send(Ok(BodyEvent::End));
                }
            }
        }

        // Padding and bytes nobody will read are credited straight away.
        self.release(stream_id, header.length - delivered as u32);
        if premature {
            self.reset_stream(stream_id, ErrorCode::ProtocolError, "DATA before response headers");
        } else if end_stream {
            self.maybe_remove(stream_id);
        }
        Ok(())
    }

    fn on_headers(&mut self, header: FrameHeader, payload: Bytes) -> Result<()> {
        if header.stream_id == 0 {
            return Err(Error::http_protocol("HEADERS on stream 0"));
        }
        let mut payload = frame::strip_padding(&header, payload)?;
        if header.has(flags::PRIORITY) {
            if payload.len() < 5 {
                return Err(Error::http_protocol("HEADERS priority block truncated"));
            }
            payload.advance(5);
        }
        let block = HeaderBlock {
            stream_id: header.stream_id,
            buf: BytesMut::from(&payload[..]),
            end_stream: header.has(flags::END_STREAM),
            promised: None,
        };
        self.start_block(block, header.has(flags::END_HEADERS))
    }

    fn on_push_promise(&mut self, header: FrameHeader, payload: Bytes) -> Result<()> {
        let mut payload = frame::strip_padding(&header, payload)?;
        if payload.len() < 4 {
            return Err(Error::http_protocol("PUSH_PROMISE payload truncated"));
        }
        let promised = payload.get_u32() & 0x7fff_ffff;
        let block = HeaderBlock {
            stream_id: header.stream_id,
            buf: BytesMut::from(&payload[..]),
            end_stream: false,
            promised: Some(promised),
        };
        self.start_block(block, header.has(flags::END_HEADERS))
    }

    fn start_block(&mut self, block: HeaderBlock, complete: bool) -> Result<()> {
        if complete {
            self.on_header_block(block)
        } else {
            self.continuation = Some(block);
            Ok(())
        }
    }

    fn on_continuation(&mut self, header: FrameHeader, payload: Bytes) -> Result<()> {
        let Some(mut block) = self.continuation.take() else {
            return Err(Error::http_protocol("unexpected CONTINUATION frame"));
        };
        block.buf.extend_from_slice(&payload);
        if block.buf.len() > MAX_HEADER_BLOCK {
            return Err(Error::http_protocol("header block too large"));
        }
        self.start_block(block, header.has(flags::END_HEADERS))
    }

    fn on_header_block(&mut self, block: HeaderBlock) -> Result<()> {
        // Always decode: the HPACK context is shared by every stream.
        let fields = self.decoder.decode(&block.buf)?;
        let stream_id = block.stream_id;

        if let Some(promised) = block.promised {
            tracing::debug!(stream_id, promised, "refusing server push");
            frame::encode_rst_stream(&mut self.write_buf, promised, ErrorCode::RefusedStream);
            return Ok(());
        }

        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };
        if stream.remote_closed {
            return Ok(());
        }

        if stream.response_tx.is_some() {
            let (status, headers) = match split_response(fields) {
                Ok(parts) => parts,
                Err(reason) => {
                    self.reset_stream(stream_id, ErrorCode::ProtocolError, reason);
                    return Ok(());
                }
            };
            if (100..200).contains(&status) {
                if block.end_stream {
                    self.reset_stream(stream_id, ErrorCode::ProtocolError, "END_STREAM on informational response");
                }
                return Ok(());
            }
            let head = ResponseHead {
                status,
                version: HttpVersion::Http2,
                headers,
            };
            if let Some(tx) = stream.response_tx.take() {
                let _ = tx.send(Ok(head));
            }
        } else {
            if !block.end_stream {
                self.reset_stream(stream_id, ErrorCode::ProtocolError, "trailers without END_STREAM");
                return Ok(());
            }
            let trailers: Headers = fields.into_iter().filter(|(n, _)| !n.starts_with(':')).collect();
            let _ = stream.body_tx.send(Ok(BodyEvent::Trailers(trailers)));
        }

        if block.end_stream {
            stream.remote_closed = true;
            let _ = stream.body_tx.send(Ok(BodyEvent::End));
            self.maybe_remove(stream_id);
        }
        Ok(())
    }

    fn on_settings(&mut self, header: FrameHeader, payload: Bytes) -> Result<()> {
        if header.stream_id != 0 {
            return Err(Error::http_protocol("SETTINGS on a stream"));
        }
        if header.has(flags::ACK) {
            if !payload.is_empty() {
                return Err(Error::http_protocol("SETTINGS ACK with payload"));
            }
            return Ok(());
        }
        for (id, value) in frame::parse_settings(payload)? {
            match id {
                setting::HEADER_TABLE_SIZE => {
                    self.encoder.set_max_table_size(value.min(MAX_ENCODER_TABLE) as usize);
                }
                setting::MAX_CONCURRENT_STREAMS => self.peer_max_concurrent = value as usize,
                setting::INITIAL_WINDOW_SIZE => {
                    let value = i64::from(value);
                    if value > MAX_WINDOW {
                        return Err(Error::http_protocol("SETTINGS_INITIAL_WINDOW_SIZE above 2^31-1"));
                    }
                    let delta = value - self.peer_initial_window;
                    self.peer_initial_window = value;
                    for stream in self.streams.values_mut() {
                        stream.send_window += delta;
                    }
                }
                setting::MAX_FRAME_SIZE => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE_LIMIT).contains(&value) {
                        return Err(Error::http_protocol(format!("invalid SETTINGS_MAX_FRAME_SIZE {value}")));
                    }
                    self.peer_max_frame_size = value;
                }
                _ => {}
            }
        }
        tracing::trace!(
            max_concurrent = self.peer_max_concurrent,
            initial_window = self.peer_initial_window,
            max_frame_size = self.peer_max_frame_size,
            "applied peer SETTINGS"
        );
        frame::encode_settings_ack(&mut self.write_buf);
        self.flush_all();
        self.open_pending();
        Ok(())
    }

    fn on_ping(&mut self, header: FrameHeader, payload: Bytes) -> Result<()> {
        if header.stream_id != 0 {
            return Err(Error::http_protocol("PING on a stream"));
        }
        let data: [u8; 8] = payload[..]
            .try_into()
            .map_err(|_| Error::http_protocol("PING payload must be 8 bytes"))?;
        if !header.has(flags::ACK) {
            frame::encode_ping(&mut self.write_buf, data, true);
        }
        Ok(())
    }

    fn on_goaway(&mut self, payload: Bytes) -> Result<()> {
        let (last, code) = frame::parse_goaway(&payload)?;
        tracing::debug!(last_stream_id = last, ?code, "received GOAWAY");
        self.goaway = Some(last);
        self.closed.store(true, Ordering::Release);
        let refused: Vec<u32> = self.streams.keys().filter(|id| **id > last).copied().collect();
        for id in refused {
            if let Some(mut stream) = self.streams.remove(&id) {
                stream.fail(Error::transport(format!("stream {id} refused by GOAWAY ({code:?})")));
            }
        }
        self.open_pending();
        Ok(())
    }

    fn on_rst_stream(&mut self, header: FrameHeader, payload: Bytes) -> Result<()> {
        let stream_id = header.stream_id;
        if stream_id == 0 {
            return Err(Error::http_protocol("RST_STREAM on stream 0"));
        }
        let code = ErrorCode::from(frame::parse_u32(&payload)?);
        if let Some(mut stream) = self.streams.remove(&stream_id) {
            tracing::debug!(stream_id, ?code, "stream reset by peer");
            // NO_ERROR after a complete response only stops our upload.
            if !(code == ErrorCode::NoError && stream.remote_closed) {
                stream.fail(Error::transport(format!("stream {stream_id} reset by peer: {code:?}")));
            }
            self.open_pending();
        }
        Ok(())
    }

    fn on_window_update(&mut self, header: FrameHeader, payload: Bytes) -> Result<()> {
        let increment = frame::parse_u32(&payload)? & 0x7fff_ffff;
        let stream_id = header.stream_id;
        if stream_id == 0 {
            if increment == 0 {
                return Err(Error::http_protocol("zero connection WINDOW_UPDATE"));
            }
            self.conn_send_window += i64::from(increment);
            if self.conn_send_window > MAX_WINDOW {
                return Err(Error::http_protocol("connection send window overflow"));
            }
            self.flush_all();
            return Ok(());
        }
        if increment == 0 {
            self.reset_stream(stream_id, ErrorCode::ProtocolError, "zero WINDOW_UPDATE increment");
            return Ok(());
        }
        let overflow = match self.streams.get_mut(&stream_id) {
            Some(stream) => {
                stream.send_window += i64::from(increment);
                stream.send_window > MAX_WINDOW
            }
            None => return Ok(()),
        };
        if overflow {
            self.reset_stream(stream_id, ErrorCode::FlowControlError, "stream send window overflow");
        } else {
            self.flush_stream(stream_id);
        }
        Ok(())
    }
}

/// Split a decoded response block into status and regular headers.
fn split_response(fields: Vec<(String, String)>) -> std::result::Result<(u16, Headers), &'static str> {
    let mut status = None;
    let mut headers = Headers::with_capacity(fields.len());
    let mut regular_seen = false;
    for (name, value) in fields {
        if let Some(pseudo) = name.strip_prefix(':') {
            if regular_seen {
                return Err("pseudo-header after regular header");
            }
            if pseudo != "status" || status.is_some() {
                return Err("unexpected response pseudo-header");
            }
            if value.len() != 3 {
                return Err("malformed :status");
            }
            status = Some(value.parse::<u16>().map_err(|_| "malformed :status")?);
        } else {
            regular_seen = true;
            headers.append(name, value);
        }
    }
    status.map(|s| (s, headers)).ok_or("missing :status")
}
