//! HTTP/2 frame types and binary serialization (RFC 9113 §4, §6).
//!
//! Encoders write complete frames into a `BytesMut` so the driver can
//! batch a connection's opening frames into a single write.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::fingerprint::http2::StreamDependency;

/// Frame header size (9 bytes per RFC 9113).
pub const FRAME_HEADER_SIZE: usize = 9;

/// Default maximum frame size (16KB per RFC 9113).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Largest SETTINGS_MAX_FRAME_SIZE a peer may announce.
pub const MAX_FRAME_SIZE_LIMIT: u32 = 16_777_215;

/// Client connection preface.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl From<u8> for FrameType {
    fn from(v: u8) -> Self {
        match v {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            other => Self::Unknown(other),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        match ft {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(v) => v,
        }
    }
}

/// Frame flags.
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    /// Same bit as END_STREAM, on SETTINGS and PING.
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// Error codes (RFC 9113 §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http11Required,
    Unknown(u32),
}

impl From<u32> for ErrorCode {
    fn from(v: u32) -> Self {
        match v {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            other => Self::Unknown(other),
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> u32 {
        match code {
            ErrorCode::NoError => 0x0,
            ErrorCode::ProtocolError => 0x1,
            ErrorCode::InternalError => 0x2,
            ErrorCode::FlowControlError => 0x3,
            ErrorCode::SettingsTimeout => 0x4,
            ErrorCode::StreamClosed => 0x5,
            ErrorCode::FrameSizeError => 0x6,
            ErrorCode::RefusedStream => 0x7,
            ErrorCode::Cancel => 0x8,
            ErrorCode::CompressionError => 0x9,
            ErrorCode::ConnectError => 0xa,
            ErrorCode::EnhanceYourCalm => 0xb,
            ErrorCode::InadequateSecurity => 0xc,
            ErrorCode::Http11Required => 0xd,
            ErrorCode::Unknown(v) => v,
        }
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    /// Parse the 9-byte header; the reserved stream-id bit is ignored.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }
        let length = (u32::from(buf[0]) << 16) | (u32::from(buf[1]) << 8) | u32::from(buf[2]);
        let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & 0x7fff_ffff;
        Some(Self {
            length,
            frame_type: FrameType::from(buf[3]),
            flags: buf[4],
            stream_id,
        })
    }

    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u8((self.length >> 16) as u8);
        buf.put_u8((self.length >> 8) as u8);
        buf.put_u8(self.length as u8);
        buf.put_u8(self.frame_type.into());
        buf.put_u8(self.flags);
        buf.put_u32(self.stream_id & 0x7fff_ffff);
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

fn put_header(buf: &mut BytesMut, frame_type: FrameType, flags: u8, stream_id: u32, length: usize) {
    FrameHeader {
        length: length as u32,
        frame_type,
        flags,
        stream_id,
    }
    .serialize(buf);
}

fn put_dependency(buf: &mut BytesMut, dep: &StreamDependency) {
    let mut id = dep.depends_on & 0x7fff_ffff;
    if dep.exclusive {
        id |= 0x8000_0000;
    }
    buf.put_u32(id);
    buf.put_u8(dep.weight);
}

pub fn encode_settings(buf: &mut BytesMut, settings: &[(u16, u32)]) {
    put_header(buf, FrameType::Settings, 0, 0, settings.len() * 6);
    for (id, value) in settings {
        buf.put_u16(*id);
        buf.put_u32(*value);
    }
}

pub fn encode_settings_ack(buf: &mut BytesMut) {
    put_header(buf, FrameType::Settings, flags::ACK, 0, 0);
}

pub fn encode_window_update(buf: &mut BytesMut, stream_id: u32, increment: u32) {
    put_header(buf, FrameType::WindowUpdate, 0, stream_id, 4);
    buf.put_u32(increment & 0x7fff_ffff);
}

pub fn encode_priority(buf: &mut BytesMut, stream_id: u32, dep: &StreamDependency) {
    put_header(buf, FrameType::Priority, 0, stream_id, 5);
    put_dependency(buf, dep);
}

pub fn encode_ping(buf: &mut BytesMut, payload: [u8; 8], ack: bool) {
    put_header(buf, FrameType::Ping, if ack { flags::ACK } else { 0 }, 0, 8);
    buf.put_slice(&payload);
}

pub fn encode_rst_stream(buf: &mut BytesMut, stream_id: u32, code: ErrorCode) {
    put_header(buf, FrameType::RstStream, 0, stream_id, 4);
    buf.put_u32(code.into());
}

pub fn encode_goaway(buf: &mut BytesMut, last_stream_id: u32, code: ErrorCode) {
    put_header(buf, FrameType::GoAway, 0, 0, 8);
    buf.put_u32(last_stream_id & 0x7fff_ffff);
    buf.put_u32(code.into());
}

pub fn encode_data(buf: &mut BytesMut, stream_id: u32, data: &[u8], end_stream: bool) {
    let flags = if end_stream { flags::END_STREAM } else { 0 };
    put_header(buf, FrameType::Data, flags, stream_id, data.len());
    buf.put_slice(data);
}

/// HEADERS followed by as many CONTINUATION frames as `max_frame_size`
/// requires. The priority block, if any, counts against the first frame.
pub fn encode_headers(
    buf: &mut BytesMut,
    stream_id: u32,
    block: &[u8],
    priority: Option<&StreamDependency>,
    end_stream: bool,
    max_frame_size: usize,
) {
    let priority_len = if priority.is_some() { 5 } else { 0 };
    let first_len = block.len().min(max_frame_size.saturating_sub(priority_len).max(1));
    let (first, mut rest) = block.split_at(first_len);

    let mut f = 0;
    if end_stream {
        f |= flags::END_STREAM;
    }
    if rest.is_empty() {
        f |= flags::END_HEADERS;
    }
    if priority.is_some() {
        f |= flags::PRIORITY;
    }
    put_header(buf, FrameType::Headers, f, stream_id, priority_len + first.len());
    if let Some(dep) = priority {
        put_dependency(buf, dep);
    }
    buf.put_slice(first);

    while !rest.is_empty() {
        let n = rest.len().min(max_frame_size.max(1));
        let (chunk, tail) = rest.split_at(n);
        let f = if tail.is_empty() { flags::END_HEADERS } else { 0 };
        put_header(buf, FrameType::Continuation, f, stream_id, chunk.len());
        buf.put_slice(chunk);
        rest = tail;
    }
}

/// Strip the pad-length byte and trailing padding of a PADDED frame.
pub fn strip_padding(header: &FrameHeader, mut payload: Bytes) -> Result<Bytes> {
    if !header.has(flags::PADDED) {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(Error::http_protocol("padded frame without pad length"));
    }
    let pad = payload.get_u8() as usize;
    if pad > payload.len() {
        return Err(Error::http_protocol("padding exceeds frame payload"));
    }
    payload.truncate(payload.len() - pad);
    Ok(payload)
}

/// Parse a SETTINGS payload into (id, value) pairs.
pub fn parse_settings(mut payload: Bytes) -> Result<Vec<(u16, u32)>> {
    if payload.len() % 6 != 0 {
        return Err(Error::http_protocol("SETTINGS payload not a multiple of 6"));
    }
    let mut settings = Vec::with_capacity(payload.len() / 6);
    while payload.remaining() >= 6 {
        settings.push((payload.get_u16(), payload.get_u32()));
    }
    Ok(settings)
}

pub fn parse_u32(payload: &[u8]) -> Result<u32> {
    let bytes: [u8; 4] = payload
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::http_protocol("frame payload too short"))?;
    Ok(u32::from_be_bytes(bytes))
}

/// GOAWAY payload: (last stream id, error code).
pub fn parse_goaway(payload: &[u8]) -> Result<(u32, ErrorCode)> {
    if payload.len() < 8 {
        return Err(Error::http_protocol("GOAWAY payload too short"));
    }
    let last = parse_u32(&payload[..4])? & 0x7fff_ffff;
    let code = ErrorCode::from(parse_u32(&payload[4..8])?);
    Ok((last, code))
}
