//! Incremental Content-Encoding decoding (gzip, deflate, br, zstd).
//!
//! Decoders are push-based: compressed bytes go in as they arrive from the
//! connection, decoded bytes come out. Buffered and streamed reads share the
//! same path.

use std::io::Write;

use bytes::Bytes;
use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};

use crate::error::{Error, Result};
use crate::headers::Headers;

const BROTLI_BUFFER: usize = 4096;

enum Stage {
    Identity,
    Gzip(GzDecoder<Vec<u8>>),
    /// `deflate` is zlib-wrapped per RFC 9110, but raw deflate is common;
    /// the first two bytes decide.
    DeflateSniff(Vec<u8>),
    Zlib(ZlibDecoder<Vec<u8>>),
    RawDeflate(DeflateDecoder<Vec<u8>>),
    Brotli(Box<brotli::DecompressorWriter<Vec<u8>>>),
    Zstd(zstd::stream::write::Decoder<'static, Vec<u8>>),
}

impl Stage {
    fn for_token(token: &str) -> Result<Self> {
        Ok(match token {
            "gzip" | "x-gzip" => Stage::Gzip(GzDecoder::new(Vec::new())),
            "deflate" => Stage::DeflateSniff(Vec::new()),
            "br" => Stage::Brotli(Box::new(brotli::DecompressorWriter::new(
                Vec::new(),
                BROTLI_BUFFER,
            ))),
            "zstd" => Stage::Zstd(
                zstd::stream::write::Decoder::new(Vec::new())
                    .map_err(|e| Error::Decompression(format!("zstd: {e}")))?,
            ),
            "identity" | "" => Stage::Identity,
            other => {
                tracing::warn!(encoding = other, "unsupported content-encoding, passing through");
                Stage::Identity
            }
        })
    }

    fn name(&self) -> &'static str {
        match self {
            Stage::Identity => "identity",
            Stage::Gzip(_) => "gzip",
            Stage::DeflateSniff(_) | Stage::Zlib(_) | Stage::RawDeflate(_) => "deflate",
            Stage::Brotli(_) => "br",
            Stage::Zstd(_) => "zstd",
        }
    }

    fn feed(&mut self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            Stage::Identity => Ok(data.to_vec()),
            Stage::Gzip(d) => {
                d.write_all(data)?;
                Ok(std::mem::take(d.get_mut()))
            }
            Stage::DeflateSniff(pending) => {
                pending.extend_from_slice(data);
                if pending.len() < 2 {
                    return Ok(Vec::new());
                }
                let head = std::mem::take(pending);
                *self = if is_zlib_header(head[0], head[1]) {
                    Stage::Zlib(ZlibDecoder::new(Vec::new()))
                } else {
                    Stage::RawDeflate(DeflateDecoder::new(Vec::new()))
                };
                self.feed(&head)
            }
            Stage::Zlib(d) => {
                d.write_all(data)?;
                Ok(std::mem::take(d.get_mut()))
            }
            Stage::RawDeflate(d) => {
                d.write_all(data)?;
                Ok(std::mem::take(d.get_mut()))
            }
            Stage::Brotli(d) => {
                d.write_all(data)?;
                Ok(std::mem::take(d.get_mut()))
            }
            Stage::Zstd(d) => {
                d.write_all(data)?;
                d.flush()?;
                Ok(std::mem::take(d.get_mut()))
            }
        }
    }

    fn finish(&mut self) -> std::io::Result<Vec<u8>> {
        match self {
            Stage::Identity => Ok(Vec::new()),
            Stage::Gzip(d) => {
                d.try_finish()?;
                Ok(std::mem::take(d.get_mut()))
            }
            Stage::DeflateSniff(pending) => {
                if pending.is_empty() {
                    return Ok(Vec::new());
                }
                // A single byte can't be a complete stream in either framing.
                let head = std::mem::take(pending);
                *self = Stage::RawDeflate(DeflateDecoder::new(Vec::new()));
                let mut out = self.feed(&head)?;
                out.extend(self.finish()?);
                Ok(out)
            }
            Stage::Zlib(d) => {
                d.try_finish()?;
                Ok(std::mem::take(d.get_mut()))
            }
            Stage::RawDeflate(d) => {
                d.try_finish()?;
                Ok(std::mem::take(d.get_mut()))
            }
            Stage::Brotli(d) => {
                d.close()?;
                Ok(std::mem::take(d.get_mut()))
            }
            Stage::Zstd(d) => {
                d.flush()?;
                Ok(std::mem::take(d.get_mut()))
            }
        }
    }
}

fn is_zlib_header(cmf: u8, flg: u8) -> bool {
    cmf & 0x0f == 8 && (u16::from(cmf) << 8 | u16::from(flg)) % 31 == 0
}

/// Push decoder for a response's Content-Encoding chain.
pub struct ContentDecoder {
    /// In decoding order: the last listed coding is undone first.
    stages: Vec<Stage>,
    fed: bool,
}

impl ContentDecoder {
    /// Decoder that passes bytes through unchanged.
    pub fn identity() -> Self {
        Self {
            stages: Vec::new(),
            fed: false,
        }
    }

    /// Build from a `Content-Encoding` header value such as `"gzip, br"`.
    pub fn for_encoding(value: &str) -> Result<Self> {
        let mut stages = value
            .split(',')
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty() && t != "identity")
            .map(|t| Stage::for_token(&t))
            .collect::<Result<Vec<_>>>()?;
        stages.reverse();
        Ok(Self { stages, fed: false })
    }

    pub fn from_headers(headers: &Headers) -> Result<Self> {
        match headers.get("content-encoding") {
            Some(value) => Self::for_encoding(value),
            None => Ok(Self::identity()),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.stages.iter().all(|s| matches!(s, Stage::Identity))
    }

    /// Decode one chunk of the wire body. May return an empty buffer while
    /// the decoder waits for more input.
    pub fn feed(&mut self, data: &[u8]) -> Result<Bytes> {
        if data.is_empty() {
            return Ok(Bytes::new());
        }
        self.fed = true;
        let mut buf = data.to_vec();
        for stage in &mut self.stages {
            if buf.is_empty() {
                break;
            }
            buf = stage
                .feed(&buf)
                .map_err(|e| Error::Decompression(format!("{}: {e}", stage.name())))?;
        }
        Ok(Bytes::from(buf))
    }

    /// Flush remaining output once the wire body ended.
    pub fn finish(&mut self) -> Result<Bytes> {
        if !self.fed {
            return Ok(Bytes::new());
        }
        let mut carry: Vec<u8> = Vec::new();
        for stage in &mut self.stages {
            let name = stage.name();
            let mut out = if carry.is_empty() {
                Vec::new()
            } else {
                stage
                    .feed(&carry)
                    .map_err(|e| Error::Decompression(format!("{name}: {e}")))?
            };
            out.extend(
                stage
                    .finish()
                    .map_err(|e| Error::Decompression(format!("{name}: {e}")))?,
            );
            carry = out;
        }
        Ok(Bytes::from(carry))
    }
}

impl std::fmt::Debug for ContentDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.stages.iter().map(Stage::name).collect();
        f.debug_struct("ContentDecoder").field("stages", &names).finish()
    }
}

/// Decode a complete body in one go.
pub fn decode_all(encoding: &str, body: &[u8]) -> Result<Bytes> {
    let mut decoder = ContentDecoder::for_encoding(encoding)?;
    let mut out = decoder.feed(body)?.to_vec();
    out.extend_from_slice(&decoder.finish()?);
    Ok(Bytes::from(out))
}
