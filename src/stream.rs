//! Incremental iteration over a response body: fixed-size byte chunks and
//! decoded text lines.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::error::Result;
use crate::transport::body::ResponseBody;

enum ChunkSource {
    Body(ResponseBody),
    Cached(Bytes),
}

/// Body bytes in chunks of at most `chunk_size`.
pub struct ChunkStream {
    source: ChunkSource,
    pending: BytesMut,
    chunk_size: usize,
}

impl ChunkStream {
    pub(crate) fn from_body(body: ResponseBody, chunk_size: usize) -> Self {
        Self {
            source: ChunkSource::Body(body),
            pending: BytesMut::new(),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Iterate over content that was already read into memory.
    pub(crate) fn from_cached(content: Bytes, chunk_size: usize) -> Self {
        Self {
            source: ChunkSource::Cached(content),
            pending: BytesMut::new(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn next(&mut self) -> Result<Option<Bytes>> {
        if self.pending.is_empty() {
            match &mut self.source {
                ChunkSource::Cached(content) => {
                    let n = self.chunk_size.min(content.len());
                    let chunk = content.split_to(n);
                    return Ok((!chunk.is_empty()).then_some(chunk));
                }
                ChunkSource::Body(body) => match body.next_chunk().await? {
                    Some(chunk) if chunk.len() <= self.chunk_size => return Ok(Some(chunk)),
                    Some(chunk) => self.pending.extend_from_slice(&chunk),
                    None => return Ok(None),
                },
            }
        }
        let n = self.chunk_size.min(self.pending.len());
        Ok(Some(self.pending.split_to(n).freeze()))
    }

    /// Remaining bytes concatenated.
    pub async fn collect(mut self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }
}

/// Body as UTF-8 lines.
///
/// Lines split on `delimiter` when given, otherwise on universal newlines
/// (`\n`, `\r\n`, `\r` and the other Unicode line boundaries). Line
/// terminators are not included. Output does not depend on where the
/// body's chunk boundaries fall.
pub struct LineStream {
    chunks: ChunkStream,
    delimiter: Option<String>,
    /// Bytes of a multi-byte sequence split across chunks.
    utf8_carry: Vec<u8>,
    /// Partial line carried across chunks.
    line: String,
    /// A `\r` ended the previous chunk; a leading `\n` belongs to it.
    pending_cr: bool,
    ready: VecDeque<String>,
    finished: bool,
}

impl LineStream {
    pub(crate) fn new(chunks: ChunkStream, delimiter: Option<String>) -> Self {
        Self {
            chunks,
            delimiter: delimiter.filter(|d| !d.is_empty()),
            utf8_carry: Vec::new(),
            line: String::new(),
            pending_cr: false,
            ready: VecDeque::new(),
            finished: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(line));
            }
            if self.finished {
                return Ok(None);
            }
            match self.chunks.next().await? {
                Some(chunk) => {
                    let text = decode_utf8(&mut self.utf8_carry, &chunk);
                    self.push_text(&text);
                }
                None => {
                    self.finished = true;
                    if !self.utf8_carry.is_empty() {
                        let tail = String::from_utf8_lossy(&self.utf8_carry).into_owned();
                        self.utf8_carry.clear();
                        self.push_text(&tail);
                    }
                    if !self.line.is_empty() {
                        self.ready.push_back(std::mem::take(&mut self.line));
                    }
                }
            }
        }
    }

    /// Remaining lines.
    pub async fn collect(mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.next().await? {
            lines.push(line);
        }
        Ok(lines)
    }

    fn push_text(&mut self, text: &str) {
        match &self.delimiter {
            Some(delimiter) => {
                self.line.push_str(text);
                while let Some(pos) = self.line.find(delimiter.as_str()) {
                    let rest = self.line.split_off(pos + delimiter.len());
                    let mut line = std::mem::replace(&mut self.line, rest);
                    line.truncate(pos);
                    self.ready.push_back(line);
                }
            }
            None => {
                for ch in text.chars() {
                    if std::mem::take(&mut self.pending_cr) && ch == '\n' {
                        continue;
                    }
                    match ch {
                        '\r' => {
                            self.ready.push_back(std::mem::take(&mut self.line));
                            self.pending_cr = true;
                        }
                        '\n' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}' => {
                            self.ready.push_back(std::mem::take(&mut self.line));
                        }
                        _ => self.line.push(ch),
                    }
                }
            }
        }
    }
}

/// Decode `chunk` after any carried partial sequence. An incomplete
/// sequence at the end is carried; invalid bytes become U+FFFD.
fn decode_utf8(carry: &mut Vec<u8>, chunk: &[u8]) -> String {
    let mut bytes = std::mem::take(carry);
    bytes.extend_from_slice(chunk);
    let mut out = String::with_capacity(bytes.len());
    let mut rest = &bytes[..];
    loop {
        match std::str::from_utf8(rest) {
            Ok(s) => {
                out.push_str(s);
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                if let Ok(s) = std::str::from_utf8(valid) {
                    out.push_str(s);
                }
                match e.error_len() {
                    Some(n) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[n..];
                    }
                    None => {
                        carry.extend_from_slice(after);
                        break;
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A stream whose body arrives in exactly the given pieces.
    fn lines_from(pieces: &[&[u8]], delimiter: Option<&str>) -> LineStream {
        let mut stream = LineStream::new(ChunkStream::from_cached(Bytes::new(), 1), delimiter.map(String::from));
        for piece in pieces {
            let text = decode_utf8(&mut stream.utf8_carry, piece);
            stream.push_text(&text);
        }
        stream
    }

    async fn drain(mut stream: LineStream) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(line) = stream.next().await.unwrap() {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn test_lines_independent_of_chunking() {
        let body = "alpha\r\nbeta\ngamma\rdelta\r\n\r\nepsilon".as_bytes();
        let expected = vec!["alpha", "beta", "gamma", "delta", "", "epsilon"];
        for size in 1..body.len() {
            let pieces: Vec<&[u8]> = body.chunks(size).collect();
            assert_eq!(drain(lines_from(&pieces, None)).await, expected, "chunk size {size}");
        }
    }

    #[tokio::test]
    async fn test_cr_lf_split_across_chunks() {
        let lines = drain(lines_from(&[b"a\r", b"\nb"], None)).await;
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_multibyte_split() {
        let body = "héllo\nwörld".as_bytes();
        let lines = drain(lines_from(&[&body[..2], &body[2..9], &body[9..]], None)).await;
        assert_eq!(lines, vec!["héllo", "wörld"]);
    }

    #[tokio::test]
    async fn test_custom_delimiter() {
        let lines = drain(lines_from(&[b"a||b|", b"|c||"], Some("||"))).await;
        assert_eq!(lines, vec!["a", "b", "c"]);
        let lines = drain(lines_from(&[b"a,,b"], Some(","))).await;
        assert_eq!(lines, vec!["a", "", "b"]);
    }

    #[tokio::test]
    async fn test_trailing_newline_no_empty_line() {
        assert_eq!(drain(lines_from(&[b"x\ny\n"], None)).await, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_chunk_sizes() {
        let mut chunks = ChunkStream::from_cached(Bytes::from_static(b"0123456789"), 4);
        let mut sizes = Vec::new();
        while let Some(chunk) = chunks.next().await.unwrap() {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![4, 4, 2]);

        let body = ResponseBody::from_bytes(Bytes::from_static(b"0123456789"));
        let mut chunks = ChunkStream::from_body(body, 3);
        let mut collected = Vec::new();
        while let Some(chunk) = chunks.next().await.unwrap() {
            assert!(chunk.len() <= 3);
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"0123456789");
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let mut carry = Vec::new();
        assert_eq!(decode_utf8(&mut carry, b"a\xffb"), "a\u{fffd}b");
        assert_eq!(decode_utf8(&mut carry, b"\xe2\x82"), "");
        assert_eq!(carry.len(), 2);
        assert_eq!(decode_utf8(&mut carry, b"\xac"), "€");
    }
}
