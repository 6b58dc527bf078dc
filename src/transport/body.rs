//! Response body stream shared by both protocol versions.
//!
//! Wraps the protocol body (`H1Body` or `H2Body`), applies content
//! decoding, and enforces the read-idle timeout and the request deadline
//! on every read. Any failure aborts the stream, which discards the
//! HTTP/1.1 connection or resets the HTTP/2 stream.

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use super::h1::H1Body;
use super::h2::H2Body;
use crate::encoding::ContentDecoder;
use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::timeouts::Deadline;

enum Source {
    Empty,
    Buffered(Option<Bytes>),
    Http1(H1Body),
    Http2(H2Body),
}

pub struct ResponseBody {
    source: Source,
    decoder: ContentDecoder,
    read_idle: Option<Duration>,
    deadline: Deadline,
    trailers: Option<Headers>,
    finished: bool,
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self::new(Source::Empty, ContentDecoder::identity(), None, Deadline::unbounded())
    }

    /// A body whose bytes are already in memory and decoded.
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self::new(
            Source::Buffered(Some(bytes)),
            ContentDecoder::identity(),
            None,
            Deadline::unbounded(),
        )
    }

    pub fn http1(body: H1Body, decoder: ContentDecoder, read_idle: Option<Duration>, deadline: Deadline) -> Self {
        Self::new(Source::Http1(body), decoder, read_idle, deadline)
    }

    pub fn http2(body: H2Body, decoder: ContentDecoder, read_idle: Option<Duration>, deadline: Deadline) -> Self {
        Self::new(Source::Http2(body), decoder, read_idle, deadline)
    }

    fn new(source: Source, decoder: ContentDecoder, read_idle: Option<Duration>, deadline: Deadline) -> Self {
        Self {
            source,
            decoder,
            read_idle,
            deadline,
            trailers: None,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// HTTP/2 trailers, once the body has been read to the end.
    pub fn trailers(&self) -> Option<&Headers> {
        self.trailers.as_ref()
    }

    /// Next decoded chunk; `None` at end of body.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            let raw = match self.next_raw().await {
                Ok(raw) => raw,
                Err(e) => {
                    self.abort();
                    return Err(e);
                }
            };
            let decoded = match raw {
                Some(raw) => self.decoder.feed(&raw),
                None => {
                    self.finish_source();
                    let tail = self.decoder.finish()?;
                    return Ok((!tail.is_empty()).then_some(tail));
                }
            };
            match decoded {
                Ok(out) if out.is_empty() => continue,
                Ok(out) => return Ok(Some(out)),
                Err(e) => {
                    self.abort();
                    return Err(e);
                }
            }
        }
    }

    /// Read everything that is left.
    pub async fn collect(&mut self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    async fn next_raw(&mut self) -> Result<Option<Bytes>> {
        let idle = self.read_idle;
        let source = &mut self.source;
        let read = async move {
            match source {
                Source::Empty => Ok(None),
                Source::Buffered(bytes) => Ok(bytes.take()),
                Source::Http1(body) => body.next_raw().await,
                Source::Http2(body) => body.next_raw().await,
            }
        };
        let read = async move {
            match idle {
                Some(idle) => tokio::time::timeout(idle, read)
                    .await
                    .map_err(|_| Error::timeout("read idle", idle))?,
                None => read.await,
            }
        };
        self.deadline.run("read body", read).await
    }

    fn finish_source(&mut self) {
        self.finished = true;
        if let Source::Http2(body) = &self.source {
            self.trailers = body.trailers().cloned();
        }
        // H1Body has already handed its connection back by now.
        self.source = Source::Empty;
    }

    /// Stop reading; the underlying connection or stream is not reusable.
    pub fn abort(&mut self) {
        if !self.finished {
            tracing::debug!("aborting response body");
        }
        self.finished = true;
        self.source = Source::Empty;
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Source::Empty => "empty",
            Source::Buffered(_) => "buffered",
            Source::Http1(_) => "http1",
            Source::Http2(_) => "http2",
        };
        f.debug_struct("ResponseBody")
            .field("source", &source)
            .field("decoder", &self.decoder)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[tokio::test]
    async fn test_buffered_body() {
        let mut body = ResponseBody::from_bytes(Bytes::from_static(b"abc"));
        assert_eq!(body.next_chunk().await.unwrap().unwrap(), "abc");
        assert!(body.next_chunk().await.unwrap().is_none());
        assert!(body.is_finished());
    }

    #[tokio::test]
    async fn test_decoding_applies() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"compressed payload").unwrap();
        let gz = enc.finish().unwrap();
        let decoder = ContentDecoder::for_encoding("gzip").unwrap();
        let mut body = ResponseBody::new(
            Source::Buffered(Some(Bytes::from(gz))),
            decoder,
            None,
            Deadline::unbounded(),
        );
        assert_eq!(body.collect().await.unwrap(), "compressed payload");
    }

    #[tokio::test]
    async fn test_empty_body() {
        let mut body = ResponseBody::empty();
        assert_eq!(body.collect().await.unwrap(), "");
    }
}
