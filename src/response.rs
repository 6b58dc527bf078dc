//! HTTP response: head, cookies, redirect history and a lazily read body.

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use url::Url;

use crate::cookie::CookieJar;
use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::status;
use crate::stream::{ChunkStream, LineStream};
use crate::transport::body::ResponseBody;
use crate::version::HttpVersion;

/// One redirect leg that led to the final response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectHop {
    pub status: u16,
    pub url: Url,
    pub headers: Headers,
}

enum BodyState {
    Unread(ResponseBody),
    Buffered(Bytes),
    /// Handed to a chunk or line iterator.
    Consumed,
}

/// Response to a request issued by a [`Session`](crate::Session).
///
/// The body stays on the connection until it is read. [`content`](Self::content)
/// reads it once and caches it; iterating with
/// [`iter_content`](Self::iter_content) or [`iter_lines`](Self::iter_lines)
/// hands the stream over, after which the content can no longer be read.
pub struct Response {
    status: u16,
    version: HttpVersion,
    headers: Headers,
    url: Url,
    cookies: CookieJar,
    history: Vec<RedirectHop>,
    trailers: Option<Headers>,
    body: BodyState,
}

impl Response {
    pub(crate) fn new(
        status: u16,
        version: HttpVersion,
        headers: Headers,
        url: Url,
        cookies: CookieJar,
        body: ResponseBody,
    ) -> Self {
        Self {
            status,
            version,
            headers,
            url,
            cookies,
            history: Vec::new(),
            trailers: None,
            body: BodyState::Unread(body),
        }
    }

    pub(crate) fn set_history(&mut self, history: Vec<RedirectHop>) {
        self.history = history;
    }

    /// Read the body now so the connection is released.
    pub(crate) async fn buffer(&mut self) -> Result<()> {
        self.content().await.map(|_| ())
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    /// Reason phrase for the status code, `"UNKNOWN"` if it has none.
    pub fn reason(&self) -> &'static str {
        status::reason_phrase(self.status)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Cookies set while producing this response, redirect legs included.
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// Final URL after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Redirect responses that preceded this one, oldest first.
    pub fn history(&self) -> &[RedirectHop] {
        &self.history
    }

    pub fn http_version(&self) -> HttpVersion {
        self.version
    }

    /// Status below 400.
    pub fn ok(&self) -> bool {
        status::error_class(self.status).is_none()
    }

    pub fn is_redirect(&self) -> bool {
        status::is_redirect(self.status) && self.headers.contains("location")
    }

    /// HTTP/2 trailers, available once `content` has read the body.
    pub fn trailers(&self) -> Option<&Headers> {
        self.trailers.as_ref()
    }

    /// `Err(HttpStatus)` for 4xx and 5xx responses.
    pub fn raise_for_status(&self) -> Result<()> {
        match status::error_class(self.status) {
            Some(class) => Err(Error::HttpStatus {
                status: self.status,
                class,
                reason: self.reason(),
                url: self.url.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Whole decoded body, read on first access and cached.
    pub async fn content(&mut self) -> Result<&Bytes> {
        if let BodyState::Unread(body) = &mut self.body {
            match body.collect().await {
                Ok(bytes) => {
                    self.trailers = body.trailers().cloned();
                    self.body = BodyState::Buffered(bytes);
                }
                Err(e) => {
                    self.body = BodyState::Consumed;
                    return Err(e);
                }
            }
        }
        match &self.body {
            BodyState::Buffered(bytes) => Ok(bytes),
            _ => Err(Error::ContentConsumed),
        }
    }

    /// Body as text; invalid UTF-8 is replaced.
    pub async fn text(&mut self) -> Result<String> {
        let content = self.content().await?;
        Ok(match std::str::from_utf8(content) {
            Ok(s) => s.to_string(),
            Err(_) => String::from_utf8_lossy(content).into_owned(),
        })
    }

    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let content = self.content().await?;
        Ok(serde_json::from_slice(content)?)
    }

    /// Body in chunks of at most `chunk_size` bytes.
    pub fn iter_content(&mut self, chunk_size: usize) -> Result<ChunkStream> {
        match std::mem::replace(&mut self.body, BodyState::Consumed) {
            BodyState::Unread(body) => Ok(ChunkStream::from_body(body, chunk_size)),
            BodyState::Buffered(bytes) => {
                self.body = BodyState::Buffered(bytes.clone());
                Ok(ChunkStream::from_cached(bytes, chunk_size))
            }
            BodyState::Consumed => Err(Error::ContentConsumed),
        }
    }

    /// Body as lines, split on `delimiter` or on universal newlines.
    pub fn iter_lines(&mut self, chunk_size: usize, delimiter: Option<&str>) -> Result<LineStream> {
        let chunks = self.iter_content(chunk_size)?;
        Ok(LineStream::new(chunks, delimiter.map(str::to_string)))
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            BodyState::Unread(_) => "unread",
            BodyState::Buffered(_) => "buffered",
            BodyState::Consumed => "consumed",
        };
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("url", &self.url.as_str())
            .field("body", &body)
            .finish()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Response [{}]>", self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &'static [u8]) -> Response {
        Response::new(
            status,
            HttpVersion::Http1_1,
            Headers::new(),
            Url::parse("https://example.com/missing").unwrap(),
            CookieJar::new(),
            ResponseBody::from_bytes(Bytes::from_static(body)),
        )
    }

    #[test]
    fn test_raise_for_status_message() {
        let err = response(404, b"").raise_for_status().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("404"));
        assert!(message.contains("Client Error"));
        assert!(message.contains("https://example.com/missing"));

        let err = response(503, b"").raise_for_status().unwrap_err();
        assert!(err.to_string().starts_with("503 Server Error: Service Unavailable"));

        assert!(response(200, b"").raise_for_status().is_ok());
        assert!(response(302, b"").raise_for_status().is_ok());
    }

    #[test]
    fn test_reason_and_ok() {
        assert_eq!(response(418, b"").reason(), "I'm a teapot");
        assert_eq!(response(299, b"").reason(), "UNKNOWN");
        assert!(response(399, b"").ok());
        assert!(!response(400, b"").ok());
    }

    #[tokio::test]
    async fn test_content_is_cached() {
        let mut resp = response(200, b"{\"a\": [1, 2]}");
        assert_eq!(resp.content().await.unwrap(), &Bytes::from_static(b"{\"a\": [1, 2]}"));
        assert_eq!(resp.text().await.unwrap(), "{\"a\": [1, 2]}");
        let value: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(value["a"][1], 2);
        // Iterating a cached body is fine and leaves it cached.
        let chunks = resp.iter_content(4).unwrap().collect().await.unwrap();
        assert_eq!(chunks.len(), 13);
        assert!(resp.content().await.is_ok());
    }

    #[tokio::test]
    async fn test_content_after_iteration_fails() {
        let mut resp = response(200, b"line one\nline two\n");
        let lines = resp.iter_lines(5, None).unwrap().collect().await.unwrap();
        assert_eq!(lines, vec!["line one", "line two"]);
        assert!(matches!(resp.content().await, Err(Error::ContentConsumed)));
        assert!(matches!(resp.iter_content(1), Err(Error::ContentConsumed)));
    }

    #[tokio::test]
    async fn test_invalid_json_is_parse_error() {
        let mut resp = response(200, b"not json");
        let err = resp.json::<serde_json::Value>().await.unwrap_err();
        assert!(err.is_parse());
    }
}
