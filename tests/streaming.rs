use std::io::Write;
use std::time::Duration;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use guise::{Error, Session, Timeouts};

mod helpers;
use helpers::mock_server::{MockHttpServer, MockResponse};

fn chunked(pieces: &[&[u8]]) -> Vec<u8> {
    let mut out = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    for piece in pieces {
        out.extend_from_slice(format!("{:x}\r\n", piece.len()).as_bytes());
        out.extend_from_slice(piece);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

#[tokio::test]
async fn test_iter_lines_over_chunked_body() {
    let body = chunked(&[b"event: a\r", b"\ndata: h\xc3", b"\xa9llo\n\nlast"]);
    let server = MockHttpServer::start(move |_| MockResponse::raw(body.clone())).await;
    let session = Session::new("chrome_131").unwrap();

    let mut resp = session.get(&server.url("/events")).stream(true).send().await.unwrap();
    let mut lines = resp.iter_lines(3, None).unwrap();
    let mut seen = Vec::new();
    while let Some(line) = lines.next().await.unwrap() {
        seen.push(line);
    }
    assert_eq!(seen, vec!["event: a", "data: héllo", "", "last"]);
}

#[tokio::test]
async fn test_iter_lines_custom_delimiter() {
    let server = MockHttpServer::start(|_| MockResponse::ok("a;b;;c")).await;
    let session = Session::new("chrome_131").unwrap();

    let mut resp = session.get(&server.url("/")).stream(true).send().await.unwrap();
    let lines = resp.iter_lines(2, Some(";")).unwrap().collect().await.unwrap();
    assert_eq!(lines, vec!["a", "b", "", "c"]);
}

#[tokio::test]
async fn test_content_after_iteration_is_consumed() {
    let server = MockHttpServer::start(|_| MockResponse::ok("0123456789")).await;
    let session = Session::new("chrome_131").unwrap();

    let mut resp = session.get(&server.url("/")).stream(true).send().await.unwrap();
    let mut chunks = resp.iter_content(4).unwrap();
    let mut sizes = Vec::new();
    while let Some(chunk) = chunks.next().await.unwrap() {
        sizes.push(chunk.len());
    }
    assert_eq!(sizes.iter().sum::<usize>(), 10);
    assert!(sizes.iter().all(|&n| n <= 4));

    assert!(matches!(resp.content().await, Err(Error::ContentConsumed)));
    assert!(matches!(resp.iter_lines(1, None), Err(Error::ContentConsumed)));
}

#[tokio::test]
async fn test_buffered_response_can_be_iterated() {
    let server = MockHttpServer::start(|_| MockResponse::ok("x\ny\n")).await;
    let session = Session::new("chrome_131").unwrap();

    let mut resp = session.get(&server.url("/")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "x\ny\n");
    let lines = resp.iter_lines(1, None).unwrap().collect().await.unwrap();
    assert_eq!(lines, vec!["x", "y"]);
    assert_eq!(resp.text().await.unwrap(), "x\ny\n");
}

#[tokio::test]
async fn test_gzip_body_is_decoded() {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&b"compressible ".repeat(200)).unwrap();
    let gz = enc.finish().unwrap();
    let server = MockHttpServer::start(move |_| MockResponse::ok(gz.clone()).header("Content-Encoding", "gzip")).await;
    let session = Session::new("chrome_131").unwrap();

    let mut resp = session.get(&server.url("/")).send().await.unwrap();
    assert_eq!(resp.content().await.unwrap().len(), 13 * 200);
    assert_eq!(resp.headers().get("content-encoding"), Some("gzip"));
}

#[tokio::test]
async fn test_streamed_request_body() {
    let server = MockHttpServer::start(|req| {
        MockResponse::ok(req.body.clone()).header("X-TE", req.header("transfer-encoding").unwrap_or("none"))
    })
    .await;
    let session = Session::new("chrome_131").unwrap();

    let (tx, rx) = tokio::sync::mpsc::channel(4);
    tokio::spawn(async move {
        for part in ["alpha,", "beta,", "gamma"] {
            tx.send(Bytes::from(part)).await.unwrap();
        }
    });
    let mut resp = session.post(&server.url("/upload")).body_stream(rx).send().await.unwrap();
    assert_eq!(resp.headers().get("x-te"), Some("chunked"));
    assert_eq!(resp.text().await.unwrap(), "alpha,beta,gamma");
}

#[tokio::test]
async fn test_read_idle_timeout() {
    // Promises 100 bytes, sends 5, then goes quiet.
    let server = MockHttpServer::start(|_| MockResponse::raw(&b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nhello"[..])).await;
    let session = Session::builder()
        .timeouts(Timeouts::api_defaults().read_idle(Duration::from_millis(200)))
        .build()
        .unwrap();

    let mut resp = session.get(&server.url("/")).stream(true).send().await.unwrap();
    let mut chunks = resp.iter_content(1024).unwrap();
    assert_eq!(chunks.next().await.unwrap().unwrap(), "hello");
    let err = chunks.next().await.unwrap_err();
    assert!(err.is_timeout(), "{err}");
}

#[tokio::test]
async fn test_total_timeout_covers_the_body() {
    let server = MockHttpServer::start(|_| MockResponse::raw(&b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc"[..])).await;
    let session = Session::builder()
        .timeouts(Timeouts::new().total(Duration::from_millis(300)))
        .build()
        .unwrap();

    let err = session.get(&server.url("/")).send().await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "{err}");
}
