use std::time::Duration;

use guise::{HttpVersion, Session};

mod helpers;
use helpers::mock_h2_server::MockH2Server;
use helpers::tls::{acceptor, self_signed};

async fn setup(profile: &str) -> (MockH2Server, Session) {
    helpers::init_tracing();
    let cert = self_signed();
    let server = MockH2Server::start(acceptor(&cert, b"\x02h2")).await;
    let session = Session::builder()
        .profile(profile)
        .add_root_certificate(cert.cert_pem.as_bytes())
        .build()
        .unwrap();
    (server, session)
}

#[tokio::test]
async fn test_h2_get() {
    let (server, session) = setup("chrome_131").await;

    let mut resp = tokio::time::timeout(Duration::from_secs(5), session.get(&server.url("/")).send())
        .await
        .expect("request timed out")
        .unwrap();
    assert_eq!(resp.status_code(), 200);
    assert_eq!(resp.http_version(), HttpVersion::Http2);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_h2_strips_connection_headers() {
    let (server, session) = setup("chrome_131").await;

    let mut resp = session.get(&server.url("/headers")).send().await.unwrap();
    let text = resp.text().await.unwrap();
    let mut lines = text.lines();
    let authority = lines.next().unwrap();
    assert!(authority.starts_with("authority=localhost:"), "{authority}");
    let names: Vec<&str> = lines.collect();
    assert!(names.contains(&"user-agent"));
    assert!(names.contains(&"sec-ch-ua"));
    assert!(!names.contains(&"connection"));
    assert!(!names.contains(&"host"));
}

#[tokio::test]
async fn test_h2_multiplexes_one_connection() {
    let (server, session) = setup("firefox_133").await;
    session.get(&server.url("/")).send().await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..16 {
        let session = session.clone();
        let url = server.url("/echo");
        tasks.push(tokio::spawn(async move {
            let mut resp = session.post(&url).body(format!("request {i}")).send().await.unwrap();
            (i, resp.text().await.unwrap())
        }));
    }
    for task in tasks {
        let (i, text) = task.await.unwrap();
        assert_eq!(text, format!("request {i}"));
    }
    assert_eq!(server.connection_count(), 1);
    assert_eq!(session.pool_stats().http2, 1);
}

#[tokio::test]
async fn test_h2_large_bodies_respect_flow_control() {
    let (server, session) = setup("chrome_131").await;

    // Both directions exceed the 65535-byte initial stream window.
    let upload = vec![b'u'; 300_000];
    let mut resp = session
        .put(&server.url("/echo"))
        .body(upload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers().get("x-method"), Some("PUT"));
    assert_eq!(resp.content().await.unwrap().as_ref(), upload.as_slice());

    let mut resp = session
        .get(&server.url("/big?n=1000000"))
        .stream(true)
        .send()
        .await
        .unwrap();
    let mut chunks = resp.iter_content(16 * 1024).unwrap();
    let mut total = 0;
    while let Some(chunk) = chunks.next().await.unwrap() {
        assert!(chunk.iter().all(|&b| b == b'z'));
        total += chunk.len();
    }
    assert_eq!(total, 1_000_000);
}

#[tokio::test]
async fn test_h2_trailers() {
    let (server, session) = setup("chrome_131").await;

    let mut resp = session.get(&server.url("/trailers")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "framed");
    let trailers = resp.trailers().expect("trailers");
    assert_eq!(trailers.get("grpc-status"), Some("0"));
}

#[tokio::test]
async fn test_h2_streamed_body_dropped_early() {
    let (server, session) = setup("chrome_131").await;

    let resp = session
        .get(&server.url("/big?n=500000"))
        .stream(true)
        .send()
        .await
        .unwrap();
    drop(resp);

    // The connection stays usable after the stream is reset.
    let mut resp = session.get(&server.url("/")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "ok");
    assert_eq!(server.connection_count(), 1);
}
