use guise::{Error, HttpVersion, Session};

mod helpers;
use helpers::mock_server::{MockHttpServer, MockResponse};
use helpers::tls::h1_acceptor;

#[tokio::test]
async fn test_untrusted_certificate_fails_handshake() {
    helpers::init_tracing();
    let (acceptor, _cert) = h1_acceptor();
    let server = MockHttpServer::start_tls(acceptor, |_| MockResponse::ok("secret")).await;
    let session = Session::new("chrome_131").unwrap();

    let err = session.get(&server.url_tls("/")).send().await.unwrap_err();
    assert!(matches!(err, Error::TlsHandshake { .. }), "{err}");
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn test_insecure_skips_verification() {
    let (acceptor, _cert) = h1_acceptor();
    let server = MockHttpServer::start_tls(acceptor, |_| MockResponse::ok("secret")).await;
    let session = Session::builder().profile("firefox_133").insecure(true).build().unwrap();

    let mut resp = session.get(&server.url_tls("/")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "secret");
}

#[tokio::test]
async fn test_extra_root_certificate() {
    let (acceptor, cert) = h1_acceptor();
    let server = MockHttpServer::start_tls(acceptor, |_| MockResponse::ok("Hello")).await;
    let session = Session::builder()
        .profile("chrome_131")
        .add_root_certificate(cert.cert_pem.as_bytes())
        .build()
        .unwrap();

    for _ in 0..2 {
        let mut resp = session.get(&server.url_tls("/")).send().await.unwrap();
        assert_eq!(resp.http_version(), HttpVersion::Http1_1);
        assert_eq!(resp.text().await.unwrap(), "Hello");
    }
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_every_builtin_profile_completes_a_handshake() {
    let (acceptor, cert) = h1_acceptor();
    let server = MockHttpServer::start_tls(acceptor, |req| {
        MockResponse::ok(req.header("user-agent").unwrap_or_default().to_string())
    })
    .await;

    for name in guise::catalog().names() {
        let session = Session::builder()
            .profile(name.clone())
            .add_root_certificate(cert.cert_pem.as_bytes())
            .build()
            .unwrap();
        let mut resp = session
            .get(&server.url_tls("/"))
            .send()
            .await
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        assert_eq!(resp.text().await.unwrap(), session.profile().user_agent, "{name}");
    }
}

#[tokio::test]
async fn test_http1_only_never_negotiates_h2() {
    let cert = helpers::tls::self_signed();
    let acceptor = helpers::tls::acceptor(&cert, b"\x02h2\x08http/1.1");
    let server = MockHttpServer::start_tls(acceptor, |_| MockResponse::ok("h1")).await;
    let session = Session::builder()
        .add_root_certificate(cert.cert_pem.as_bytes())
        .http1_only(true)
        .build()
        .unwrap();

    let mut resp = session.get(&server.url_tls("/")).send().await.unwrap();
    assert_eq!(resp.http_version(), HttpVersion::Http1_1);
    assert_eq!(resp.text().await.unwrap(), "h1");
}
