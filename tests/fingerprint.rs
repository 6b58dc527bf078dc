use std::collections::BTreeSet;

use guise::fingerprint::tls::is_grease;
use guise::fingerprint::ClientHelloInfo;
use guise::{catalog, Session};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

mod helpers;

/// Accept one connection, read its first TLS record and hang up.
async fn capture_client_hello(session: Session) -> ClientHelloInfo {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut tcp, _) = listener.accept().await.unwrap();
        let mut header = [0u8; 5];
        tcp.read_exact(&mut header).await.unwrap();
        let len = u16::from_be_bytes([header[3], header[4]]) as usize;
        let mut record = header.to_vec();
        record.resize(5 + len, 0);
        tcp.read_exact(&mut record[5..]).await.unwrap();
        let _ = tx.send(record);
    });

    let err = session
        .get(&format!("https://localhost:{port}/"))
        .send()
        .await
        .unwrap_err();
    assert!(err.is_connection_fatal() || matches!(err, guise::Error::Tls(_)), "{err}");
    ClientHelloInfo::parse(&rx.await.unwrap()).unwrap()
}

fn without_grease(ids: &[u16]) -> Vec<u16> {
    ids.iter().copied().filter(|id| !is_grease(*id)).collect()
}

#[tokio::test]
async fn test_chrome_client_hello() {
    helpers::init_tracing();
    let profile = catalog().get("chrome_131").unwrap();
    let hello = capture_client_hello(Session::new("chrome_131").unwrap()).await;

    assert_eq!(hello.server_name.as_deref(), Some("localhost"));
    assert_eq!(hello.alpn, vec!["h2", "http/1.1"]);
    assert!(hello.cipher_suites.first().copied().is_some_and(is_grease));

    let sent: BTreeSet<u16> = without_grease(&hello.cipher_suites).into_iter().collect();
    let expected: BTreeSet<u16> = without_grease(&profile.tls.cipher_suites).into_iter().collect();
    assert!(sent.is_subset(&expected), "unexpected suites: {:?}", sent.difference(&expected));
    assert!(sent.contains(&0x1301) && sent.contains(&0xc02b));

    // Post-quantum groups may be unavailable; the rest keep profile order.
    let expected_groups = without_grease(&profile.tls.supported_groups);
    let positions: Vec<usize> = without_grease(&hello.supported_groups)
        .iter()
        .map(|g| expected_groups.iter().position(|e| e == g).expect("group not in profile"))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    assert!(hello.supported_groups.contains(&0x001d));
}

#[tokio::test]
async fn test_firefox_has_no_grease() {
    let hello = capture_client_hello(Session::new("firefox_133").unwrap()).await;
    assert!(!hello.cipher_suites.iter().any(|id| is_grease(*id)));
    assert!(!hello.extensions.iter().any(|id| is_grease(*id)));
}

#[tokio::test]
async fn test_http1_only_alpn() {
    let session = Session::builder().profile("chrome_131").http1_only(true).build().unwrap();
    let hello = capture_client_hello(session).await;
    assert_eq!(hello.alpn, vec!["http/1.1"]);
}

#[tokio::test]
async fn test_extension_order_follows_unpermuted_profile() {
    let profile = catalog().get("safari_17_0").unwrap();
    assert!(!profile.tls.permute_extensions);
    let hello = capture_client_hello(Session::new("safari_17_0").unwrap()).await;

    // Every extension we send is one the profile lists, in its relative order.
    let expected = without_grease(&profile.tls.extensions);
    let positions: Vec<usize> = without_grease(&hello.extensions)
        .iter()
        .filter_map(|id| expected.iter().position(|e| e == id))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{:?}", hello.extensions);
}
