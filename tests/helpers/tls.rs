use boring::pkey::PKey;
use boring::ssl::{select_next_proto, AlpnError, SslAcceptor, SslMethod};
use boring::x509::X509;

/// Self-signed certificate for 127.0.0.1 and localhost.
pub struct TestCert {
    pub cert_pem: String,
    pub key_pem: String,
}

pub fn self_signed() -> TestCert {
    let names = vec!["127.0.0.1".to_string(), "localhost".to_string()];
    let cert = rcgen::generate_simple_self_signed(names).expect("generate cert");
    TestCert {
        cert_pem: cert.cert.pem(),
        key_pem: cert.signing_key.serialize_pem(),
    }
}

/// Acceptor for `cert` that selects `alpn` (wire format, e.g.
/// `b"\x02h2"`) when the client offers it.
pub fn acceptor(cert: &TestCert, alpn: &'static [u8]) -> SslAcceptor {
    let pkey = PKey::private_key_from_pem(cert.key_pem.as_bytes()).expect("parse key");
    let x509 = X509::from_pem(cert.cert_pem.as_bytes()).expect("parse cert");

    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).expect("acceptor builder");
    builder.set_private_key(&pkey).expect("set key");
    builder.set_certificate(&x509).expect("set cert");
    builder.set_alpn_select_callback(move |_, client_protos| {
        select_next_proto(alpn, client_protos).ok_or(AlpnError::NOACK)
    });
    builder.build()
}

/// HTTP/1.1-only acceptor plus the certificate to trust.
pub fn h1_acceptor() -> (SslAcceptor, TestCert) {
    let cert = self_signed();
    (acceptor(&cert, b"\x08http/1.1"), cert)
}
