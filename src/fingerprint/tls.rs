//! TLS parameter tables: IANA ids and their BoringSSL names.
//!
//! Profiles store cipher suites, groups, signature algorithms and extensions
//! as IANA code points. The handshake engine maps them to the names BoringSSL
//! understands; the ClientHello model encodes the ids directly.

use serde::{Deserialize, Serialize};

/// Placeholder for a GREASE value (RFC 8701) in profile lists. The concrete
/// GREASE value is chosen per ClientHello.
pub const GREASE_PLACEHOLDER: u16 = 0x0a0a;

pub mod ext {
    pub const SERVER_NAME: u16 = 0;
    pub const STATUS_REQUEST: u16 = 5;
    pub const SUPPORTED_GROUPS: u16 = 10;
    pub const EC_POINT_FORMATS: u16 = 11;
    pub const SIGNATURE_ALGORITHMS: u16 = 13;
    pub const ALPN: u16 = 16;
    pub const SIGNED_CERTIFICATE_TIMESTAMP: u16 = 18;
    pub const PADDING: u16 = 21;
    pub const ENCRYPT_THEN_MAC: u16 = 22;
    pub const EXTENDED_MASTER_SECRET: u16 = 23;
    pub const COMPRESS_CERTIFICATE: u16 = 27;
    pub const RECORD_SIZE_LIMIT: u16 = 28;
    pub const DELEGATED_CREDENTIALS: u16 = 34;
    pub const SESSION_TICKET: u16 = 35;
    pub const SUPPORTED_VERSIONS: u16 = 43;
    pub const PSK_KEY_EXCHANGE_MODES: u16 = 45;
    pub const POST_HANDSHAKE_AUTH: u16 = 49;
    pub const SIGNATURE_ALGORITHMS_CERT: u16 = 50;
    pub const KEY_SHARE: u16 = 51;
    pub const APPLICATION_SETTINGS_OLD: u16 = 17513;
    pub const APPLICATION_SETTINGS: u16 = 17613;
    pub const ENCRYPTED_CLIENT_HELLO: u16 = 65037;
    pub const RENEGOTIATION_INFO: u16 = 65281;
}

pub mod group {
    pub const SECP256R1: u16 = 0x0017;
    pub const SECP384R1: u16 = 0x0018;
    pub const SECP521R1: u16 = 0x0019;
    pub const X25519: u16 = 0x001d;
    pub const FFDHE2048: u16 = 0x0100;
    pub const FFDHE3072: u16 = 0x0101;
    pub const X25519_MLKEM768: u16 = 0x11ec;
    pub const X25519_KYBER768_DRAFT00: u16 = 0x6399;
}

/// Whether `value` is one of the sixteen RFC 8701 GREASE code points.
pub fn is_grease(value: u16) -> bool {
    value & 0x0f0f == 0x0a0a && value >> 8 == value & 0xff
}

/// GREASE value for index `n` (0..16).
pub fn grease_value(n: u8) -> u16 {
    let b = u16::from((n & 0x0f) << 4 | 0x0a);
    b << 8 | b
}

/// Protocol version bound for a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "1.0")]
    Tls1_0,
    #[serde(rename = "1.1")]
    Tls1_1,
    #[serde(rename = "1.2")]
    Tls1_2,
    #[serde(rename = "1.3")]
    Tls1_3,
}

impl TlsVersion {
    pub fn wire(self) -> u16 {
        match self {
            Self::Tls1_0 => 0x0301,
            Self::Tls1_1 => 0x0302,
            Self::Tls1_2 => 0x0303,
            Self::Tls1_3 => 0x0304,
        }
    }

    pub fn to_boring(self) -> boring::ssl::SslVersion {
        use boring::ssl::SslVersion;
        match self {
            Self::Tls1_0 => SslVersion::TLS1,
            Self::Tls1_1 => SslVersion::TLS1_1,
            Self::Tls1_2 => SslVersion::TLS1_2,
            Self::Tls1_3 => SslVersion::TLS1_3,
        }
    }
}

/// Certificate compression algorithm advertised in `compress_certificate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertCompression {
    Zlib,
    Brotli,
    Zstd,
}

impl CertCompression {
    /// RFC 8879 algorithm id.
    pub fn id(self) -> u16 {
        match self {
            Self::Zlib => 1,
            Self::Brotli => 2,
            Self::Zstd => 3,
        }
    }
}

/// TLS 1.3 suites. BoringSSL fixes their order and does not accept them in
/// the cipher list string.
pub fn is_tls13_cipher(id: u16) -> bool {
    matches!(id, 0x1301..=0x1305)
}

/// BoringSSL cipher name for a TLS 1.2-and-below suite id.
pub fn cipher_name(id: u16) -> Option<&'static str> {
    Some(match id {
        0xc02b => "ECDHE-ECDSA-AES128-GCM-SHA256",
        0xc02f => "ECDHE-RSA-AES128-GCM-SHA256",
        0xc02c => "ECDHE-ECDSA-AES256-GCM-SHA384",
        0xc030 => "ECDHE-RSA-AES256-GCM-SHA384",
        0xcca9 => "ECDHE-ECDSA-CHACHA20-POLY1305",
        0xcca8 => "ECDHE-RSA-CHACHA20-POLY1305",
        0xc009 => "ECDHE-ECDSA-AES128-SHA",
        0xc00a => "ECDHE-ECDSA-AES256-SHA",
        0xc013 => "ECDHE-RSA-AES128-SHA",
        0xc014 => "ECDHE-RSA-AES256-SHA",
        0xc023 => "ECDHE-ECDSA-AES128-SHA256",
        0xc027 => "ECDHE-RSA-AES128-SHA256",
        0x009c => "AES128-GCM-SHA256",
        0x009d => "AES256-GCM-SHA384",
        0x002f => "AES128-SHA",
        0x0035 => "AES256-SHA",
        0x003c => "AES128-SHA256",
        0x000a => "DES-CBC3-SHA",
        _ => return None,
    })
}

/// BoringSSL curve name for a named group id.
pub fn group_name(id: u16) -> Option<&'static str> {
    Some(match id {
        group::X25519 => "X25519",
        group::SECP256R1 => "P-256",
        group::SECP384R1 => "P-384",
        group::SECP521R1 => "P-521",
        group::X25519_KYBER768_DRAFT00 => "X25519Kyber768Draft00",
        group::X25519_MLKEM768 => "X25519MLKEM768",
        _ => return None,
    })
}

/// BoringSSL signature algorithm name for a SignatureScheme id.
pub fn sigalg_name(id: u16) -> Option<&'static str> {
    Some(match id {
        0x0403 => "ecdsa_secp256r1_sha256",
        0x0503 => "ecdsa_secp384r1_sha384",
        0x0603 => "ecdsa_secp521r1_sha512",
        0x0203 => "ecdsa_sha1",
        0x0804 => "rsa_pss_rsae_sha256",
        0x0805 => "rsa_pss_rsae_sha384",
        0x0806 => "rsa_pss_rsae_sha512",
        0x0401 => "rsa_pkcs1_sha256",
        0x0501 => "rsa_pkcs1_sha384",
        0x0601 => "rsa_pkcs1_sha512",
        0x0201 => "rsa_pkcs1_sha1",
        0x0807 => "ed25519",
        _ => return None,
    })
}

/// Colon-joined BoringSSL names for `ids`, skipping GREASE and anything
/// BoringSSL cannot express. Skipped ids are returned separately.
pub fn boring_list(ids: &[u16], name: fn(u16) -> Option<&'static str>) -> (String, Vec<u16>) {
    let mut names = Vec::new();
    let mut skipped = Vec::new();
    for &id in ids.iter().filter(|&&id| !is_grease(id)) {
        match name(id) {
            Some(n) => names.push(n),
            None => skipped.push(id),
        }
    }
    (names.join(":"), skipped)
}

/// Wire-format ALPN list: each protocol prefixed by its length.
pub fn alpn_wire(protocols: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for p in protocols {
        out.push(p.len() as u8);
        out.extend_from_slice(p.as_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grease_values() {
        assert!(is_grease(0x0a0a));
        assert!(is_grease(0xfafa));
        assert!(!is_grease(0x0a1a));
        assert!(!is_grease(0x1301));
        for n in 0..16 {
            assert!(is_grease(grease_value(n)));
        }
        assert_eq!(grease_value(0), 0x0a0a);
        assert_eq!(grease_value(15), 0xfafa);
    }

    #[test]
    fn test_boring_list_skips_tls13_and_grease() {
        let (list, skipped) = boring_list(&[0x0a0a, 0x1301, 0xc02b, 0xc02f], cipher_name);
        assert_eq!(list, "ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256");
        assert_eq!(skipped, vec![0x1301]);
    }

    #[test]
    fn test_alpn_wire() {
        let wire = alpn_wire(&["h2".to_string(), "http/1.1".to_string()]);
        assert_eq!(wire, b"\x02h2\x08http/1.1");
    }
}
