//! Profile catalog: named, immutable bundles of TLS and HTTP parameters.
//!
//! Built-in profiles cover Chrome, Firefox, Safari and OkHttp. Custom
//! profiles can be registered at runtime, either as values or as JSON, and
//! are immutable afterwards. Lookups hand out `Arc<Profile>` so sessions and
//! pooled connections share one copy.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::http2::{setting, Http2Spec, PseudoHeader, StreamDependency};
use super::tls::{ext, group, CertCompression, TlsVersion, GREASE_PLACEHOLDER as GREASE};
use crate::error::{Error, Result};
use crate::headers::Headers;

/// ClientHello parameters of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSpec {
    pub min_version: TlsVersion,
    pub max_version: TlsVersion,
    /// Cipher suite ids in offer order; may contain the GREASE placeholder.
    pub cipher_suites: Vec<u16>,
    /// Extension ids in ClientHello order; may contain GREASE placeholders.
    pub extensions: Vec<u16>,
    pub supported_groups: Vec<u16>,
    /// Groups for which a key share is sent, in order.
    pub key_share_groups: Vec<u16>,
    pub signature_algorithms: Vec<u16>,
    pub alpn: Vec<String>,
    /// Protocols listed in the application_settings (ALPS) extension.
    #[serde(default)]
    pub alps: Vec<String>,
    pub supported_versions: Vec<u16>,
    #[serde(default = "default_point_formats")]
    pub ec_point_formats: Vec<u8>,
    #[serde(default)]
    pub cert_compression: Vec<CertCompression>,
    #[serde(default)]
    pub delegated_credentials: Vec<u16>,
    #[serde(default)]
    pub record_size_limit: Option<u16>,
    #[serde(default)]
    pub grease: bool,
    #[serde(default)]
    pub permute_extensions: bool,
    /// Fixed ClientHello random, for reproducible hellos.
    #[serde(default)]
    pub fixed_random: Option<[u8; 32]>,
    #[serde(default)]
    pub fixed_session_id: Option<Vec<u8>>,
}

fn default_point_formats() -> Vec<u8> {
    vec![0]
}

/// A named emulation target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub user_agent: String,
    pub tls: TlsSpec,
    pub http2: Http2Spec,
    /// Default request headers in send order, `User-Agent` excluded.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Lowercase header names in the order the client emits them.
    #[serde(default)]
    pub header_order: Vec<String>,
}

impl Profile {
    /// Parse a profile from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let profile: Profile = serde_json::from_str(json)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject profiles the handshake engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::invalid_request(format!("profile {:?}: {msg}", self.name)));
        if self.name.trim().is_empty() {
            return invalid("empty name".into());
        }
        if self.tls.min_version > self.tls.max_version {
            return invalid("min_version above max_version".into());
        }
        if self.tls.cipher_suites.is_empty() {
            return invalid("no cipher suites".into());
        }
        if self.tls.alpn.iter().any(|p| p.is_empty() || p.len() > 255) {
            return invalid("bad ALPN protocol id".into());
        }
        let order = &self.http2.pseudo_header_order;
        for pseudo in [
            PseudoHeader::Method,
            PseudoHeader::Authority,
            PseudoHeader::Scheme,
            PseudoHeader::Path,
        ] {
            if order.iter().filter(|p| **p == pseudo).count() != 1 {
                return invalid(format!("pseudo-header order must list {} once", pseudo.name()));
            }
        }
        Ok(())
    }

    /// Default headers with `User-Agent`, sorted by the profile header order.
    pub fn default_headers(&self) -> Headers {
        let mut headers: Headers = self.headers.iter().cloned().collect();
        if !headers.contains("user-agent") {
            headers.append("User-Agent", self.user_agent.clone());
        }
        headers.sort_by_order(&self.header_order);
        headers
    }

    pub fn ja3_string(&self) -> String {
        super::client_hello::ja3_string(&self.tls)
    }

    pub fn ja3_hash(&self) -> String {
        super::client_hello::ja3_hash(&self.tls)
    }

    pub fn akamai_fingerprint(&self) -> String {
        self.http2.akamai_fingerprint()
    }

    /// Whether the profile offers HTTP/2 through ALPN.
    pub fn offers_h2(&self) -> bool {
        self.tls.alpn.iter().any(|p| p == "h2")
    }
}

/// Registry of profiles by name.
pub struct ProfileCatalog {
    profiles: RwLock<HashMap<String, Arc<Profile>>>,
}

static GLOBAL: Lazy<ProfileCatalog> = Lazy::new(ProfileCatalog::with_builtins);

/// Process-wide catalog, pre-populated with the built-in profiles.
pub fn catalog() -> &'static ProfileCatalog {
    &GLOBAL
}

impl ProfileCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
        }
    }

    /// Catalog holding every built-in profile.
    pub fn with_builtins() -> Self {
        let catalog = Self::new();
        for profile in builtin_profiles() {
            if let Err(e) = catalog.register(profile) {
                tracing::error!(error = %e, "built-in profile rejected");
            }
        }
        catalog
    }

    /// Add a profile. Names are unique; a second registration fails.
    pub fn register(&self, profile: Profile) -> Result<Arc<Profile>> {
        profile.validate()?;
        let mut profiles = self.profiles.write().unwrap_or_else(|e| e.into_inner());
        if profiles.contains_key(&profile.name) {
            return Err(Error::DuplicateProfile(profile.name));
        }
        tracing::debug!(profile = %profile.name, ja3 = %profile.ja3_hash(), "registered profile");
        let profile = Arc::new(profile);
        profiles.insert(profile.name.clone(), Arc::clone(&profile));
        Ok(profile)
    }

    pub fn register_json(&self, json: &str) -> Result<Arc<Profile>> {
        self.register(Profile::from_json(json)?)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Profile>> {
        self.profiles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownProfile(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .profiles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl Default for ProfileCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Every built-in profile.
pub fn builtin_profiles() -> Vec<Profile> {
    vec![
        chrome_131(),
        chrome_120(),
        firefox_133(),
        safari_17_0(),
        okhttp4_android_13(),
    ]
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

const CHROME_CIPHERS: &[u16] = &[
    GREASE, 0x1301, 0x1302, 0x1303, 0xc02b, 0xc02f, 0xc02c, 0xc030, 0xcca9, 0xcca8, 0xc013,
    0xc014, 0x009c, 0x009d, 0x002f, 0x0035,
];

const CHROME_SIGALGS: &[u16] = &[
    0x0403, 0x0804, 0x0401, 0x0503, 0x0805, 0x0501, 0x0806, 0x0601,
];

const CHROME_HEADER_ORDER: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "cache-control",
    "sec-ch-ua",
    "sec-ch-ua-mobile",
    "sec-ch-ua-platform",
    "upgrade-insecure-requests",
    "origin",
    "content-type",
    "user-agent",
    "accept",
    "sec-fetch-site",
    "sec-fetch-mode",
    "sec-fetch-user",
    "sec-fetch-dest",
    "referer",
    "accept-encoding",
    "accept-language",
    "cookie",
    "priority",
];

fn chrome_http2() -> Http2Spec {
    Http2Spec {
        settings: vec![
            (setting::HEADER_TABLE_SIZE, 65536),
            (setting::ENABLE_PUSH, 0),
            (setting::INITIAL_WINDOW_SIZE, 6291456),
            (setting::MAX_HEADER_LIST_SIZE, 262144),
        ],
        window_update: 15663105,
        priority_frames: Vec::new(),
        headers_priority: Some(StreamDependency {
            depends_on: 0,
            exclusive: true,
            weight: 255,
        }),
        pseudo_header_order: vec![
            PseudoHeader::Method,
            PseudoHeader::Authority,
            PseudoHeader::Scheme,
            PseudoHeader::Path,
        ],
    }
}

fn chrome_headers(major: &str) -> Vec<(String, String)> {
    let sec_ch_ua = format!(
        "\"Google Chrome\";v=\"{major}\", \"Chromium\";v=\"{major}\", \"Not_A Brand\";v=\"24\""
    );
    let mut headers = vec![("sec-ch-ua".to_string(), sec_ch_ua)];
    headers.extend(pairs(&[
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", "\"Windows\""),
        ("upgrade-insecure-requests", "1"),
        (
            "accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
        ),
        ("sec-fetch-site", "none"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-user", "?1"),
        ("sec-fetch-dest", "document"),
        ("accept-encoding", "gzip, deflate, br, zstd"),
        ("accept-language", "en-US,en;q=0.9"),
        ("priority", "u=0, i"),
    ]));
    headers
}

/// Chrome 131 on Windows.
pub fn chrome_131() -> Profile {
    Profile {
        name: "chrome_131".into(),
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".into(),
        tls: TlsSpec {
            min_version: TlsVersion::Tls1_2,
            max_version: TlsVersion::Tls1_3,
            cipher_suites: CHROME_CIPHERS.to_vec(),
            extensions: vec![
                GREASE,
                ext::SERVER_NAME,
                ext::EXTENDED_MASTER_SECRET,
                ext::RENEGOTIATION_INFO,
                ext::SUPPORTED_GROUPS,
                ext::EC_POINT_FORMATS,
                ext::SESSION_TICKET,
                ext::ALPN,
                ext::STATUS_REQUEST,
                ext::SIGNATURE_ALGORITHMS,
                ext::SIGNED_CERTIFICATE_TIMESTAMP,
                ext::KEY_SHARE,
                ext::PSK_KEY_EXCHANGE_MODES,
                ext::SUPPORTED_VERSIONS,
                ext::COMPRESS_CERTIFICATE,
                ext::APPLICATION_SETTINGS_OLD,
                ext::ENCRYPTED_CLIENT_HELLO,
                GREASE,
            ],
            supported_groups: vec![
                GREASE,
                group::X25519_MLKEM768,
                group::X25519,
                group::SECP256R1,
                group::SECP384R1,
            ],
            key_share_groups: vec![GREASE, group::X25519_MLKEM768, group::X25519],
            signature_algorithms: CHROME_SIGALGS.to_vec(),
            alpn: strings(&["h2", "http/1.1"]),
            alps: strings(&["h2"]),
            supported_versions: vec![GREASE, 0x0304, 0x0303],
            ec_point_formats: vec![0],
            cert_compression: vec![CertCompression::Brotli],
            delegated_credentials: Vec::new(),
            record_size_limit: None,
            grease: true,
            permute_extensions: true,
            fixed_random: None,
            fixed_session_id: None,
        },
        http2: chrome_http2(),
        headers: chrome_headers("131"),
        header_order: strings(CHROME_HEADER_ORDER),
    }
}

/// Chrome 120 on Windows: pre post-quantum key share, padding extension.
pub fn chrome_120() -> Profile {
    let mut profile = chrome_131();
    profile.name = "chrome_120".into();
    profile.user_agent = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into();
    profile.tls.supported_groups = vec![GREASE, group::X25519, group::SECP256R1, group::SECP384R1];
    profile.tls.key_share_groups = vec![GREASE, group::X25519];
    profile.tls.extensions.push(ext::PADDING);
    profile.headers = chrome_headers("120");
    profile
        .headers
        .retain(|(name, _)| name != "priority");
    for (name, value) in &mut profile.headers {
        if name == "accept-encoding" {
            *value = "gzip, deflate, br".to_string();
        }
    }
    profile
}

/// Firefox 133 on Windows.
pub fn firefox_133() -> Profile {
    Profile {
        name: "firefox_133".into(),
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0".into(),
        tls: TlsSpec {
            min_version: TlsVersion::Tls1_2,
            max_version: TlsVersion::Tls1_3,
            cipher_suites: vec![
                0x1301, 0x1303, 0x1302, 0xc02b, 0xc02f, 0xcca9, 0xcca8, 0xc02c, 0xc030, 0xc00a,
                0xc009, 0xc013, 0xc014, 0x009c, 0x009d, 0x002f, 0x0035,
            ],
            extensions: vec![
                ext::SERVER_NAME,
                ext::EXTENDED_MASTER_SECRET,
                ext::RENEGOTIATION_INFO,
                ext::SUPPORTED_GROUPS,
                ext::EC_POINT_FORMATS,
                ext::SESSION_TICKET,
                ext::ALPN,
                ext::STATUS_REQUEST,
                ext::DELEGATED_CREDENTIALS,
                ext::SIGNED_CERTIFICATE_TIMESTAMP,
                ext::KEY_SHARE,
                ext::SUPPORTED_VERSIONS,
                ext::SIGNATURE_ALGORITHMS,
                ext::PSK_KEY_EXCHANGE_MODES,
                ext::RECORD_SIZE_LIMIT,
                ext::COMPRESS_CERTIFICATE,
                ext::ENCRYPTED_CLIENT_HELLO,
            ],
            supported_groups: vec![
                group::X25519_MLKEM768,
                group::X25519,
                group::SECP256R1,
                group::SECP384R1,
                group::SECP521R1,
                group::FFDHE2048,
                group::FFDHE3072,
            ],
            key_share_groups: vec![group::X25519_MLKEM768, group::X25519, group::SECP256R1],
            signature_algorithms: vec![
                0x0403, 0x0503, 0x0603, 0x0804, 0x0805, 0x0806, 0x0401, 0x0501, 0x0601, 0x0203,
                0x0201,
            ],
            alpn: strings(&["h2", "http/1.1"]),
            alps: Vec::new(),
            supported_versions: vec![0x0304, 0x0303],
            ec_point_formats: vec![0],
            cert_compression: vec![
                CertCompression::Zlib,
                CertCompression::Brotli,
                CertCompression::Zstd,
            ],
            delegated_credentials: vec![0x0403, 0x0503, 0x0603, 0x0203],
            record_size_limit: Some(0x4001),
            grease: false,
            permute_extensions: false,
            fixed_random: None,
            fixed_session_id: None,
        },
        http2: Http2Spec {
            settings: vec![
                (setting::HEADER_TABLE_SIZE, 65536),
                (setting::ENABLE_PUSH, 0),
                (setting::INITIAL_WINDOW_SIZE, 131072),
                (setting::MAX_FRAME_SIZE, 16384),
            ],
            window_update: 12517377,
            priority_frames: Vec::new(),
            headers_priority: Some(StreamDependency {
                depends_on: 0,
                exclusive: false,
                weight: 41,
            }),
            pseudo_header_order: vec![
                PseudoHeader::Method,
                PseudoHeader::Path,
                PseudoHeader::Authority,
                PseudoHeader::Scheme,
            ],
        },
        headers: pairs(&[
            (
                "accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
            ("accept-language", "en-US,en;q=0.5"),
            ("accept-encoding", "gzip, deflate, br, zstd"),
            ("upgrade-insecure-requests", "1"),
            ("sec-fetch-dest", "document"),
            ("sec-fetch-mode", "navigate"),
            ("sec-fetch-site", "none"),
            ("sec-fetch-user", "?1"),
            ("priority", "u=0, i"),
            ("te", "trailers"),
        ]),
        header_order: strings(&[
            "host",
            "user-agent",
            "accept",
            "accept-language",
            "accept-encoding",
            "content-type",
            "content-length",
            "origin",
            "connection",
            "referer",
            "cookie",
            "upgrade-insecure-requests",
            "sec-fetch-dest",
            "sec-fetch-mode",
            "sec-fetch-site",
            "sec-fetch-user",
            "priority",
            "te",
        ]),
    }
}

/// Safari 17.0 on macOS.
pub fn safari_17_0() -> Profile {
    Profile {
        name: "safari_17_0".into(),
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15".into(),
        tls: TlsSpec {
            min_version: TlsVersion::Tls1_0,
            max_version: TlsVersion::Tls1_3,
            cipher_suites: vec![
                GREASE, 0x1301, 0x1302, 0x1303, 0xc02c, 0xc02b, 0xcca9, 0xc030, 0xc02f, 0xcca8,
                0xc00a, 0xc009, 0xc014, 0xc013, 0x009d, 0x009c, 0x0035, 0x002f, 0xc008, 0xc012,
                0x000a,
            ],
            extensions: vec![
                GREASE,
                ext::SERVER_NAME,
                ext::EXTENDED_MASTER_SECRET,
                ext::RENEGOTIATION_INFO,
                ext::SUPPORTED_GROUPS,
                ext::EC_POINT_FORMATS,
                ext::ALPN,
                ext::STATUS_REQUEST,
                ext::SIGNATURE_ALGORITHMS,
                ext::SIGNED_CERTIFICATE_TIMESTAMP,
                ext::KEY_SHARE,
                ext::PSK_KEY_EXCHANGE_MODES,
                ext::SUPPORTED_VERSIONS,
                ext::COMPRESS_CERTIFICATE,
                GREASE,
                ext::PADDING,
            ],
            supported_groups: vec![
                GREASE,
                group::X25519,
                group::SECP256R1,
                group::SECP384R1,
                group::SECP521R1,
            ],
            key_share_groups: vec![GREASE, group::X25519],
            signature_algorithms: vec![
                0x0403, 0x0804, 0x0401, 0x0503, 0x0203, 0x0805, 0x0501, 0x0806, 0x0601, 0x0201,
            ],
            alpn: strings(&["h2", "http/1.1"]),
            alps: Vec::new(),
            supported_versions: vec![GREASE, 0x0304, 0x0303, 0x0302, 0x0301],
            ec_point_formats: vec![0],
            cert_compression: vec![CertCompression::Zlib],
            delegated_credentials: Vec::new(),
            record_size_limit: None,
            grease: true,
            permute_extensions: false,
            fixed_random: None,
            fixed_session_id: None,
        },
        http2: Http2Spec {
            settings: vec![
                (setting::ENABLE_PUSH, 0),
                (setting::INITIAL_WINDOW_SIZE, 4194304),
                (setting::MAX_CONCURRENT_STREAMS, 100),
            ],
            window_update: 10485760,
            priority_frames: Vec::new(),
            headers_priority: Some(StreamDependency {
                depends_on: 0,
                exclusive: false,
                weight: 254,
            }),
            pseudo_header_order: vec![
                PseudoHeader::Method,
                PseudoHeader::Scheme,
                PseudoHeader::Path,
                PseudoHeader::Authority,
            ],
        },
        headers: pairs(&[
            (
                "accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
            ("sec-fetch-site", "none"),
            ("accept-encoding", "gzip, deflate, br"),
            ("sec-fetch-mode", "navigate"),
            ("accept-language", "en-US,en;q=0.9"),
            ("sec-fetch-dest", "document"),
        ]),
        header_order: strings(&[
            "host",
            "content-type",
            "origin",
            "accept",
            "sec-fetch-site",
            "cookie",
            "content-length",
            "accept-encoding",
            "sec-fetch-mode",
            "user-agent",
            "accept-language",
            "referer",
            "sec-fetch-dest",
            "connection",
        ]),
    }
}

/// OkHttp 4 on Android 13.
pub fn okhttp4_android_13() -> Profile {
    Profile {
        name: "okhttp4_android_13".into(),
        user_agent: "okhttp/4.12.0".into(),
        tls: TlsSpec {
            min_version: TlsVersion::Tls1_2,
            max_version: TlsVersion::Tls1_3,
            cipher_suites: vec![
                0x1301, 0x1302, 0x1303, 0xc02b, 0xc02f, 0xc02c, 0xc030, 0xcca9, 0xcca8, 0xc013,
                0xc014, 0x009c, 0x009d, 0x002f, 0x0035,
            ],
            extensions: vec![
                ext::SERVER_NAME,
                ext::EXTENDED_MASTER_SECRET,
                ext::RENEGOTIATION_INFO,
                ext::SUPPORTED_GROUPS,
                ext::EC_POINT_FORMATS,
                ext::SESSION_TICKET,
                ext::ALPN,
                ext::STATUS_REQUEST,
                ext::SIGNATURE_ALGORITHMS,
                ext::KEY_SHARE,
                ext::PSK_KEY_EXCHANGE_MODES,
                ext::SUPPORTED_VERSIONS,
                ext::PADDING,
            ],
            supported_groups: vec![group::X25519, group::SECP256R1, group::SECP384R1],
            key_share_groups: vec![group::X25519],
            signature_algorithms: vec![
                0x0403, 0x0804, 0x0401, 0x0503, 0x0805, 0x0501, 0x0806, 0x0601, 0x0201,
            ],
            alpn: strings(&["h2", "http/1.1"]),
            alps: Vec::new(),
            supported_versions: vec![0x0304, 0x0303],
            ec_point_formats: vec![0],
            cert_compression: Vec::new(),
            delegated_credentials: Vec::new(),
            record_size_limit: None,
            grease: false,
            permute_extensions: false,
            fixed_random: None,
            fixed_session_id: None,
        },
        http2: Http2Spec {
            settings: vec![(setting::INITIAL_WINDOW_SIZE, 16777216)],
            window_update: 16711681,
            priority_frames: Vec::new(),
            headers_priority: None,
            pseudo_header_order: vec![
                PseudoHeader::Method,
                PseudoHeader::Path,
                PseudoHeader::Authority,
                PseudoHeader::Scheme,
            ],
        },
        headers: pairs(&[("accept-encoding", "gzip")]),
        header_order: strings(&[
            "host",
            "content-type",
            "content-length",
            "connection",
            "accept-encoding",
            "cookie",
            "user-agent",
        ]),
    }
}
