//! ClientHello model: deterministic encoding of the hello a profile
//! describes, and JA3 computation.
//!
//! BoringSSL decides the final byte layout of the hello it sends; this
//! encoder reproduces the profile verbatim (extension order, GREASE slots,
//! padding) so profiles can be inspected, compared and verified. Key shares
//! carry random bytes of the correct length rather than real public keys.
//!
//! With `fixed_random` set, the random doubles as the RNG seed so GREASE
//! choices, the session id and key-share bytes are reproducible too.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::profiles::TlsSpec;
use super::tls::{ext, grease_value, group, is_grease, TlsVersion};
use crate::error::{Error, Result};

const HANDSHAKE_RECORD: u8 = 0x16;
const CLIENT_HELLO: u8 = 0x01;

/// JA3 string of a profile: `version,ciphers,extensions,groups,formats`,
/// GREASE values removed, extensions in profile order.
pub fn ja3_string(spec: &TlsSpec) -> String {
    ja3_from_parts(
        legacy_version(spec),
        &spec.cipher_suites,
        &spec.extensions,
        &spec.supported_groups,
        &spec.ec_point_formats,
    )
}

/// MD5 of [`ja3_string`], lowercase hex.
pub fn ja3_hash(spec: &TlsSpec) -> String {
    format!("{:x}", md5::compute(ja3_string(spec)))
}

fn legacy_version(spec: &TlsSpec) -> u16 {
    spec.max_version.min(TlsVersion::Tls1_2).wire()
}

fn ja3_from_parts(version: u16, ciphers: &[u16], extensions: &[u16], groups: &[u16], formats: &[u8]) -> String {
    let join = |ids: &[u16]| {
        ids.iter()
            .filter(|id| !is_grease(**id))
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join("-")
    };
    let formats = formats
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("-");
    format!(
        "{},{},{},{},{}",
        version,
        join(ciphers),
        join(extensions),
        join(groups),
        formats
    )
}

/// GREASE values picked for one hello, one per slot like BoringSSL does.
struct GreaseSlots {
    cipher: u16,
    group: u16,
    version: u16,
    first_ext: u16,
    second_ext: u16,
}

impl GreaseSlots {
    fn pick(rng: &mut StdRng) -> Self {
        let mut next = || grease_value(rng.gen_range(0..16));
        let cipher = next();
        let group = next();
        let version = next();
        let first_ext = next();
        let mut second_ext = next();
        if second_ext == first_ext {
            second_ext ^= 0x1010;
        }
        Self {
            cipher,
            group,
            version,
            first_ext,
            second_ext,
        }
    }
}

/// Encodes the ClientHello record a profile describes.
pub struct ClientHelloEncoder<'a> {
    spec: &'a TlsSpec,
    server_name: Option<&'a str>,
}

impl<'a> ClientHelloEncoder<'a> {
    pub fn new(spec: &'a TlsSpec) -> Self {
        Self {
            spec,
            server_name: None,
        }
    }

    /// SNI host name. IP literals are not sent, matching browsers.
    pub fn server_name(mut self, name: &'a str) -> Self {
        self.server_name = Some(name);
        self
    }

    /// Full TLS record containing the ClientHello handshake message.
    pub fn encode(&self) -> Vec<u8> {
        let mut rng = match self.spec.fixed_random {
            Some(seed) => StdRng::from_seed(seed),
            None => StdRng::from_entropy(),
        };
        let grease = GreaseSlots::pick(&mut rng);

        let random: [u8; 32] = match self.spec.fixed_random {
            Some(r) => r,
            None => rng.gen(),
        };
        let session_id: Vec<u8> = match &self.spec.fixed_session_id {
            Some(id) => id.clone(),
            None if self.spec.max_version >= TlsVersion::Tls1_3 => {
                (0..32).map(|_| rng.gen()).collect()
            }
            None => Vec::new(),
        };

        let mut body = Vec::with_capacity(512);
        put_u16(&mut body, legacy_version(self.spec));
        body.extend_from_slice(&random);
        body.push(session_id.len() as u8);
        body.extend_from_slice(&session_id);

        let ciphers: Vec<u16> = self
            .spec
            .cipher_suites
            .iter()
            .map(|&c| if is_grease(c) { grease.cipher } else { c })
            .collect();
        put_u16(&mut body, (ciphers.len() * 2) as u16);
        for c in ciphers {
            put_u16(&mut body, c);
        }
        // Compression methods: null only.
        body.extend_from_slice(&[1, 0]);

        let order = self.extension_order(&mut rng);
        let mut extensions: Vec<(u16, Vec<u8>)> = Vec::with_capacity(order.len());
        let mut seen_grease = false;
        for id in order {
            if is_grease(id) {
                // First GREASE extension is empty, the second carries one zero byte.
                if seen_grease {
                    extensions.push((grease.second_ext, vec![0]));
                } else {
                    extensions.push((grease.first_ext, Vec::new()));
                    seen_grease = true;
                }
                continue;
            }
            if id == ext::SERVER_NAME && self.sni().is_none() {
                continue;
            }
            extensions.push((id, self.extension_body(id, &grease, &mut rng)));
        }

        // Padding is sized last, once the rest of the hello is known.
        if let Some(pos) = extensions.iter().position(|(id, _)| *id == ext::PADDING) {
            let unpadded = 4 + body.len() + 2 + extensions.iter().map(|(_, d)| 4 + d.len()).sum::<usize>();
            // `unpadded` already counts the padding extension header.
            let pad = if unpadded > 0xff && unpadded < 0x200 {
                0x200 - unpadded
            } else {
                0
            };
            extensions[pos].1 = vec![0; pad];
        }

        let ext_len: usize = extensions.iter().map(|(_, d)| 4 + d.len()).sum();
        put_u16(&mut body, ext_len as u16);
        for (id, data) in &extensions {
            put_u16(&mut body, *id);
            put_u16(&mut body, data.len() as u16);
            body.extend_from_slice(data);
        }

        let mut handshake = Vec::with_capacity(body.len() + 4);
        handshake.push(CLIENT_HELLO);
        put_u24(&mut handshake, body.len());
        handshake.extend_from_slice(&body);

        let mut record = Vec::with_capacity(handshake.len() + 5);
        record.push(HANDSHAKE_RECORD);
        put_u16(&mut record, 0x0301);
        put_u16(&mut record, handshake.len() as u16);
        record.extend_from_slice(&handshake);
        record
    }

    fn sni(&self) -> Option<&str> {
        self.server_name
            .filter(|name| name.parse::<std::net::IpAddr>().is_err())
    }

    /// Profile order, or a BoringSSL-style permutation that keeps GREASE
    /// and padding in place.
    fn extension_order(&self, rng: &mut StdRng) -> Vec<u16> {
        let mut order = self.spec.extensions.clone();
        if self.spec.permute_extensions {
            let movable: Vec<usize> = order
                .iter()
                .enumerate()
                .filter(|(_, id)| !is_grease(**id) && **id != ext::PADDING)
                .map(|(i, _)| i)
                .collect();
            let mut ids: Vec<u16> = movable.iter().map(|&i| order[i]).collect();
            ids.shuffle(rng);
            for (slot, id) in movable.into_iter().zip(ids) {
                order[slot] = id;
            }
        }
        order
    }

    fn extension_body(&self, id: u16, grease: &GreaseSlots, rng: &mut StdRng) -> Vec<u8> {
        let spec = self.spec;
        let mut out = Vec::new();
        match id {
            ext::SERVER_NAME => {
                let name = self.sni().unwrap_or_default().as_bytes();
                put_u16(&mut out, (name.len() + 3) as u16);
                out.push(0);
                put_u16(&mut out, name.len() as u16);
                out.extend_from_slice(name);
            }
            ext::STATUS_REQUEST => out.extend_from_slice(&[1, 0, 0, 0, 0]),
            ext::SUPPORTED_GROUPS => {
                let groups = substitute(&spec.supported_groups, grease.group);
                put_u16_list(&mut out, &groups);
            }
            ext::EC_POINT_FORMATS => {
                out.push(spec.ec_point_formats.len() as u8);
                out.extend_from_slice(&spec.ec_point_formats);
            }
            ext::SIGNATURE_ALGORITHMS | ext::SIGNATURE_ALGORITHMS_CERT => {
                put_u16_list(&mut out, &spec.signature_algorithms);
            }
            ext::ALPN => {
                let list = super::tls::alpn_wire(&spec.alpn);
                put_u16(&mut out, list.len() as u16);
                out.extend_from_slice(&list);
            }
            ext::APPLICATION_SETTINGS | ext::APPLICATION_SETTINGS_OLD => {
                let list = super::tls::alpn_wire(&spec.alps);
                put_u16(&mut out, list.len() as u16);
                out.extend_from_slice(&list);
            }
            ext::COMPRESS_CERTIFICATE => {
                out.push((spec.cert_compression.len() * 2) as u8);
                for alg in &spec.cert_compression {
                    put_u16(&mut out, alg.id());
                }
            }
            ext::RECORD_SIZE_LIMIT => put_u16(&mut out, spec.record_size_limit.unwrap_or(0x4001)),
            ext::DELEGATED_CREDENTIALS => put_u16_list(&mut out, &spec.delegated_credentials),
            ext::SUPPORTED_VERSIONS => {
                let versions = substitute(&spec.supported_versions, grease.version);
                out.push((versions.len() * 2) as u8);
                for v in versions {
                    put_u16(&mut out, v);
                }
            }
            ext::PSK_KEY_EXCHANGE_MODES => out.extend_from_slice(&[1, 1]),
            ext::KEY_SHARE => {
                let mut shares = Vec::new();
                for g in substitute(&spec.key_share_groups, grease.group) {
                    let len = if is_grease(g) { 1 } else { key_share_len(g) };
                    put_u16(&mut shares, g);
                    put_u16(&mut shares, len as u16);
                    if is_grease(g) {
                        shares.push(0);
                    } else {
                        shares.extend((0..len).map(|_| rng.gen::<u8>()));
                    }
                }
                put_u16(&mut out, shares.len() as u16);
                out.extend_from_slice(&shares);
            }
            ext::RENEGOTIATION_INFO => out.push(0),
            ext::ENCRYPTED_CLIENT_HELLO => {
                // GREASE ECH: outer hello, HKDF-SHA256 / AES-128-GCM.
                out.push(0);
                put_u16(&mut out, 0x0001);
                put_u16(&mut out, 0x0001);
                out.push(rng.gen());
                put_u16(&mut out, 32);
                out.extend((0..32).map(|_| rng.gen::<u8>()));
                let payload = [144usize, 176, 208, 240][rng.gen_range(0..4)];
                put_u16(&mut out, payload as u16);
                out.extend((0..payload).map(|_| rng.gen::<u8>()));
            }
            // extended_master_secret, session_ticket, SCT, encrypt_then_mac,
            // post_handshake_auth, padding (sized later) and unknown ids.
            _ => {}
        }
        out
    }
}

fn substitute(ids: &[u16], grease: u16) -> Vec<u16> {
    ids.iter()
        .map(|&id| if is_grease(id) { grease } else { id })
        .collect()
}

fn key_share_len(g: u16) -> usize {
    match g {
        group::X25519 => 32,
        group::SECP256R1 => 65,
        group::SECP384R1 => 97,
        group::SECP521R1 => 133,
        group::X25519_MLKEM768 | group::X25519_KYBER768_DRAFT00 => 1216,
        group::FFDHE2048 => 256,
        group::FFDHE3072 => 384,
        _ => 32,
    }
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u24(out: &mut Vec<u8>, v: usize) {
    out.extend_from_slice(&(v as u32).to_be_bytes()[1..]);
}

fn put_u16_list(out: &mut Vec<u8>, ids: &[u16]) {
    put_u16(out, (ids.len() * 2) as u16);
    for &id in ids {
        put_u16(out, id);
    }
}

/// Fields of a parsed ClientHello relevant to fingerprinting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHelloInfo {
    pub version: u16,
    pub cipher_suites: Vec<u16>,
    /// Extension ids in wire order.
    pub extensions: Vec<u16>,
    pub supported_groups: Vec<u16>,
    pub ec_point_formats: Vec<u8>,
    pub server_name: Option<String>,
    pub alpn: Vec<String>,
    pub supported_versions: Vec<u16>,
}

impl ClientHelloInfo {
    /// Parse a ClientHello, either as a TLS record or a bare handshake message.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        if data.first() == Some(&HANDSHAKE_RECORD) {
            r.skip(3)?;
            let len = r.u16()? as usize;
            r = Reader::new(r.take(len)?);
        }
        if r.u8()? != CLIENT_HELLO {
            return Err(malformed("not a ClientHello"));
        }
        let len = r.u24()?;
        let mut r = Reader::new(r.take(len)?);

        let mut info = ClientHelloInfo {
            version: r.u16()?,
            ..Default::default()
        };
        r.skip(32)?;
        let sid = r.u8()? as usize;
        r.skip(sid)?;
        let mut ciphers = Reader::new(r.vec16()?);
        while !ciphers.is_empty() {
            info.cipher_suites.push(ciphers.u16()?);
        }
        let comp = r.u8()? as usize;
        r.skip(comp)?;
        if r.is_empty() {
            return Ok(info);
        }

        let mut exts = Reader::new(r.vec16()?);
        while !exts.is_empty() {
            let id = exts.u16()?;
            let body = exts.vec16()?;
            info.extensions.push(id);
            let mut b = Reader::new(body);
            match id {
                ext::SERVER_NAME if !body.is_empty() => {
                    let mut list = Reader::new(b.vec16()?);
                    while !list.is_empty() {
                        let kind = list.u8()?;
                        let name = list.vec16()?;
                        if kind == 0 {
                            info.server_name = Some(String::from_utf8_lossy(name).into_owned());
                        }
                    }
                }
                ext::SUPPORTED_GROUPS => {
                    let mut list = Reader::new(b.vec16()?);
                    while !list.is_empty() {
                        info.supported_groups.push(list.u16()?);
                    }
                }
                ext::EC_POINT_FORMATS => {
                    let n = b.u8()? as usize;
                    info.ec_point_formats = b.take(n)?.to_vec();
                }
                ext::ALPN => {
                    let mut list = Reader::new(b.vec16()?);
                    while !list.is_empty() {
                        let n = list.u8()? as usize;
                        info.alpn
                            .push(String::from_utf8_lossy(list.take(n)?).into_owned());
                    }
                }
                ext::SUPPORTED_VERSIONS => {
                    let n = b.u8()? as usize;
                    let mut list = Reader::new(b.take(n)?);
                    while !list.is_empty() {
                        info.supported_versions.push(list.u16()?);
                    }
                }
                _ => {}
            }
        }
        Ok(info)
    }

    pub fn ja3_string(&self) -> String {
        ja3_from_parts(
            self.version,
            &self.cipher_suites,
            &self.extensions,
            &self.supported_groups,
            &self.ec_point_formats,
        )
    }

    pub fn ja3_hash(&self) -> String {
        format!("{:x}", md5::compute(self.ja3_string()))
    }
}

fn malformed(what: &str) -> Error {
    Error::tls(format!("malformed ClientHello: {what}"))
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(malformed("truncated"));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<usize> {
        let b = self.take(3)?;
        Ok((b[0] as usize) << 16 | (b[1] as usize) << 8 | b[2] as usize)
    }

    fn vec16(&mut self) -> Result<&'a [u8]> {
        let n = self.u16()? as usize;
        self.take(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::profiles::{chrome_131, firefox_133, okhttp4_android_13, safari_17_0};

    #[test]
    fn test_ja3_excludes_grease() {
        let ja3 = chrome_131().ja3_string();
        assert!(ja3.starts_with("771,4865-4866-4867-49195-49199-"));
        assert!(!ja3.contains("2570"));
        assert_eq!(
            ja3.split(',').nth(3),
            Some("4588-29-23-24"),
            "groups without GREASE"
        );
    }

    #[test]
    fn test_known_okhttp_ja3() {
        assert_eq!(
            okhttp4_android_13().ja3_string(),
            "771,4865-4866-4867-49195-49199-49196-49200-52393-52392-49171-49172-156-157-47-53,\
             0-23-65281-10-11-35-16-5-13-51-45-43-21,29-23-24,0"
        );
    }

    #[test]
    fn test_encoded_hello_matches_profile_ja3() {
        for profile in [firefox_133(), okhttp4_android_13(), safari_17_0()] {
            let record = ClientHelloEncoder::new(&profile.tls)
                .server_name("example.com")
                .encode();
            let info = ClientHelloInfo::parse(&record).unwrap();
            assert_eq!(info.ja3_string(), profile.ja3_string(), "{}", profile.name);
            assert_eq!(info.server_name.as_deref(), Some("example.com"));
            assert_eq!(info.alpn, vec!["h2", "http/1.1"]);
        }
    }

    #[test]
    fn test_fixed_random_is_deterministic() {
        let mut spec = chrome_131().tls;
        spec.fixed_random = Some([7u8; 32]);
        let a = ClientHelloEncoder::new(&spec).server_name("a.test").encode();
        let b = ClientHelloEncoder::new(&spec).server_name("a.test").encode();
        assert_eq!(a, b);
        assert_eq!(&a[11..43], &[7u8; 32]);
    }

    #[test]
    fn test_grease_slots_and_positions() {
        let mut spec = chrome_131().tls;
        spec.permute_extensions = false;
        let info = ClientHelloInfo::parse(&ClientHelloEncoder::new(&spec).server_name("x.test").encode()).unwrap();
        assert!(is_grease(info.cipher_suites[0]));
        assert!(is_grease(info.extensions[0]));
        assert!(is_grease(*info.extensions.last().unwrap()));
        assert_ne!(info.extensions[0], *info.extensions.last().unwrap());
        assert!(is_grease(info.supported_versions[0]));
    }

    #[test]
    fn test_permutation_keeps_extension_set() {
        let spec = chrome_131().tls;
        let info = ClientHelloInfo::parse(&ClientHelloEncoder::new(&spec).server_name("x.test").encode()).unwrap();
        let mut wire: Vec<u16> = info.extensions.into_iter().filter(|e| !is_grease(*e)).collect();
        let mut declared: Vec<u16> = spec.extensions.iter().copied().filter(|e| !is_grease(*e)).collect();
        wire.sort_unstable();
        declared.sort_unstable();
        assert_eq!(wire, declared);
    }

    #[test]
    fn test_padding_reaches_512() {
        let spec = okhttp4_android_13().tls;
        let record = ClientHelloEncoder::new(&spec).server_name("example.com").encode();
        let handshake_len = record.len() - 5;
        assert!(!(0x100..0x200).contains(&handshake_len), "len {handshake_len}");
    }

    #[test]
    fn test_ip_literal_omits_sni() {
        let spec = okhttp4_android_13().tls;
        let info = ClientHelloInfo::parse(&ClientHelloEncoder::new(&spec).server_name("127.0.0.1").encode()).unwrap();
        assert!(info.server_name.is_none());
        assert!(!info.extensions.contains(&ext::SERVER_NAME));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ClientHelloInfo::parse(&[0x16, 3, 1, 0, 10, 1]).is_err());
        assert!(ClientHelloInfo::parse(b"GET / HTTP/1.1\r\n").is_err());
    }
}
