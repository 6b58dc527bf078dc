//! HPACK header compression (RFC 7541).
//!
//! The encoder emits headers in exactly the order given, which is what
//! keeps pseudo-header and regular header order intact on the wire.

use std::collections::VecDeque;

use super::huffman;
use crate::error::{Error, Result};

/// RFC 7541 Appendix A. Index 1 is the first entry.
const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Per-entry overhead counted against the table size.
const ENTRY_OVERHEAD: usize = 32;

/// Headers never added to the dynamic table.
const NEVER_INDEXED: [&str; 2] = ["authorization", "proxy-authorization"];

#[derive(Debug, Default)]
struct DynamicTable {
    entries: VecDeque<(String, String)>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    fn new(max_size: usize) -> Self {
        Self {
            max_size,
            ..Default::default()
        }
    }

    fn entry_size(name: &str, value: &str) -> usize {
        name.len() + value.len() + ENTRY_OVERHEAD
    }

    fn insert(&mut self, name: String, value: String) {
        let size = Self::entry_size(&name, &value);
        self.evict_to(self.max_size.saturating_sub(size));
        if size <= self.max_size {
            self.size += size;
            self.entries.push_front((name, value));
        }
    }

    fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to(max_size);
    }

    fn evict_to(&mut self, limit: usize) {
        while self.size > limit {
            match self.entries.pop_back() {
                Some((n, v)) => self.size -= Self::entry_size(&n, &v),
                None => break,
            }
        }
    }

    /// 0-based index into the dynamic part.
    fn get(&self, index: usize) -> Option<&(String, String)> {
        self.entries.get(index)
    }
}

fn encode_integer(value: usize, prefix_bits: u8, first: u8, out: &mut Vec<u8>) {
    let max = (1usize << prefix_bits) - 1;
    if value < max {
        out.push(first | value as u8);
        return;
    }
    out.push(first | max as u8);
    let mut rest = value - max;
    while rest >= 128 {
        out.push((rest % 128) as u8 | 0x80);
        rest /= 128;
    }
    out.push(rest as u8);
}

/// Decode an integer with an N-bit prefix; returns (value, bytes used).
fn decode_integer(data: &[u8], prefix_bits: u8) -> Result<(usize, usize)> {
    let first = *data.first().ok_or_else(|| Error::http_protocol("HPACK: truncated integer"))?;
    let max = (1usize << prefix_bits) - 1;
    let mut value = (first as usize) & max;
    if value < max {
        return Ok((value, 1));
    }
    let mut shift = 0u32;
    for (i, &b) in data[1..].iter().enumerate() {
        if shift > 28 {
            return Err(Error::http_protocol("HPACK: integer overflow"));
        }
        value += ((b & 0x7f) as usize) << shift;
        shift += 7;
        if b & 0x80 == 0 {
            return Ok((value, i + 2));
        }
    }
    Err(Error::http_protocol("HPACK: truncated integer"))
}

fn encode_string(s: &str, out: &mut Vec<u8>) {
    let bytes = s.as_bytes();
    let huff_len = huffman::encoded_len(bytes);
    if huff_len < bytes.len() {
        encode_integer(huff_len, 7, 0x80, out);
        huffman::encode(bytes, out);
    } else {
        encode_integer(bytes.len(), 7, 0x00, out);
        out.extend_from_slice(bytes);
    }
}

fn decode_string(data: &[u8]) -> Result<(String, usize)> {
    let huffman_coded = data.first().is_some_and(|b| b & 0x80 != 0);
    let (len, used) = decode_integer(data, 7)?;
    let end = used
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| Error::http_protocol("HPACK: truncated string"))?;
    let raw = &data[used..end];
    let bytes = if huffman_coded {
        huffman::decode(raw)?
    } else {
        raw.to_vec()
    };
    let s = String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
    Ok((s, end))
}

/// HPACK encoder for one connection.
#[derive(Debug)]
pub struct Encoder {
    table: DynamicTable,
    /// Size update to announce at the start of the next block.
    pending_size_update: Option<usize>,
}

impl Encoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
            pending_size_update: None,
        }
    }

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE.
    pub fn set_max_table_size(&mut self, size: usize) {
        if size != self.table.max_size {
            self.table.set_max_size(size);
            self.pending_size_update = Some(size);
        }
    }

    /// Encode `headers` in order. Names must already be lowercase.
    pub fn encode<'a>(&mut self, headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        if let Some(size) = self.pending_size_update.take() {
            encode_integer(size, 5, 0x20, &mut out);
        }
        for (name, value) in headers {
            self.encode_field(name, value, &mut out);
        }
        out
    }

    fn find(&self, name: &str, value: &str) -> (Option<usize>, Option<usize>) {
        let mut name_index = None;
        for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
            if *n == name {
                if *v == value {
                    return (Some(i + 1), Some(i + 1));
                }
                name_index.get_or_insert(i + 1);
            }
        }
        for (i, (n, v)) in self.table.entries.iter().enumerate() {
            if n == name {
                let index = STATIC_TABLE.len() + i + 1;
                if v == value {
                    return (Some(index), Some(index));
                }
                name_index.get_or_insert(index);
            }
        }
        (None, name_index)
    }

    fn encode_field(&mut self, name: &str, value: &str, out: &mut Vec<u8>) {
        let (exact, name_index) = self.find(name, value);
        if let Some(index) = exact {
            encode_integer(index, 7, 0x80, out);
            return;
        }
        let never = NEVER_INDEXED.contains(&name);
        let (prefix_bits, first) = if never { (4, 0x10) } else { (6, 0x40) };
        match name_index {
            Some(index) => encode_integer(index, prefix_bits, first, out),
            None => {
                out.push(first);
                encode_string(name, out);
            }
        }
        encode_string(value, out);
        if !never {
            self.table.insert(name.to_string(), value.to_string());
        }
    }
}

/// HPACK decoder for one connection.
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,
    /// Limit we advertised in SETTINGS_HEADER_TABLE_SIZE.
    max_allowed: usize,
}

impl Decoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
            max_allowed: max_table_size,
        }
    }

    fn lookup(&self, index: usize) -> Result<(String, String)> {
        if index == 0 {
            return Err(Error::http_protocol("HPACK: index 0"));
        }
        if index <= STATIC_TABLE.len() {
            let (n, v) = STATIC_TABLE[index - 1];
            return Ok((n.to_string(), v.to_string()));
        }
        self.table
            .get(index - STATIC_TABLE.len() - 1)
            .cloned()
            .ok_or_else(|| Error::http_protocol(format!("HPACK: index {index} out of range")))
    }

    /// Decode a complete header block.
    pub fn decode(&mut self, mut data: &[u8]) -> Result<Vec<(String, String)>> {
        let mut headers = Vec::new();
        while let Some(&b) = data.first() {
            if b & 0x80 != 0 {
                let (index, used) = decode_integer(data, 7)?;
                headers.push(self.lookup(index)?);
                data = &data[used..];
            } else if b & 0xe0 == 0x20 {
                let (size, used) = decode_integer(data, 5)?;
                if size > self.max_allowed {
                    return Err(Error::http_protocol("HPACK: table size update above limit"));
                }
                self.table.set_max_size(size);
                data = &data[used..];
            } else {
                // 01xxxxxx incremental indexing; 0000xxxx / 0001xxxx without.
                let (prefix_bits, index_it) = if b & 0x40 != 0 { (6, true) } else { (4, false) };
                let (index, mut used) = decode_integer(data, prefix_bits)?;
                let name = if index == 0 {
                    let (name, n) = decode_string(&data[used..])?;
                    used += n;
                    name
                } else {
                    self.lookup(index)?.0
                };
                let (value, n) = decode_string(&data[used..])?;
                used += n;
                if index_it {
                    self.table.insert(name.clone(), value.clone());
                }
                headers.push((name, value));
                data = &data[used..];
            }
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_rfc_examples() {
        let mut out = Vec::new();
        encode_integer(10, 5, 0, &mut out);
        assert_eq!(out, [0x0a]);
        out.clear();
        encode_integer(1337, 5, 0, &mut out);
        assert_eq!(out, [0x1f, 0x9a, 0x0a]);
        assert_eq!(decode_integer(&[0x1f, 0x9a, 0x0a], 5).unwrap(), (1337, 3));
        assert!(decode_integer(&[0x1f, 0x9a], 5).is_err());
    }

    #[test]
    fn test_rfc7541_c4_requests_with_huffman() {
        let mut decoder = Decoder::new(4096);
        let first = [
            0x82, 0x86, 0x84, 0x41, 0x8c, 0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff,
        ];
        let headers = decoder.decode(&first).unwrap();
        assert_eq!(
            headers,
            vec![
                (":method".to_string(), "GET".to_string()),
                (":scheme".to_string(), "http".to_string()),
                (":path".to_string(), "/".to_string()),
                (":authority".to_string(), "www.example.com".to_string()),
            ]
        );
        let second = [0x82, 0x86, 0x84, 0xbe, 0x58, 0x86, 0xa8, 0xeb, 0x10, 0x64, 0x9c, 0xbf];
        let headers = decoder.decode(&second).unwrap();
        assert_eq!(headers[3].1, "www.example.com");
        assert_eq!(headers[4], ("cache-control".to_string(), "no-cache".to_string()));
        assert_eq!(decoder.table.size, 110);
    }

    #[test]
    fn test_encoder_matches_rfc_c4_first_request() {
        let mut encoder = Encoder::new(4096);
        let block = encoder.encode([
            (":method", "GET"),
            (":scheme", "http"),
            (":path", "/"),
            (":authority", "www.example.com"),
        ]);
        assert_eq!(
            block,
            [0x82, 0x86, 0x84, 0x41, 0x8c, 0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff]
        );
        // Second time round the authority comes from the dynamic table.
        let block = encoder.encode([(":authority", "www.example.com")]);
        assert_eq!(block, [0xbe]);
    }

    #[test]
    fn test_order_preserved_and_decodable() {
        let mut encoder = Encoder::new(4096);
        let mut decoder = Decoder::new(4096);
        let input = [
            (":method", "GET"),
            (":authority", "example.com"),
            (":scheme", "https"),
            (":path", "/x"),
            ("user-agent", "guise"),
            ("authorization", "Bearer secret"),
        ];
        for _ in 0..2 {
            let block = encoder.encode(input);
            let decoded = decoder.decode(&block).unwrap();
            let names: Vec<&str> = decoded.iter().map(|(n, _)| n.as_str()).collect();
            assert_eq!(names, [":method", ":authority", ":scheme", ":path", "user-agent", "authorization"]);
            assert_eq!(decoded[5].1, "Bearer secret");
        }
    }

    #[test]
    fn test_table_size_update() {
        let mut encoder = Encoder::new(4096);
        encoder.set_max_table_size(0);
        let block = encoder.encode([("x-a", "1")]);
        assert_eq!(block[0], 0x20);
        let mut decoder = Decoder::new(4096);
        decoder.decode(&block).unwrap();
        assert!(decoder.table.entries.is_empty());

        let mut strict = Decoder::new(100);
        assert!(strict.decode(&[0x3f, 0xe1, 0x1f]).is_err());
    }

    #[test]
    fn test_bad_index_is_error() {
        let mut decoder = Decoder::new(4096);
        assert!(decoder.decode(&[0x80]).is_err());
        assert!(decoder.decode(&[0xff, 0x00]).is_err());
    }
}
