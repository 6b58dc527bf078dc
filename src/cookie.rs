//! RFC 6265 cookie handling.
//!
//! Cookies are keyed by (domain, path, name). The session owns one jar shared
//! by every request; each response also carries its own jar with the cookies
//! set along its redirect chain.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use url::Url;

use crate::error::{Error, Result};
use crate::headers::Headers;

/// Prefix curl and browsers use for HttpOnly entries in Netscape files.
const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// A single cookie with its RFC 6265 attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lowercased, without a leading dot.
    pub domain: String,
    pub path: String,
    /// Set when the cookie had no Domain attribute: only sent to the exact host.
    pub host_only: bool,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<String>,
    /// `None` for session cookies.
    pub expires: Option<DateTime<Utc>>,
}

impl Cookie {
    /// A host-only session cookie for `domain` with path `/`.
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: normalize_domain(&domain.into()),
            path: "/".to_string(),
            host_only: true,
            secure: false,
            http_only: false,
            same_site: None,
            expires: None,
        }
    }

    /// Parse a `Set-Cookie` value received from `url`.
    ///
    /// Rejects cookies whose Domain attribute does not cover the request
    /// host, and single-label Domain attributes other than the host itself.
    pub fn parse(header: &str, url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::CookieParse("no host in URL".to_string()))?
            .to_ascii_lowercase();

        let mut parts = header.split(';');
        let pair = parts.next().unwrap_or_default();
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::CookieParse(format!("missing '=' in {pair:?}")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::CookieParse("empty cookie name".to_string()));
        }
        let value = value.trim().trim_matches('"');

        let mut cookie = Cookie::new(name, value, host.clone());
        cookie.path = default_path(url);

        let mut max_age: Option<i64> = None;
        let mut expires: Option<DateTime<Utc>> = None;

        for attr in parts {
            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (attr.trim(), ""),
            };
            match key.to_ascii_lowercase().as_str() {
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" if !val.is_empty() => cookie.same_site = Some(val.to_string()),
                "path" if val.starts_with('/') => cookie.path = val.to_string(),
                // An unparsable Max-Age is ignored, not fatal.
                "max-age" => match val.parse::<i64>() {
                    Ok(secs) => max_age = Some(secs),
                    Err(_) => tracing::debug!(value = val, "ignoring malformed Max-Age"),
                },
                "expires" => expires = parse_cookie_date(val),
                "domain" if !val.is_empty() => {
                    let domain = normalize_domain(val);
                    if domain != host {
                        if !domain.contains('.') {
                            return Err(Error::CookieParse(format!(
                                "Domain={domain} is a single label"
                            )));
                        }
                        if !domain_match(&host, &domain) {
                            return Err(Error::CookieParse(format!(
                                "Domain={domain} does not match host {host}"
                            )));
                        }
                    }
                    cookie.domain = domain;
                    cookie.host_only = false;
                }
                _ => {}
            }
        }

        // Max-Age wins over Expires; non-positive means "delete now".
        cookie.expires = match max_age {
            Some(secs) if secs <= 0 => Some(DateTime::<Utc>::MIN_UTC),
            Some(secs) => Some(
                ChronoDuration::try_seconds(secs)
                    .and_then(|delta| Utc::now().checked_add_signed(delta))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            ),
            None => expires,
        };

        Ok(cookie)
    }

    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|at| at <= Utc::now())
    }

    /// Whether this cookie should be sent with a request to `url`.
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        if self.is_expired() {
            return false;
        }
        if self.secure && url.scheme() != "https" {
            return false;
        }
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_match(&host, &self.domain)
        };
        domain_ok && path_match(url.path(), &self.path)
    }

    fn key(&self) -> CookieKey {
        (self.domain.clone(), self.path.clone(), self.name.clone())
    }

    pub fn to_netscape_line(&self) -> String {
        let domain = if self.host_only {
            self.domain.clone()
        } else {
            format!(".{}", self.domain)
        };
        format!(
            "{}{}\t{}\t{}\t{}\t{}\t{}\t{}",
            if self.http_only { HTTP_ONLY_PREFIX } else { "" },
            domain,
            if self.host_only { "FALSE" } else { "TRUE" },
            self.path,
            if self.secure { "TRUE" } else { "FALSE" },
            self.expires.map(|dt| dt.timestamp()).unwrap_or(0),
            self.name,
            self.value
        )
    }

    pub fn from_netscape_line(line: &str) -> Result<Self> {
        let (http_only, line) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 7 {
            return Err(Error::CookieParse(format!(
                "invalid Netscape line: expected 7 fields, got {}",
                parts.len()
            )));
        }
        Ok(Cookie {
            name: parts[5].to_string(),
            value: parts[6].to_string(),
            domain: normalize_domain(parts[0]),
            path: parts[2].to_string(),
            host_only: !parts[1].eq_ignore_ascii_case("true"),
            secure: parts[3].eq_ignore_ascii_case("true"),
            http_only,
            same_site: None,
            expires: parts[4]
                .parse::<i64>()
                .ok()
                .filter(|&ts| ts > 0)
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        })
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

type CookieKey = (String, String, String);

#[derive(Debug, Clone)]
struct Entry {
    cookie: Cookie,
    seq: u64,
}

/// Cookie store keyed by (domain, path, name).
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    cookies: HashMap<CookieKey, Entry>,
    next_seq: u64,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a cookie. An already-expired cookie deletes the
    /// stored one with the same key instead.
    pub fn store(&mut self, cookie: Cookie) {
        let key = cookie.key();
        if cookie.is_expired() {
            if self.cookies.remove(&key).is_some() {
                tracing::debug!(name = %cookie.name, domain = %cookie.domain, "cookie deleted");
            }
            return;
        }
        // Replacement keeps the original creation order.
        let seq = match self.cookies.get(&key) {
            Some(existing) => existing.seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.cookies.insert(key, Entry { cookie, seq });
    }

    /// Set a host-only cookie for `domain` at path `/`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) {
        self.store(Cookie::new(name, value, domain));
    }

    /// Store every `Set-Cookie` header of a response to `url`.
    ///
    /// Invalid cookies are skipped with a warning. Returns the number stored.
    pub fn store_from_headers(&mut self, headers: &Headers, url: &Url) -> usize {
        let mut stored = 0;
        for raw in headers.get_all("set-cookie") {
            match Cookie::parse(raw, url) {
                Ok(cookie) => {
                    self.store(cookie);
                    stored += 1;
                }
                Err(e) => tracing::warn!(url = %url, error = %e, "ignoring Set-Cookie"),
            }
        }
        stored
    }

    /// Copy every cookie of `other` into this jar.
    pub fn merge(&mut self, other: &CookieJar) {
        let mut entries: Vec<&Entry> = other.cookies.values().collect();
        entries.sort_by_key(|e| e.seq);
        for entry in entries {
            self.store(entry.cookie.clone());
        }
    }

    /// Cookies to send to `url`: longer paths first, then oldest first.
    pub fn matching(&self, url: &Url) -> Vec<&Cookie> {
        let mut found: Vec<&Entry> = self
            .cookies
            .values()
            .filter(|e| e.cookie.matches(url))
            .collect();
        found.sort_by(|a, b| {
            b.cookie
                .path
                .len()
                .cmp(&a.cookie.path.len())
                .then(a.seq.cmp(&b.seq))
        });
        found.into_iter().map(|e| &e.cookie).collect()
    }

    /// `Cookie` header value for `url`, if any cookie matches.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        let cookies = self.matching(url);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// All live cookies, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        let mut entries: Vec<&Entry> = self
            .cookies
            .values()
            .filter(|e| !e.cookie.is_expired())
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| &e.cookie)
    }

    /// Value of the first live cookie named `name`, any domain or path.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter().find(|c| c.name == name).map(|c| c.value.as_str())
    }

    pub fn get_exact(&self, domain: &str, path: &str, name: &str) -> Option<&Cookie> {
        self.cookies
            .get(&(normalize_domain(domain), path.to_string(), name.to_string()))
            .map(|e| &e.cookie)
    }

    pub fn remove(&mut self, domain: &str, path: &str, name: &str) -> Option<Cookie> {
        self.cookies
            .remove(&(normalize_domain(domain), path.to_string(), name.to_string()))
            .map(|e| e.cookie)
    }

    /// Drop expired cookies.
    pub fn purge_expired(&mut self) {
        self.cookies.retain(|_, e| !e.cookie.is_expired());
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Write the jar in Netscape cookie file format.
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(b"# Netscape HTTP Cookie File\n").await?;
        for cookie in self.iter() {
            let line = format!("{}\n", cookie.to_netscape_line());
            file.write_all(line.as_bytes()).await?;
        }
        file.flush().await?;
        Ok(())
    }

    /// Load cookies from a Netscape cookie file. Malformed lines are skipped.
    pub async fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let file = tokio::fs::File::open(path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut loaded = 0;
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim_end();
            let is_comment = trimmed.starts_with('#') && !trimmed.starts_with(HTTP_ONLY_PREFIX);
            if trimmed.is_empty() || is_comment {
                continue;
            }
            match Cookie::from_netscape_line(trimmed) {
                Ok(cookie) => {
                    self.store(cookie);
                    loaded += 1;
                }
                Err(e) => tracing::warn!(error = %e, "skipping cookie file line"),
            }
        }
        Ok(loaded)
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// RFC 6265 §5.1.3. IP hosts only match exactly.
fn domain_match(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    host.parse::<IpAddr>().is_err()
        && host.len() > domain.len()
        && host.ends_with(domain)
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
}

/// RFC 6265 §5.1.4.
fn path_match(request_path: &str, cookie_path: &str) -> bool {
    let request_path = if request_path.is_empty() { "/" } else { request_path };
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/'))
}

/// RFC 6265 §5.1.4 default-path of a request URL.
fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in [
        "%a, %d %b %Y %H:%M:%S GMT",
        "%a, %d-%b-%Y %H:%M:%S GMT",
        "%a, %d-%b-%y %H:%M:%S GMT",
        "%A, %d-%b-%y %H:%M:%S GMT",
        "%a %b %e %H:%M:%S %Y",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt.and_utc());
        }
    }
    None
}
