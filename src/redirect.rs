//! Redirect rules: where the next leg goes, with which method, body and
//! headers.

use http::Method;
use url::Url;

use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::status;

/// Default cap on redirect legs per request.
pub const DEFAULT_MAX_REDIRECTS: u32 = 30;

/// Headers that describe the request body.
const BODY_HEADERS: [&str; 4] = ["content-type", "content-length", "content-encoding", "transfer-encoding"];

/// Headers that must not follow a redirect to another origin.
const SENSITIVE_HEADERS: [&str; 5] = ["authorization", "proxy-authorization", "www-authenticate", "cookie", "cookie2"];

/// The next leg of a redirect chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectPlan {
    pub url: Url,
    pub method: Method,
    /// 307/308 resend the original body.
    pub keep_body: bool,
}

/// Plan the follow-up for a response, `None` when it is not a redirect
/// or carries no `Location`.
pub fn plan(status: u16, method: &Method, current: &Url, headers: &Headers) -> Result<Option<RedirectPlan>> {
    if !status::is_redirect(status) {
        return Ok(None);
    }
    let Some(location) = headers.get("location") else {
        return Ok(None);
    };
    let url = resolve_location(current, location)?;
    let (method, keep_body) = match status {
        307 | 308 => (method.clone(), true),
        _ if *method == Method::HEAD => (Method::HEAD, false),
        _ => (Method::GET, false),
    };
    Ok(Some(RedirectPlan { url, method, keep_body }))
}

/// Resolve a `Location` value against the URL that produced it.
pub fn resolve_location(current: &Url, location: &str) -> Result<Url> {
    let mut url = current
        .join(location.trim())
        .map_err(|e| Error::InvalidRedirect(format!("bad Location {location:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidRedirect(format!("unsupported redirect scheme in {url}")));
    }
    if url.fragment().is_none() {
        url.set_fragment(current.fragment());
    }
    Ok(url)
}

/// Adjust caller headers for the next leg. A caller `Cookie` survives
/// same-origin hops only; jar cookies are added per leg by the session.
pub fn rewrite_headers(headers: &mut Headers, previous: &Url, plan: &RedirectPlan) {
    if !plan.keep_body {
        for name in BODY_HEADERS {
            headers.remove(name);
        }
    }
    let cross_host = previous.host_str() != plan.url.host_str()
        || previous.port_or_known_default() != plan.url.port_or_known_default();
    if cross_host {
        headers.remove("host");
        for name in SENSITIVE_HEADERS {
            headers.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(value: &str) -> Headers {
        let mut h = Headers::new();
        h.insert("Location", value);
        h
    }

    #[test]
    fn test_method_rules() {
        let url = Url::parse("https://a.example/form").unwrap();
        let p = plan(301, &Method::POST, &url, &location("/done")).unwrap().unwrap();
        assert_eq!(p.method, Method::GET);
        assert!(!p.keep_body);
        assert_eq!(p.url.as_str(), "https://a.example/done");

        let p = plan(307, &Method::POST, &url, &location("/again")).unwrap().unwrap();
        assert_eq!(p.method, Method::POST);
        assert!(p.keep_body);

        let p = plan(308, &Method::PUT, &url, &location("/again")).unwrap().unwrap();
        assert_eq!(p.method, Method::PUT);

        let p = plan(303, &Method::HEAD, &url, &location("/x")).unwrap().unwrap();
        assert_eq!(p.method, Method::HEAD);
        let p = plan(302, &Method::DELETE, &url, &location("/x")).unwrap().unwrap();
        assert_eq!(p.method, Method::GET);
    }

    #[test]
    fn test_not_a_redirect() {
        let url = Url::parse("https://a.example/").unwrap();
        assert!(plan(200, &Method::GET, &url, &location("/x")).unwrap().is_none());
        assert!(plan(304, &Method::GET, &url, &location("/x")).unwrap().is_none());
        assert!(plan(302, &Method::GET, &url, &Headers::new()).unwrap().is_none());
    }

    #[test]
    fn test_resolve_location() {
        let url = Url::parse("http://a.example/dir/page#top").unwrap();
        assert_eq!(resolve_location(&url, "next").unwrap().as_str(), "http://a.example/dir/next#top");
        assert_eq!(
            resolve_location(&url, "//b.example/p").unwrap().as_str(),
            "http://b.example/p#top"
        );
        assert!(matches!(
            resolve_location(&url, "ftp://b.example/"),
            Err(Error::InvalidRedirect(_))
        ));
    }

    #[test]
    fn test_rewrite_headers() {
        let previous = Url::parse("https://a.example/").unwrap();
        let mut headers = Headers::new();
        headers.insert("Authorization", "Bearer t");
        headers.insert("Content-Type", "application/json");
        headers.insert("Cookie", "a=1");
        headers.insert("Accept", "*/*");

        let same_host = RedirectPlan {
            url: Url::parse("https://a.example/next").unwrap(),
            method: Method::GET,
            keep_body: false,
        };
        let mut h = headers.clone();
        rewrite_headers(&mut h, &previous, &same_host);
        assert!(h.contains("authorization"));
        assert!(!h.contains("content-type"));
        assert_eq!(h.get("cookie"), Some("a=1"));

        let other_host = RedirectPlan {
            url: Url::parse("https://b.example/next").unwrap(),
            method: Method::POST,
            keep_body: true,
        };
        let mut h = headers.clone();
        rewrite_headers(&mut h, &previous, &other_host);
        assert!(!h.contains("authorization"));
        assert!(!h.contains("cookie"));
        assert!(h.contains("content-type"));
        assert!(h.contains("accept"));
    }
}
