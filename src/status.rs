//! Static status-code to reason-phrase table.

/// Reason phrase returned for codes missing from the table.
pub const UNKNOWN_REASON: &str = "UNKNOWN";

/// Sorted by code; looked up with a binary search.
static REASONS: &[(u16, &str)] = &[
    (100, "Continue"),
    (101, "Switching Protocols"),
    (102, "Processing"),
    (103, "Early Hints"),
    (200, "OK"),
    (201, "Created"),
    (202, "Accepted"),
    (203, "Non-Authoritative Information"),
    (204, "No Content"),
    (205, "Reset Content"),
    (206, "Partial Content"),
    (207, "Multi-Status"),
    (208, "Already Reported"),
    (226, "IM Used"),
    (300, "Multiple Choices"),
    (301, "Moved Permanently"),
    (302, "Found"),
    (303, "See Other"),
    (304, "Not Modified"),
    (307, "Temporary Redirect"),
    (308, "Permanent Redirect"),
    (400, "Bad Request"),
    (401, "Unauthorized"),
    (402, "Payment Required"),
    (403, "Forbidden"),
    (404, "Not Found"),
    (405, "Method Not Allowed"),
    (406, "Not Acceptable"),
    (407, "Proxy Authentication Required"),
    (408, "Request Timeout"),
    (409, "Conflict"),
    (410, "Gone"),
    (411, "Length Required"),
    (412, "Precondition Failed"),
    (413, "Payload Too Large"),
    (414, "URI Too Long"),
    (415, "Unsupported Media Type"),
    (416, "Range Not Satisfiable"),
    (417, "Expectation Failed"),
    (418, "I'm a teapot"),
    (421, "Misdirected Request"),
    (422, "Unprocessable Entity"),
    (426, "Upgrade Required"),
    (428, "Precondition Required"),
    (429, "Too Many Requests"),
    (431, "Request Header Fields Too Large"),
    (451, "Unavailable For Legal Reasons"),
    (500, "Internal Server Error"),
    (501, "Not Implemented"),
    (502, "Bad Gateway"),
    (503, "Service Unavailable"),
    (504, "Gateway Timeout"),
    (505, "HTTP Version Not Supported"),
    (506, "Variant Also Negotiates"),
    (507, "Insufficient Storage"),
    (508, "Loop Detected"),
    (510, "Not Extended"),
    (511, "Network Authentication Required"),
];

/// Reason phrase for a status code, `"UNKNOWN"` if not in the table.
pub fn reason_phrase(status: u16) -> &'static str {
    REASONS
        .binary_search_by_key(&status, |(code, _)| *code)
        .map(|idx| REASONS[idx].1)
        .unwrap_or(UNKNOWN_REASON)
}

/// Error class used by `raise_for_status`, `None` below 400 or at/after 600.
pub fn error_class(status: u16) -> Option<&'static str> {
    match status {
        400..=499 => Some("Client"),
        500..=599 => Some("Server"),
        _ => None,
    }
}

/// Redirect statuses that carry a `Location`.
pub fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_sorted() {
        assert!(REASONS.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_known_and_unknown() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(404), "Not Found");
        assert_eq!(reason_phrase(418), "I'm a teapot");
        assert_eq!(reason_phrase(299), UNKNOWN_REASON);
        assert_eq!(reason_phrase(0), UNKNOWN_REASON);
    }

    #[test]
    fn test_error_class() {
        assert_eq!(error_class(404), Some("Client"));
        assert_eq!(error_class(503), Some("Server"));
        assert_eq!(error_class(302), None);
        assert_eq!(error_class(600), None);
    }
}
