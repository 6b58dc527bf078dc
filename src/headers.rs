//! Ordered, case-insensitive, multi-valued header container.
//!
//! Names keep their original casing for serialization; lookups compare
//! ASCII-lowercased names. Insertion order is preserved, which matters for
//! fingerprinting since browsers send headers in a stable order.

use std::fmt;

/// Ordered header multimap.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append a value, keeping existing values for the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Set a header, replacing every existing value for that name.
    ///
    /// The first existing occurrence keeps its position (and takes the new
    /// casing); later duplicates are removed.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => {
                self.entries[idx] = (name.clone(), value);
                let mut i = 0;
                self.entries.retain(|(n, _)| {
                    let keep = i == idx || !n.eq_ignore_ascii_case(&name);
                    i += 1;
                    keep
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Remove every value for `name`, returning how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    /// Overlay `other` on top of `self`: names present in `other` replace
    /// ours (all values), new names are appended.
    pub fn merge(&mut self, other: &Headers) {
        let mut replaced: Vec<String> = Vec::new();
        for (name, value) in &other.entries {
            let lower = name.to_ascii_lowercase();
            if replaced.contains(&lower) {
                self.append(name.clone(), value.clone());
            } else {
                self.insert(name.clone(), value.clone());
                replaced.push(lower);
            }
        }
    }

    /// Stable-sort entries so names listed in `order` come first, in that
    /// order; unlisted names keep their relative order after them.
    pub fn sort_by_order(&mut self, order: &[String]) {
        if order.is_empty() {
            return;
        }
        let rank = |name: &str| {
            order
                .iter()
                .position(|o| o.eq_ignore_ascii_case(name))
                .unwrap_or(order.len())
        };
        self.entries.sort_by_key(|(n, _)| rank(n));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Owned `(name, value)` pairs in order.
    pub fn to_vec(&self) -> Vec<(String, String)> {
        self.entries.clone()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(n, v)| (n, v)))
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Headers {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.append(k, v);
        }
    }
}

impl IntoIterator for Headers {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup_preserves_casing() {
        let mut h = Headers::new();
        h.append("Content-Type", "text/html");
        assert_eq!(h.get("content-type"), Some("text/html"));
        assert_eq!(h.iter().next(), Some(("Content-Type", "text/html")));
    }

    #[test]
    fn test_multi_value_and_insert_replaces_in_place() {
        let mut h = Headers::new();
        h.append("Accept", "a");
        h.append("Set-Cookie", "x=1");
        h.append("set-cookie", "y=2");
        h.append("Host", "h");
        assert_eq!(h.get_all("SET-COOKIE"), vec!["x=1", "y=2"]);

        h.insert("Set-Cookie", "z=3");
        let names: Vec<_> = h.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Accept", "Set-Cookie", "Host"]);
        assert_eq!(h.get_all("set-cookie"), vec!["z=3"]);
    }

    #[test]
    fn test_merge_overrides_and_appends() {
        let mut base: Headers = [("User-Agent", "ua"), ("Accept", "*/*")]
            .into_iter()
            .collect();
        let over: Headers = [("accept", "text/plain"), ("X-A", "1"), ("x-a", "2")]
            .into_iter()
            .collect();
        base.merge(&over);
        assert_eq!(base.get("Accept"), Some("text/plain"));
        assert_eq!(base.get_all("x-a"), vec!["1", "2"]);
        assert_eq!(base.len(), 4);
    }

    #[test]
    fn test_sort_by_order() {
        let mut h: Headers = [("X-Custom", "1"), ("Accept", "a"), ("User-Agent", "u")]
            .into_iter()
            .collect();
        h.sort_by_order(&["user-agent".to_string(), "accept".to_string()]);
        let names: Vec<_> = h.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["User-Agent", "Accept", "X-Custom"]);
    }

    #[test]
    fn test_remove() {
        let mut h: Headers = [("A", "1"), ("a", "2"), ("B", "3")].into_iter().collect();
        assert_eq!(h.remove("A"), 2);
        assert!(!h.contains("a"));
        assert_eq!(h.len(), 1);
    }
}
