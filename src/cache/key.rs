//! Request identity for cache lookups.
//!
//! A [`CacheKey`] is derived from `(method, url, headers)`. Header names are
//! lowercased and sorted so insertion order never changes identity; repeated
//! names are combined into one comma-separated value. The
//! storage identifier is a SHA-256 digest of the length-prefixed components,
//! which rules out separator collisions such as a URL containing `|`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};

/// Length of [`CacheKey::hashed_value`] in hex characters.
pub const HASH_LEN: usize = 64;

/// Canonical identity of a cached request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: String,
    url: String,
    headers: BTreeMap<String, String>,
    value: String,
    hashed_value: String,
}

impl CacheKey {
    /// `GET` key with no headers.
    pub fn new(url: impl Into<String>) -> Self {
        Self::derive(url, "GET", std::iter::empty::<(String, String)>())
    }

    /// Derive a key from a method, URL and the headers that should partition
    /// the cache.
    pub fn derive<I, K, V>(url: impl Into<String>, method: &str, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let method = method.trim().to_uppercase();
        let url = url.into();
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers {
            grouped
                .entry(name.as_ref().trim().to_ascii_lowercase())
                .or_default()
                .push(value.into());
        }
        // Names that collide after lowercasing are merged, values sorted, so
        // identity never depends on insertion order.
        let headers: BTreeMap<String, String> = grouped
            .into_iter()
            .map(|(name, mut values)| {
                values.sort();
                (name, values.join(", "))
            })
            .collect();

        let value = canonical_value(&method, &url, &headers);
        let hashed_value = digest(&method, &url, &headers);
        Self {
            method,
            url,
            headers,
            value,
            hashed_value,
        }
    }

    /// Derive a key using only the headers named in `include`.
    ///
    /// Matching is case-insensitive. Use this to keep volatile headers
    /// (request ids, dates) out of identity while letting e.g.
    /// `Authorization` partition the cache per user.
    pub fn with_selected_headers(
        url: impl Into<String>,
        method: &str,
        headers: &HashMap<String, String>,
        include: &[&str],
    ) -> Self {
        let selected = headers
            .iter()
            .filter(|(name, _)| include.iter().any(|inc| inc.eq_ignore_ascii_case(name)))
            .map(|(name, value)| (name.as_str(), value.clone()));
        Self::derive(url, method, selected)
    }

    /// Validate a bare storage hash, e.g. one taken from a file name.
    pub fn validate_hash(hash: &str) -> Result<()> {
        if hash.len() == HASH_LEN && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            Ok(())
        } else {
            Err(CacheError::InvalidKey(format!(
                "expected {HASH_LEN} lowercase hex characters, got {hash:?}"
            )))
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Human-readable canonical form.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Filesystem-safe digest used as the storage identifier.
    pub fn hashed_value(&self) -> &str {
        &self.hashed_value
    }

    /// First 8 characters of the hash, for log lines.
    pub(crate) fn short(&self) -> &str {
        short_hash(&self.hashed_value)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

pub(crate) fn short_hash(hash: &str) -> &str {
    &hash[..8.min(hash.len())]
}

fn canonical_value(method: &str, url: &str, headers: &BTreeMap<String, String>) -> String {
    let mut value = format!("{method} {url}");
    for (name, header_value) in headers {
        value.push('\n');
        value.push_str(name);
        value.push_str(": ");
        value.push_str(header_value);
    }
    value
}

fn digest(method: &str, url: &str, headers: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    update_prefixed(&mut hasher, method);
    update_prefixed(&mut hasher, url);
    hasher.update((headers.len() as u64).to_le_bytes());
    for (name, value) in headers {
        update_prefixed(&mut hasher, name);
        update_prefixed(&mut hasher, value);
    }
    hex::encode(hasher.finalize())
}

fn update_prefixed(hasher: &mut Sha256, part: &str) {
    hasher.update((part.len() as u64).to_le_bytes());
    hasher.update(part.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_deterministic() {
        let k1 = CacheKey::derive("https://x/y", "get", [("Accept", "json")]);
        let k2 = CacheKey::derive("https://x/y", "GET", [("Accept", "json")]);
        assert_eq!(k1.hashed_value(), k2.hashed_value());
        assert_eq!(k1.method(), "GET");
        assert_eq!(k1.hashed_value().len(), HASH_LEN);
    }

    #[test]
    fn test_key_header_order_independent() {
        let k1 = CacheKey::derive("https://x/y", "GET", [("a", "1"), ("b", "2")]);
        let k2 = CacheKey::derive("https://x/y", "GET", [("b", "2"), ("a", "1")]);
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_key_header_name_case_insensitive() {
        let k1 = CacheKey::derive("https://x/y", "GET", [("Authorization", "t")]);
        let k2 = CacheKey::derive("https://x/y", "GET", [("authorization", "t")]);
        assert_eq!(k1.hashed_value(), k2.hashed_value());
    }

    #[test]
    fn test_key_case_colliding_headers_order_independent() {
        let k1 = CacheKey::derive(
            "https://x/y",
            "GET",
            [("Authorization", "alice"), ("authorization", "bob")],
        );
        let k2 = CacheKey::derive(
            "https://x/y",
            "GET",
            [("authorization", "bob"), ("Authorization", "alice")],
        );
        assert_eq!(k1.hashed_value(), k2.hashed_value());
        assert_eq!(k1.headers()["authorization"], "alice, bob");
        assert_eq!(k1.value(), "GET https://x/y\nauthorization: alice, bob");

        let single = CacheKey::derive("https://x/y", "GET", [("authorization", "bob")]);
        assert_ne!(k1.hashed_value(), single.hashed_value());
    }

    #[test]
    fn test_key_sensitive_to_each_component() {
        let base = CacheKey::derive("https://x/y", "GET", [("auth", "a")]);
        let other_method = CacheKey::derive("https://x/y", "POST", [("auth", "a")]);
        let other_url = CacheKey::derive("https://x/z", "GET", [("auth", "a")]);
        let other_value = CacheKey::derive("https://x/y", "GET", [("auth", "b")]);
        assert_ne!(base.hashed_value(), other_method.hashed_value());
        assert_ne!(base.hashed_value(), other_url.hashed_value());
        assert_ne!(base.hashed_value(), other_value.hashed_value());
    }

    #[test]
    fn test_key_no_separator_collision() {
        let k1 = CacheKey::derive("https://x/y", "GET", [("a", "b: c")]);
        let k2 = CacheKey::derive("https://x/y", "GET", [("a: b", "c")]);
        assert_eq!(k1.value(), k2.value(), "canonical strings coincide");
        assert_ne!(
            k1.hashed_value(),
            k2.hashed_value(),
            "length-prefixed digest must still separate them"
        );
    }

    #[test]
    fn test_selected_headers_filters_volatile() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer 1".to_string());
        headers.insert("X-Request-Id".to_string(), "abc".to_string());
        let k1 = CacheKey::with_selected_headers("https://x/y", "GET", &headers, &["authorization"]);

        headers.insert("X-Request-Id".to_string(), "def".to_string());
        let k2 = CacheKey::with_selected_headers("https://x/y", "GET", &headers, &["authorization"]);

        assert_eq!(k1, k2);
        assert_eq!(k1.headers().len(), 1);
        assert!(k1.headers().contains_key("authorization"));
    }

    #[test]
    fn test_new_is_plain_get() {
        let key = CacheKey::new("https://x/y");
        assert_eq!(key.value(), "GET https://x/y");
        assert_eq!(key, CacheKey::derive("https://x/y", "GET", Vec::<(String, String)>::new()));
    }

    #[test]
    fn test_validate_hash() {
        let key = CacheKey::new("https://x/y");
        assert!(CacheKey::validate_hash(key.hashed_value()).is_ok());
        assert!(CacheKey::validate_hash("../etc/passwd").is_err());
        assert!(CacheKey::validate_hash(&key.hashed_value().to_uppercase()).is_err());
    }
}
