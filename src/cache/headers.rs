//! Freshness policy from `Cache-Control` and `Expires`.
//!
//! Only these two headers are consulted; everything else about the response
//! is opaque to the cache.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// How a response should be cached, according to its headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// The response must not be stored.
    NoStore,
    /// Store with this TTL.
    Ttl(Duration),
    /// Headers say nothing usable; fall back to the configured default.
    Default,
}

/// Derive a [`CachePolicy`] from response headers. Names are matched
/// case-insensitively; `Cache-Control` wins over `Expires`.
pub fn ttl_from_headers<'a, I>(headers: I, now: DateTime<Utc>) -> CachePolicy
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut cache_control = None;
    let mut expires = None;
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("cache-control") {
            cache_control = Some(value.as_str());
        } else if name.eq_ignore_ascii_case("expires") {
            expires = Some(value.as_str());
        }
    }

    if let Some(policy) = cache_control.and_then(parse_cache_control) {
        return policy;
    }
    expires
        .and_then(|value| parse_expires(value, now))
        .unwrap_or(CachePolicy::Default)
}

fn parse_cache_control(value: &str) -> Option<CachePolicy> {
    let mut max_age = None;
    for directive in value.split(',') {
        let directive = directive.trim();
        let (name, arg) = match directive.split_once('=') {
            Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"'))),
            None => (directive, None),
        };
        if name.eq_ignore_ascii_case("no-store") || name.eq_ignore_ascii_case("no-cache") {
            return Some(CachePolicy::NoStore);
        }
        if name.eq_ignore_ascii_case("max-age") {
            max_age = arg.and_then(|a| a.parse::<u64>().ok());
        }
    }
    max_age.map(|secs| {
        if secs == 0 {
            CachePolicy::NoStore
        } else {
            CachePolicy::Ttl(Duration::from_secs(secs))
        }
    })
}

fn parse_expires(value: &str, now: DateTime<Utc>) -> Option<CachePolicy> {
    let expires = DateTime::parse_from_rfc2822(value.trim()).ok()?.with_timezone(&Utc);
    match (expires - now).to_std() {
        Ok(ttl) if !ttl.is_zero() => Some(CachePolicy::Ttl(ttl)),
        _ => Some(CachePolicy::NoStore),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_max_age() {
        let h = headers(&[("Cache-Control", "public, max-age=120")]);
        assert_eq!(
            ttl_from_headers(&h, now()),
            CachePolicy::Ttl(Duration::from_secs(120))
        );
    }

    #[test]
    fn test_no_store_and_zero_max_age() {
        let h = headers(&[("cache-control", "no-store")]);
        assert_eq!(ttl_from_headers(&h, now()), CachePolicy::NoStore);
        let h = headers(&[("cache-control", "max-age=0")]);
        assert_eq!(ttl_from_headers(&h, now()), CachePolicy::NoStore);
    }

    #[test]
    fn test_expires_in_future_and_past() {
        let h = headers(&[("Expires", "Sun, 01 Mar 2026 12:10:00 GMT")]);
        assert_eq!(
            ttl_from_headers(&h, now()),
            CachePolicy::Ttl(Duration::from_secs(600))
        );
        let h = headers(&[("Expires", "Sun, 01 Mar 2026 11:00:00 GMT")]);
        assert_eq!(ttl_from_headers(&h, now()), CachePolicy::NoStore);
    }

    #[test]
    fn test_cache_control_wins_over_expires() {
        let h = headers(&[
            ("Cache-Control", "max-age=5"),
            ("Expires", "Sun, 01 Mar 2026 12:10:00 GMT"),
        ]);
        assert_eq!(
            ttl_from_headers(&h, now()),
            CachePolicy::Ttl(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_unusable_headers_fall_back_to_default() {
        let h = headers(&[("Cache-Control", "public"), ("Expires", "garbage")]);
        assert_eq!(ttl_from_headers(&h, now()), CachePolicy::Default);
        assert_eq!(
            ttl_from_headers(&BTreeMap::new(), now()),
            CachePolicy::Default
        );
    }
}
