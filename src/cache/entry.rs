//! The cached record: payload bytes plus lifecycle timestamps.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response details kept alongside the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub url: String,
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// A single cached payload.
///
/// Entries are values: reading one yields an access-refreshed copy via
/// [`CacheEntry::accessed`] instead of mutating the stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    /// `None` means the entry never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<ResponseMetadata>,
}

impl CacheEntry {
    /// Build a fresh entry created at `now`, expiring after `ttl` if given.
    pub fn new(
        payload: Vec<u8>,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
        metadata: Option<ResponseMetadata>,
    ) -> Self {
        let expires_at = ttl.map(|ttl| add_saturating(now, ttl));
        Self {
            payload,
            created_at: now,
            expires_at,
            last_accessed_at: now,
            metadata,
        }
    }

    /// Payload size in bytes; the unit all capacity budgets are measured in.
    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if now >= expires_at)
    }

    /// Expired, but by less than `max_stale_age`.
    pub fn is_stale(&self, max_stale_age: Duration, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                now >= expires_at && now < add_saturating(expires_at, max_stale_age)
            }
            None => false,
        }
    }

    /// Copy of this entry with `last_accessed_at = now`.
    #[must_use]
    pub fn accessed(&self, now: DateTime<Utc>) -> Self {
        Self {
            last_accessed_at: now,
            ..self.clone()
        }
    }
}

/// `at + d`, clamped to the latest representable instant.
pub(crate) fn add_saturating(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
