//! response-cache - two-tier response cache
//!
//! Sits in front of a network client and avoids redundant fetches:
//! - Memory tier: byte-bounded LRU for hot entries
//! - Disk tier: one crash-safe JSON file per entry, size-bounded LRU eviction
//! - Offline gate: serves recently expired entries while disconnected
//! - Background sweep of expired entries
//!
//! ```no_run
//! use response_cache::{CacheConfig, CacheKey, ResponseCache};
//! use std::time::Duration;
//!
//! # async fn demo() -> response_cache::Result<()> {
//! let cache = ResponseCache::open(CacheConfig::default()).await?;
//! let key = CacheKey::new("https://example.com/api/items");
//!
//! if cache.get(&key).await.is_none() {
//!     let body = br#"{"items":[]}"#.to_vec();
//!     cache.set(body, &key, Some(Duration::from_secs(60))).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;

pub use cache::{
    CacheEntry, CacheKey, CachePolicy, CacheStatistics, ResponseCache, ResponseMetadata,
    SweepReport,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
