//! Two-tier response caching: key derivation, memory and disk tiers, offline
//! stale serving and the background expiration sweep.

pub mod disk;
pub mod entry;
pub mod headers;
pub mod key;
pub mod memory;
pub mod offline;
pub mod response_cache;
pub mod sweeper;

pub use disk::{DiskCache, DiskOptions};
pub use entry::{CacheEntry, ResponseMetadata};
pub use headers::{ttl_from_headers, CachePolicy};
pub use key::CacheKey;
pub use memory::{MemoryCache, TierStats};
pub use offline::{connectivity_channel, OfflineGate};
pub use response_cache::{CacheStatistics, ResponseCache};
pub use sweeper::{ExpirationSweeper, SweepReport};
