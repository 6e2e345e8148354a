//! Two-tier response cache with TTL expiry, LRU eviction and offline stale
//! serving.
//!
//! Lookups go memory → disk → stale. Disk hits are promoted into memory.
//! Writes go through both tiers. Concurrent lookups for the same key share a
//! single in-flight operation, and hit/miss counters are kept for
//! [`CacheStatistics`].
//!
//! Entries live under `<platform cache dir>/<disk_cache_directory>/`, one
//! `<sha256>.cache` JSON file per key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, warn};

use super::disk::{DiskCache, DiskOptions};
use super::entry::{CacheEntry, ResponseMetadata};
use super::headers::{ttl_from_headers, CachePolicy};
use super::key::{short_hash, CacheKey};
use super::memory::{MemoryCache, TierStats};
use super::offline::OfflineGate;
use super::sweeper::{sweep_once, ExpirationSweeper, SweepReport};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

type InFlight = Shared<BoxFuture<'static, Result<Option<Vec<u8>>>>>;

static SHARED: OnceCell<ResponseCache> = OnceCell::const_new();

/// Point-in-time counters and tier sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub memory: TierStats,
    pub disk: TierStats,
}

impl CacheStatistics {
    /// Percentage of lookups served from cache; 0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

struct CacheInner {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    memory: Arc<MemoryCache>,
    disk: DiskCache,
    offline: Option<OfflineGate>,
    sweeper: ExpirationSweeper,
    hits: AtomicU64,
    misses: AtomicU64,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

/// The cache engine. Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<CacheInner>,
}

impl ResponseCache {
    /// Open a cache using the system clock and no connectivity signal.
    pub async fn open(config: CacheConfig) -> Result<Self> {
        Self::open_with(config, Arc::new(SystemClock), None).await
    }

    /// Open a cache with an explicit clock and connectivity receiver
    /// (`true` = online). The receiver is ignored unless
    /// `offline_mode_enabled` is set.
    pub async fn open_with(
        config: CacheConfig,
        clock: Arc<dyn Clock>,
        connectivity: Option<watch::Receiver<bool>>,
    ) -> Result<Self> {
        config.validate()?;

        let memory = Arc::new(
            MemoryCache::new(config.memory_capacity_bytes, Arc::clone(&clock))
                .with_debug_logging(config.debug_logging),
        );
        let disk = DiskCache::open(
            config.cache_dir(),
            DiskOptions {
                capacity: config.disk_capacity_bytes,
                lru_eviction: config.lru_eviction_enabled,
                debug_logging: config.debug_logging,
            },
            Arc::clone(&clock),
        )
        .await?;

        let offline = match connectivity {
            Some(rx) if config.offline_mode_enabled => {
                Some(OfflineGate::new(rx, disk.clone(), config.max_stale_age()))
            }
            _ => None,
        };
        let sweeper =
            ExpirationSweeper::new(Arc::clone(&memory), disk.clone(), config.cleanup_interval());

        Ok(Self {
            inner: Arc::new(CacheInner {
                config,
                clock,
                memory,
                disk,
                offline,
                sweeper,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                in_flight: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Process-wide instance built on first use from
    /// [`CacheConfig::default`] plus `RESPONSE_CACHE_*` overrides, with its
    /// sweeper running on the runtime of the first caller.
    ///
    /// Independent instances (e.g. in tests) should use [`Self::open`].
    pub async fn shared() -> Result<Self> {
        SHARED
            .get_or_try_init(|| async {
                let mut config = CacheConfig::default();
                config.apply_env_overrides();
                let cache = Self::open(config).await?;
                cache.start_sweeper();
                Ok::<_, CacheError>(cache)
            })
            .await
            .cloned()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Look up a payload. Disk faults degrade to a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let hash = key.hashed_value();
        let inner = Arc::clone(&self.inner);
        let owned = hash.to_string();
        let flight = self
            .inner
            .flight(hash, move || async move { Ok(inner.lookup(&owned).await) });
        match flight.await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key.short(), error = %e, "In-flight lookup failed");
                None
            }
        }
    }

    /// Look up a payload, and on a miss run `fetch`, store its result with
    /// `ttl` and return it. Concurrent callers for the same key share one
    /// fetch. Only a failed fetch is an error; a payload that cannot be
    /// cached is still returned.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &CacheKey,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<Vec<u8>, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let hash = key.hashed_value();
        let mut fetch = Some(fetch);
        loop {
            let flight = self.inner.flight(hash, || {
                let inner = Arc::clone(&self.inner);
                let owned = hash.to_string();
                let fetch = fetch.take();
                async move { inner.lookup_or_fetch(&owned, ttl, fetch).await }
            });

            match flight.await? {
                Some(payload) => return Ok(payload),
                // Joined a plain lookup that missed; run our own fetch next.
                None if fetch.is_some() => continue,
                None => return Err(CacheError::EntryNotFound(key.value().to_string())),
            }
        }
    }

    /// Full entry (with metadata) along the memory → disk path. Does not
    /// touch statistics or check expiry.
    pub async fn get_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        let hash = key.hashed_value();
        if let Some(entry) = self.inner.memory.get(hash) {
            return Some(entry);
        }
        match self.inner.disk.get(hash).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key.short(), error = %e, "Disk lookup failed");
                None
            }
        }
    }

    /// Store `payload` under `key` in both tiers. `ttl = None` uses the
    /// configured default. The memory write stands even if the disk write
    /// fails.
    pub async fn set(&self, payload: Vec<u8>, key: &CacheKey, ttl: Option<Duration>) -> Result<()> {
        let ttl = ttl.unwrap_or_else(|| self.inner.config.default_ttl());
        self.inner
            .store(key.hashed_value(), payload, Some(ttl), None)
            .await
    }

    /// Store a response, honouring its `Cache-Control` / `Expires` headers.
    /// Returns `false` when the headers forbid caching.
    pub async fn store_response(
        &self,
        payload: Vec<u8>,
        key: &CacheKey,
        metadata: ResponseMetadata,
    ) -> Result<bool> {
        let ttl = match ttl_from_headers(&metadata.headers, self.inner.clock.now()) {
            CachePolicy::NoStore => {
                if self.inner.config.debug_logging {
                    debug!(key = %key.short(), "Response headers forbid caching");
                }
                return Ok(false);
            }
            CachePolicy::Ttl(ttl) => ttl,
            CachePolicy::Default => self.inner.config.default_ttl(),
        };
        self.inner
            .store(key.hashed_value(), payload, Some(ttl), Some(metadata))
            .await?;
        Ok(true)
    }

    /// Remove `key` from both tiers. Absent keys are not an error.
    pub async fn remove(&self, key: &CacheKey) -> Result<()> {
        let hash = key.hashed_value();
        self.inner.memory.remove(hash);
        self.inner.disk.remove(hash).await
    }

    /// Empty both tiers and reset hit/miss counters.
    pub async fn clear(&self) -> Result<()> {
        self.inner.memory.remove_all();
        self.inner.disk.remove_all().await?;
        self.inner.hits.store(0, Ordering::Relaxed);
        self.inner.misses.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Whether either tier holds `key`, expired or not.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        let hash = key.hashed_value();
        self.inner.memory.contains(hash) || self.inner.disk.contains(hash).await
    }

    pub async fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            memory: self.inner.memory.statistics(),
            disk: self.inner.disk.statistics().await,
        }
    }

    /// Run one expiration sweep now.
    pub async fn remove_expired(&self) -> SweepReport {
        sweep_once(&self.inner.memory, &self.inner.disk).await
    }

    /// Start the background expiration sweep on the current Tokio runtime.
    /// Outside a runtime this logs a warning and does nothing.
    pub fn start_sweeper(&self) {
        self.inner.sweeper.start();
    }

    pub fn stop_sweeper(&self) {
        self.inner.sweeper.stop();
    }

    pub fn is_sweeper_running(&self) -> bool {
        self.inner.sweeper.is_running()
    }

    /// Whether the offline gate currently reports no connectivity.
    pub fn is_offline(&self) -> bool {
        self.inner
            .offline
            .as_ref()
            .is_some_and(OfflineGate::is_offline)
    }
}

impl CacheInner {
    /// Join the in-flight operation for `hash`, or start the one built by
    /// `make` on its own task. The task keeps running if every waiter goes
    /// away.
    fn flight<M, Fut>(self: &Arc<Self>, hash: &str, make: M) -> InFlight
    where
        M: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Vec<u8>>>> + Send + 'static,
    {
        let mut table = self.in_flight.lock().expect("in-flight table lock poisoned");
        if let Some(existing) = table.get(hash) {
            if self.config.debug_logging {
                debug!(key = %short_hash(hash), "Joining in-flight lookup");
            }
            return existing.clone();
        }

        let operation = make();
        let guard = InFlightGuard {
            inner: Arc::clone(self),
            hash: hash.to_string(),
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            operation.await
        });
        let shared = async move { handle.await.unwrap_or(Err(CacheError::Cancelled)) }
            .boxed()
            .shared();
        table.insert(hash.to_string(), shared.clone());
        shared
    }

    async fn lookup(&self, hash: &str) -> Option<Vec<u8>> {
        let now = self.clock.now();

        if let Some(entry) = self.memory.get(hash) {
            if !entry.is_expired(now) {
                self.record_hit(hash, "memory");
                return Some(entry.payload);
            }
            self.memory.remove(hash);
        }

        match self.disk.get(hash).await {
            Ok(Some(entry)) if !entry.is_expired(now) => {
                self.memory.set(hash, entry.clone());
                self.record_hit(hash, "disk");
                return Some(entry.payload);
            }
            Ok(Some(_)) => {
                // Keep expired entries while offline: they are the stale
                // fallback below.
                if !self.offline.as_ref().is_some_and(OfflineGate::is_offline) {
                    if let Err(e) = self.disk.remove(hash).await {
                        warn!(key = %short_hash(hash), error = %e, "Failed to drop expired disk entry");
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(key = %short_hash(hash), error = %e, "Disk lookup failed, treating as miss");
            }
        }

        if let Some(gate) = &self.offline {
            if let Some(payload) = gate.get_stale_data(hash).await {
                self.record_hit(hash, "stale");
                return Some(payload);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        if self.config.debug_logging {
            debug!(key = %short_hash(hash), "Cache miss");
        }
        None
    }

    async fn lookup_or_fetch<F, Fut, E>(
        &self,
        hash: &str,
        ttl: Option<Duration>,
        fetch: Option<F>,
    ) -> Result<Option<Vec<u8>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<u8>, E>>,
        E: std::fmt::Display,
    {
        if let Some(payload) = self.lookup(hash).await {
            return Ok(Some(payload));
        }
        let Some(fetch) = fetch else {
            return Ok(None);
        };
        let payload = fetch()
            .await
            .map_err(|e| CacheError::Fetch(e.to_string()))?;
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        if let Err(e) = self.store(hash, payload.clone(), Some(ttl), None).await {
            warn!(key = %short_hash(hash), error = %e, "Failed to cache fetched payload");
        }
        Ok(Some(payload))
    }

    async fn store(
        &self,
        hash: &str,
        payload: Vec<u8>,
        ttl: Option<Duration>,
        metadata: Option<ResponseMetadata>,
    ) -> Result<()> {
        let entry = CacheEntry::new(payload, self.clock.now(), ttl, metadata);
        self.memory.set(hash, entry.clone());
        self.disk.set(hash, entry).await?;
        if self.config.debug_logging {
            debug!(key = %short_hash(hash), ttl_secs = ?ttl.map(|t| t.as_secs()), "Stored entry");
        }
        Ok(())
    }

    fn record_hit(&self, hash: &str, tier: &'static str) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        if self.config.debug_logging {
            debug!(key = %short_hash(hash), tier, "Cache hit");
        }
    }
}

/// Clears a key's in-flight slot when its task finishes, panics or is
/// aborted.
struct InFlightGuard {
    inner: Arc<CacheInner>,
    hash: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut table) = self.inner.in_flight.lock() {
            table.remove(&self.hash);
        }
    }
}
