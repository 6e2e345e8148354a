//! Persistent tier: one JSON file per entry under the cache directory.
//!
//! An in-memory index (hash → entry, running byte total) is rebuilt at startup
//! by scanning the directory; files that fail to decode are deleted during the
//! scan. Writes go to `<hash>.cache.tmp` and are renamed into place, so a
//! reader never observes a partially written entry. No file handle outlives
//! the call that opened it.
//!
//! All index mutations happen under a single async mutex, which serializes
//! the tier's operations the same way a dedicated worker task would.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::entry::CacheEntry;
use super::key::{short_hash, CacheKey};
use super::memory::TierStats;
use crate::clock::Clock;
use crate::error::{CacheError, Result};

/// Suffix of entry files.
pub const ENTRY_SUFFIX: &str = ".cache";
const TMP_SUFFIX: &str = ".cache.tmp";

/// Tuning knobs for [`DiskCache::open`].
#[derive(Debug, Clone, Copy)]
pub struct DiskOptions {
    /// Byte budget (sum of payload sizes).
    pub capacity: u64,
    /// When `false`, an over-budget `set` fails instead of evicting.
    pub lru_eviction: bool,
    pub debug_logging: bool,
}

#[derive(Default)]
struct DiskIndex {
    entries: HashMap<String, CacheEntry>,
    total_size: u64,
}

impl DiskIndex {
    fn insert(&mut self, hash: String, entry: CacheEntry) {
        self.total_size += entry.size();
        if let Some(old) = self.entries.insert(hash, entry) {
            self.total_size -= old.size();
        }
    }

    fn remove(&mut self, hash: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(hash)?;
        self.total_size -= entry.size();
        Some(entry)
    }
}

struct DiskInner {
    dir: PathBuf,
    options: DiskOptions,
    clock: Arc<dyn Clock>,
    index: Mutex<DiskIndex>,
}

/// Disk tier handle. Cloning is cheap and shares the same index.
#[derive(Clone)]
pub struct DiskCache {
    inner: Arc<DiskInner>,
}

impl DiskCache {
    /// Open (creating if needed) the cache directory and rebuild the index.
    pub async fn open(dir: PathBuf, options: DiskOptions, clock: Arc<dyn Clock>) -> Result<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::DirectoryCreation {
                path: dir.clone(),
                source: Arc::new(e),
            })?;

        let index = scan_directory(&dir).await?;
        info!(
            path = %dir.display(),
            entries = index.entries.len(),
            bytes = index.total_size,
            "Disk cache loaded"
        );

        Ok(Self {
            inner: Arc::new(DiskInner {
                dir,
                options,
                clock,
                index: Mutex::new(index),
            }),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.inner.dir
    }

    /// Path of the file backing `hash`.
    pub fn entry_path(&self, hash: &str) -> PathBuf {
        self.inner.entry_path(hash)
    }

    /// Persist `entry` under `hash`, evicting least-recently-accessed entries
    /// first if the budget would be exceeded.
    ///
    /// On [`CacheError::CacheFull`] nothing has been written for `hash`.
    pub async fn set(&self, hash: &str, entry: CacheEntry) -> Result<()> {
        let encoded = serde_json::to_vec(&entry)?;
        let capacity = self.inner.options.capacity;
        let mut index = self.inner.index.lock().await;

        if entry.size() > capacity {
            return Err(CacheError::CacheFull {
                required: entry.size(),
                available: capacity,
            });
        }

        let old_size = index.entries.get(hash).map_or(0, CacheEntry::size);
        let projected = index.total_size - old_size + entry.size();
        if projected > capacity {
            let required = projected - capacity;
            if !self.inner.options.lru_eviction {
                return Err(CacheError::CacheFull {
                    required,
                    available: 0,
                });
            }
            self.inner.evict_lru(&mut index, required, hash).await?;
        }

        let path = self.inner.entry_path(hash);
        write_atomic(&path, &encoded)
            .await
            .map_err(|e| CacheError::disk_write(&path, e))?;
        index.insert(hash.to_string(), entry);

        if self.inner.options.debug_logging {
            debug!(key = %short_hash(hash), bytes = encoded.len(), "Stored entry on disk");
        }
        Ok(())
    }

    /// Read the entry for `hash`.
    ///
    /// Returns `Ok(None)` for keys that were never cached. A corrupt file is
    /// deleted and reported once as [`CacheError::Decoding`]; the next call
    /// sees a clean miss. On a hit the refreshed access time is written back
    /// in the background.
    pub async fn get(&self, hash: &str) -> Result<Option<CacheEntry>> {
        let mut index = self.inner.index.lock().await;
        if !index.entries.contains_key(hash) {
            return Ok(None);
        }

        let path = self.inner.entry_path(hash);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(key = %short_hash(hash), "Disk cache file vanished, dropping index entry");
                index.remove(hash);
                return Ok(None);
            }
            Err(e) => return Err(CacheError::disk_read(&path, e)),
        };

        let entry: CacheEntry = match serde_json::from_slice(&data) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %short_hash(hash), error = %e, "Corrupt disk cache entry, deleting");
                index.remove(hash);
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    if rm.kind() != ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %rm, "Failed to delete corrupt entry");
                    }
                }
                return Err(CacheError::Decoding {
                    key: hash.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let refreshed = entry.accessed(self.inner.clock.now());
        index.insert(hash.to_string(), refreshed.clone());
        drop(index);

        let inner = Arc::clone(&self.inner);
        let hash = hash.to_string();
        let expected = refreshed.clone();
        tokio::spawn(async move {
            inner.write_back(&hash, &expected).await;
        });

        Ok(Some(refreshed))
    }

    /// Index membership only; no I/O.
    pub async fn contains(&self, hash: &str) -> bool {
        self.inner.index.lock().await.entries.contains_key(hash)
    }

    /// Delete the entry for `hash`. Absent keys and already-missing files are
    /// not errors.
    pub async fn remove(&self, hash: &str) -> Result<()> {
        let mut index = self.inner.index.lock().await;
        let path = self.inner.entry_path(hash);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::disk_write(&path, e)),
        }
        index.remove(hash);
        Ok(())
    }

    /// Delete every file in the cache directory and reset the index.
    ///
    /// Individual deletion failures are skipped. If the directory cannot be
    /// listed, or the listing breaks off part way, only entries whose files
    /// were reached are dropped from the index and [`CacheError::DiskWrite`]
    /// is returned.
    pub async fn remove_all(&self) -> Result<()> {
        let mut index = self.inner.index.lock().await;
        let dir = &self.inner.dir;
        let mut listing = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| CacheError::disk_write(dir, e))?;
        loop {
            match listing.next_entry().await {
                Ok(Some(file)) => {
                    let path = file.path();
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        debug!(path = %path.display(), error = %e, "Skipping undeletable file");
                    }
                    if let Some(hash) = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .and_then(|n| n.strip_suffix(ENTRY_SUFFIX))
                    {
                        index.remove(hash);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Directory listing interrupted during clear");
                    return Err(CacheError::disk_write(dir, e));
                }
            }
        }
        *index = DiskIndex::default();
        Ok(())
    }

    /// Remove every expired entry and return how many were removed.
    ///
    /// The tier lock is taken per entry so regular operations interleave
    /// with a long sweep.
    pub async fn remove_expired_entries(&self) -> usize {
        let now = self.inner.clock.now();
        let candidates: Vec<String> = {
            let index = self.inner.index.lock().await;
            index
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(hash, _)| hash.clone())
                .collect()
        };

        let mut removed = 0;
        for hash in candidates {
            let mut index = self.inner.index.lock().await;
            // Re-check: the entry may have been replaced since the snapshot.
            if !index.entries.get(&hash).is_some_and(|e| e.is_expired(now)) {
                continue;
            }
            index.remove(&hash);
            self.inner.delete_file_best_effort(&hash).await;
            removed += 1;
        }

        if removed > 0 && self.inner.options.debug_logging {
            debug!(removed, "Swept expired entries from disk");
        }
        removed
    }

    /// Every indexed entry that is expired but still within `max_stale_age`.
    pub async fn get_stale_entries(&self, max_stale_age: Duration) -> HashMap<String, CacheEntry> {
        let now = self.inner.clock.now();
        let index = self.inner.index.lock().await;
        index
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_stale(max_stale_age, now))
            .map(|(hash, entry)| (hash.clone(), entry.clone()))
            .collect()
    }

    /// Single-key form of [`Self::get_stale_entries`].
    pub async fn get_stale_entry(&self, hash: &str, max_stale_age: Duration) -> Option<CacheEntry> {
        let now = self.inner.clock.now();
        let index = self.inner.index.lock().await;
        index
            .entries
            .get(hash)
            .filter(|entry| entry.is_stale(max_stale_age, now))
            .cloned()
    }

    pub async fn statistics(&self) -> TierStats {
        let index = self.inner.index.lock().await;
        TierStats {
            entry_count: index.entries.len(),
            total_size: index.total_size,
        }
    }
}

impl DiskInner {
    fn entry_path(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{hash}{ENTRY_SUFFIX}"))
    }

    /// Evict oldest-accessed entries (never `keep`) until `required` bytes are
    /// freed. Fails without evicting anything if even a full purge would not
    /// free enough.
    async fn evict_lru(&self, index: &mut DiskIndex, required: u64, keep: &str) -> Result<u64> {
        let mut candidates: Vec<(chrono::DateTime<chrono::Utc>, String, u64)> = index
            .entries
            .iter()
            .filter(|(hash, _)| hash.as_str() != keep)
            .map(|(hash, entry)| (entry.last_accessed_at, hash.clone(), entry.size()))
            .collect();

        let available: u64 = candidates.iter().map(|(_, _, size)| size).sum();
        if available < required {
            return Err(CacheError::CacheFull {
                required,
                available,
            });
        }

        candidates.sort();
        let mut freed = 0;
        for (_, hash, size) in candidates {
            if freed >= required {
                break;
            }
            index.remove(&hash);
            self.delete_file_best_effort(&hash).await;
            freed += size;
            if self.options.debug_logging {
                debug!(key = %short_hash(&hash), size, "Evicted LRU entry from disk");
            }
        }
        Ok(freed)
    }

    async fn delete_file_best_effort(&self, hash: &str) {
        let path = self.entry_path(hash);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to delete cache file");
            }
        }
    }

    /// Persist a refreshed access time, unless the entry changed or was
    /// removed after the read that produced it.
    async fn write_back(&self, hash: &str, expected: &CacheEntry) {
        let index = self.index.lock().await;
        if index.entries.get(hash) != Some(expected) {
            return;
        }
        let path = self.entry_path(hash);
        let result = match serde_json::to_vec(expected) {
            Ok(encoded) => write_atomic(&path, &encoded).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = result {
            warn!(key = %short_hash(hash), error = %e, "Failed to persist access time");
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `bytes` to a sibling temp file, fsync it, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = tmp_path(path);
    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

/// Load every decodable entry; delete corrupt files and leftover temp files.
async fn scan_directory(dir: &Path) -> Result<DiskIndex> {
    let mut index = DiskIndex::default();
    let mut listing = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| CacheError::disk_read(dir, e))?;

    while let Some(file) = listing
        .next_entry()
        .await
        .map_err(|e| CacheError::disk_read(dir, e))?
    {
        let path = file.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if name.ends_with(TMP_SUFFIX) {
            let _ = tokio::fs::remove_file(&path).await;
            continue;
        }
        let Some(hash) = name.strip_suffix(ENTRY_SUFFIX) else {
            continue;
        };
        if CacheKey::validate_hash(hash).is_err() {
            continue;
        }

        let decoded = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice::<CacheEntry>(&data).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match decoded {
            Ok(entry) => index.insert(hash.to_string(), entry),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding unreadable cache file");
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
    }
    Ok(index)
}
