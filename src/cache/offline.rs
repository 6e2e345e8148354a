//! Offline gate: serves expired-but-recent disk entries while disconnected.
//!
//! Connectivity is pushed by an external observer through a
//! `watch::Sender<bool>` (`true` = online); the gate only reads the latest
//! value.

use std::time::Duration;

use tokio::sync::watch;

use super::disk::DiskCache;

/// Create a connectivity channel that starts in the given state.
pub fn connectivity_channel(online: bool) -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(online)
}

/// Read-only gate over the disk tier's stale entries.
pub struct OfflineGate {
    connectivity: watch::Receiver<bool>,
    disk: DiskCache,
    max_stale_age: Duration,
}

impl OfflineGate {
    pub fn new(connectivity: watch::Receiver<bool>, disk: DiskCache, max_stale_age: Duration) -> Self {
        Self {
            connectivity,
            disk,
            max_stale_age,
        }
    }

    /// Latest observed state. A dropped sender counts as whatever it last said.
    pub fn is_offline(&self) -> bool {
        !*self.connectivity.borrow()
    }

    pub fn max_stale_age(&self) -> Duration {
        self.max_stale_age
    }

    /// Payload of the stale entry for `hash`, only while offline.
    pub async fn get_stale_data(&self, hash: &str) -> Option<Vec<u8>> {
        if !self.is_offline() {
            return None;
        }
        self.disk
            .get_stale_entry(hash, self.max_stale_age)
            .await
            .map(|entry| entry.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::disk::DiskOptions;
    use crate::cache::entry::CacheEntry;
    use crate::cache::key::CacheKey;
    use crate::clock::{Clock, ManualClock};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_stale_data_only_while_offline_and_within_window() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let disk = DiskCache::open(
            tmp.path().to_path_buf(),
            DiskOptions {
                capacity: 1024,
                lru_eviction: true,
                debug_logging: false,
            },
            clock.clone(),
        )
        .await
        .unwrap();

        let key = CacheKey::new("https://x/y");
        let entry = CacheEntry::new(
            b"old".to_vec(),
            clock.now(),
            Some(Duration::from_secs(60)),
            None,
        );
        disk.set(key.hashed_value(), entry).await.unwrap();

        let (tx, rx) = connectivity_channel(true);
        let gate = OfflineGate::new(rx, disk, Duration::from_secs(120));

        clock.advance(chrono::Duration::seconds(90));
        assert!(!gate.is_offline());
        assert!(gate.get_stale_data(key.hashed_value()).await.is_none());

        tx.send(false).unwrap();
        assert!(gate.is_offline());
        assert_eq!(
            gate.get_stale_data(key.hashed_value()).await.as_deref(),
            Some(&b"old"[..])
        );

        clock.advance(chrono::Duration::seconds(100));
        assert!(gate.get_stale_data(key.hashed_value()).await.is_none());
    }
}
