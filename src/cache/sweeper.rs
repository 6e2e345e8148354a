//! Background expiration sweep.
//!
//! `idle → running → idle`. While running, the loop sweeps both tiers, then
//! sleeps for the configured interval; cancellation is observed during the
//! sleep, so `stop` takes effect within one interval at the latest.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::disk::DiskCache;
use super::memory::MemoryCache;

/// Entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub memory_removed: usize,
    pub disk_removed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.memory_removed + self.disk_removed
    }
}

/// Remove expired entries from both tiers once.
pub async fn sweep_once(memory: &MemoryCache, disk: &DiskCache) -> SweepReport {
    SweepReport {
        memory_removed: memory.remove_expired_entries(),
        disk_removed: disk.remove_expired_entries().await,
    }
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ExpirationSweeper {
    memory: Arc<MemoryCache>,
    disk: DiskCache,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl ExpirationSweeper {
    pub fn new(memory: Arc<MemoryCache>, disk: DiskCache, interval: Duration) -> Self {
        Self {
            memory,
            disk,
            interval,
            running: Mutex::new(None),
        }
    }

    /// Launch the sweep loop on the current Tokio runtime. No-op if already
    /// running.
    ///
    /// Must be called from within a Tokio runtime; outside one the sweeper
    /// is not started and a warning is logged.
    pub fn start(&self) {
        let mut running = self.running.lock().expect("sweeper lock poisoned");
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("No Tokio runtime available, expiration sweeper not started");
            return;
        };

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let memory = Arc::clone(&self.memory);
        let disk = self.disk.clone();
        let interval = self.interval;

        let handle = runtime.spawn(async move {
            info!(interval_secs = interval.as_secs(), "Expiration sweeper started");
            loop {
                let report = sweep_once(&memory, &disk).await;
                if report.total() > 0 {
                    debug!(
                        memory = report.memory_removed,
                        disk = report.disk_removed,
                        "Expired entries swept"
                    );
                }
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("Expiration sweeper stopped");
        });

        *running = Some(Running { token, handle });
    }

    /// Cancel the loop. No-op if not running.
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().expect("sweeper lock poisoned").take() {
            running.token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .expect("sweeper lock poisoned")
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

impl Drop for ExpirationSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
