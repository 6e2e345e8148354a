//! Cache maintenance command handlers.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

use response_cache::{CacheConfig, CacheKey, ResponseCache};

async fn open(config: CacheConfig) -> Result<ResponseCache> {
    let dir = config.cache_dir();
    ResponseCache::open(config)
        .await
        .with_context(|| format!("Failed to open cache at {}", dir.display()))
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Handle `response-cache stats`.
pub(crate) async fn cmd_stats(config: CacheConfig, json: bool) -> Result<()> {
    let memory_capacity = config.memory_capacity_bytes;
    let disk_capacity = config.disk_capacity_bytes;
    let dir = config.cache_dir();
    let cache = open(config).await?;
    let stats = cache.statistics().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Cache directory: {}", dir.display());
    println!("{:<8} {:<10} {:<24}", "Tier", "Entries", "Size");
    println!("{}", "-".repeat(42));
    println!(
        "{:<8} {:<10} {:<24}",
        "memory",
        stats.memory.entry_count,
        format!(
            "{} / {}",
            format_bytes(stats.memory.total_size),
            format_bytes(memory_capacity)
        ),
    );
    println!(
        "{:<8} {:<10} {:<24}",
        "disk",
        stats.disk.entry_count,
        format!(
            "{} / {}",
            format_bytes(stats.disk.total_size),
            format_bytes(disk_capacity)
        ),
    );
    Ok(())
}

/// Handle `response-cache clear`.
pub(crate) async fn cmd_clear(config: CacheConfig) -> Result<()> {
    let cache = open(config).await?;
    let before = cache.statistics().await.disk.entry_count;
    cache.clear().await.context("Failed to clear cache")?;
    println!("Removed {} cached entr{}.", before, if before == 1 { "y" } else { "ies" });
    Ok(())
}

/// Handle `response-cache sweep`.
pub(crate) async fn cmd_sweep(config: CacheConfig) -> Result<()> {
    let cache = open(config).await?;
    let report = cache.remove_expired().await;
    println!("Removed {} expired entries from disk.", report.disk_removed);
    Ok(())
}

/// Handle `response-cache get`.
pub(crate) async fn cmd_get(config: CacheConfig, key: CacheKey, out: Option<PathBuf>) -> Result<()> {
    let cache = open(config).await?;
    let Some(payload) = cache.get(&key).await else {
        anyhow::bail!("No cached entry for '{}'", key);
    };

    match out {
        Some(path) => {
            std::fs::write(&path, &payload)
                .with_context(|| format!("Failed to write payload to {}", path.display()))?;
            println!("Wrote {} to {}", format_bytes(payload.len() as u64), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&payload)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

/// Handle `response-cache key`.
pub(crate) fn cmd_key(key: &CacheKey) {
    println!("{}", key.value());
    println!("{}", key.hashed_value());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> CacheConfig {
        CacheConfig {
            cache_root: Some(tmp.path().to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(50 * 1024 * 1024), "50.0 MiB");
    }

    #[tokio::test]
    async fn test_get_writes_payload_to_file() {
        let tmp = TempDir::new().unwrap();
        let key = CacheKey::new("https://x/y");
        {
            let cache = ResponseCache::open(config(&tmp)).await.unwrap();
            cache
                .set(b"body".to_vec(), &key, Some(Duration::from_secs(60)))
                .await
                .unwrap();
        }
        let out = tmp.path().join("out.bin");
        cmd_get(config(&tmp), key, Some(out.clone())).await.unwrap();
        assert_eq!(std::fs::read(out).unwrap(), b"body");
    }

    #[tokio::test]
    async fn test_get_miss_is_error() {
        let tmp = TempDir::new().unwrap();
        let result = cmd_get(config(&tmp), CacheKey::new("https://x/none"), None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_clear_empties_disk() {
        let tmp = TempDir::new().unwrap();
        let key = CacheKey::new("https://x/y");
        let cache = ResponseCache::open(config(&tmp)).await.unwrap();
        cache.set(b"body".to_vec(), &key, None).await.unwrap();
        drop(cache);

        cmd_clear(config(&tmp)).await.unwrap();
        let cache = ResponseCache::open(config(&tmp)).await.unwrap();
        assert!(!cache.contains(&key).await);
    }
}
