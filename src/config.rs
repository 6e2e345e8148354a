//! Cache configuration.
//!
//! Loaded from an optional JSON file, then overridden by `RESPONSE_CACHE_*`
//! environment variables. Every field has a default, so an empty object (or
//! no file at all) yields a working configuration.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CacheError, Result};

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "RESPONSE_CACHE_";

const MIB: u64 = 1024 * 1024;

/// Configuration for a [`crate::ResponseCache`] instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte budget of the memory tier (sum of payload sizes).
    pub memory_capacity_bytes: u64,
    /// Byte budget of the disk tier (sum of payload sizes).
    pub disk_capacity_bytes: u64,
    /// TTL applied when `set` is called without one.
    pub default_ttl_secs: u64,
    /// Delay between expiration sweeps.
    pub cleanup_interval_secs: u64,
    /// Serve expired entries while offline, within `max_stale_age_secs`.
    pub offline_mode_enabled: bool,
    /// How long past expiry an entry may still be served offline.
    pub max_stale_age_secs: u64,
    /// Subdirectory of the cache root holding entry files.
    pub disk_cache_directory: String,
    /// Allow the disk tier to evict least-recently-used entries when full.
    pub lru_eviction_enabled: bool,
    /// Emit per-operation debug traces (hits, misses, promotions, evictions).
    pub debug_logging: bool,
    /// Overrides the platform cache root. `None` uses `dirs::cache_dir()`.
    pub cache_root: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity_bytes: 50 * MIB,
            disk_capacity_bytes: 100 * MIB,
            default_ttl_secs: 300,
            cleanup_interval_secs: 300,
            offline_mode_enabled: true,
            max_stale_age_secs: 86_400,
            disk_cache_directory: "ResponseCache".to_string(),
            lru_eviction_enabled: true,
            debug_logging: false,
            cache_root: None,
        }
    }
}

impl CacheConfig {
    /// Load a config from a JSON file. A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(CacheError::InvalidConfig(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        serde_json::from_str(&data).map_err(|e| {
            CacheError::InvalidConfig(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply `RESPONSE_CACHE_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply overrides from arbitrary `(name, value)` pairs.
    ///
    /// Unknown names are ignored; unparseable values are logged and skipped.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in vars {
            let Some(field) = name.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match field {
                "MEMORY_CAPACITY_BYTES" => set_parsed(&mut self.memory_capacity_bytes, field, value),
                "DISK_CAPACITY_BYTES" => set_parsed(&mut self.disk_capacity_bytes, field, value),
                "DEFAULT_TTL_SECS" => set_parsed(&mut self.default_ttl_secs, field, value),
                "CLEANUP_INTERVAL_SECS" => set_parsed(&mut self.cleanup_interval_secs, field, value),
                "OFFLINE_MODE_ENABLED" => set_parsed(&mut self.offline_mode_enabled, field, value),
                "MAX_STALE_AGE_SECS" => set_parsed(&mut self.max_stale_age_secs, field, value),
                "LRU_EVICTION_ENABLED" => set_parsed(&mut self.lru_eviction_enabled, field, value),
                "DEBUG_LOGGING" => set_parsed(&mut self.debug_logging, field, value),
                "DISK_CACHE_DIRECTORY" => self.disk_cache_directory = value.to_string(),
                "CACHE_ROOT" => self.cache_root = Some(PathBuf::from(value)),
                _ => {}
            }
        }
    }

    /// Reject configurations that cannot produce a working cache.
    pub fn validate(&self) -> Result<()> {
        if self.memory_capacity_bytes == 0 {
            return Err(CacheError::InvalidConfig(
                "memory_capacity_bytes must be greater than zero".into(),
            ));
        }
        if self.disk_capacity_bytes == 0 {
            return Err(CacheError::InvalidConfig(
                "disk_capacity_bytes must be greater than zero".into(),
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(CacheError::InvalidConfig(
                "cleanup_interval_secs must be greater than zero".into(),
            ));
        }
        let mut components = Path::new(&self.disk_cache_directory).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(()),
            _ => Err(CacheError::InvalidConfig(format!(
                "disk_cache_directory must be a single directory name, got {:?}",
                self.disk_cache_directory
            ))),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn max_stale_age(&self) -> Duration {
        Duration::from_secs(self.max_stale_age_secs)
    }

    /// Directory holding entry files: `<cache root>/<disk_cache_directory>`.
    pub fn cache_dir(&self) -> PathBuf {
        let root = self
            .cache_root
            .clone()
            .or_else(dirs::cache_dir)
            .unwrap_or_else(|| PathBuf::from(".cache"));
        root.join(&self.disk_cache_directory)
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, field: &str, value: &str) {
    match value.parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(
            variable = %format!("{ENV_PREFIX}{field}"),
            value,
            "Ignoring unparseable cache config override"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cache_config_defaults() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.memory_capacity_bytes, 50 * 1024 * 1024);
        assert_eq!(cfg.disk_capacity_bytes, 100 * 1024 * 1024);
        assert_eq!(cfg.default_ttl_secs, 300);
        assert!(cfg.offline_mode_enabled);
        assert_eq!(cfg.max_stale_age(), Duration::from_secs(86_400));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_cache_config_deserialize_partial() {
        let json = r#"{"default_ttl_secs": 60, "debug_logging": true}"#;
        let cfg: CacheConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.default_ttl(), Duration::from_secs(60));
        assert!(cfg.debug_logging);
        assert_eq!(cfg.disk_cache_directory, "ResponseCache"); // default
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = CacheConfig::load_from_path(&tmp.path().join("absent.json")).unwrap();
        assert_eq!(cfg, CacheConfig::default());
    }

    #[test]
    fn test_load_malformed_file_is_invalid_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = CacheConfig::load_from_path(&path).unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig(_)));
    }

    #[test]
    fn test_overrides_apply_and_skip_garbage() {
        let mut cfg = CacheConfig::default();
        cfg.apply_overrides([
            ("RESPONSE_CACHE_DEFAULT_TTL_SECS", "42"),
            ("RESPONSE_CACHE_OFFLINE_MODE_ENABLED", "false"),
            ("RESPONSE_CACHE_DISK_CAPACITY_BYTES", "lots"),
            ("RESPONSE_CACHE_DISK_CACHE_DIRECTORY", "Net"),
            ("UNRELATED", "1"),
        ]);
        assert_eq!(cfg.default_ttl_secs, 42);
        assert!(!cfg.offline_mode_enabled);
        assert_eq!(cfg.disk_capacity_bytes, 100 * 1024 * 1024);
        assert_eq!(cfg.disk_cache_directory, "Net");
    }

    #[test]
    fn test_validate_rejects_nested_directory() {
        let cfg = CacheConfig {
            disk_cache_directory: "../escape".into(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = CacheConfig {
            cleanup_interval_secs: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_cache_dir_uses_root_override() {
        let cfg = CacheConfig {
            cache_root: Some(PathBuf::from("/var/tmp/rc")),
            ..Default::default()
        };
        assert_eq!(cfg.cache_dir(), PathBuf::from("/var/tmp/rc/ResponseCache"));
    }
}
