use crate::core::dirs::get_config_directory;
use crate::core::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const CONFIG_FILE: &str = "config.json";

/// Tunables of the status cache, stored as JSON in the user config directory
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Coalescing window of the background refresh
    pub debounce_ms: u64,
    pub label_validity_secs: u64,
    pub label_capacity: usize,
    pub lock_retry_attempts: u32,
    pub lock_retry_backoff_ms: u64,
    /// Schedule a backend remove for files deleted behind our back
    pub auto_repair_external_deletes: bool,
    pub cache_size_warning_threshold: usize,
    pub persist_snapshots: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            label_validity_secs: 20,
            label_capacity: 100,
            lock_retry_attempts: 6,
            lock_retry_backoff_ms: 100,
            auto_repair_external_deletes: false,
            cache_size_warning_threshold: 100_000,
            persist_snapshots: false,
        }
    }
}

impl CacheConfig {
    pub fn load_or_default() -> Result<Self> {
        let config_dir = get_config_directory()?;
        Self::load_from(&config_dir.join(CONFIG_FILE))
    }

    /// Read `path`, falling back to defaults when it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self) -> Result<()> {
        let config_dir = get_config_directory()?;
        std::fs::create_dir_all(&config_dir)?;
        self.save_to(&config_dir.join(CONFIG_FILE))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn label_validity(&self) -> Duration {
        Duration::from_secs(self.label_validity_secs)
    }

    pub fn lock_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.lock_retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.debounce(), Duration::from_millis(200));
        assert_eq!(config.label_validity(), Duration::from_secs(20));
        assert_eq!(config.lock_retry_attempts, 6);
        assert!(!config.auto_repair_external_deletes);
    }

    #[test]
    fn test_missing_file_gives_defaults() -> Result<()> {
        let dir = TempDir::new()?;
        assert_eq!(
            CacheConfig::load_from(&dir.path().join("config.json"))?,
            CacheConfig::default()
        );
        Ok(())
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "debounce_ms": 50, "auto_repair_external_deletes": true }"#)?;

        let config = CacheConfig::load_from(&path)?;
        assert_eq!(config.debounce_ms, 50);
        assert!(config.auto_repair_external_deletes);
        assert_eq!(config.label_capacity, 100);

        config.save_to(&path)?;
        assert_eq!(CacheConfig::load_from(&path)?, config);
        Ok(())
    }
}
