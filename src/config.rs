//! Configuration Management
//!
//! Handles persistent configuration storage for cloudaudit.

use crate::resource::{
    FetchOptions, DEFAULT_CONSUMER_WORKERS, DEFAULT_FEEDER_WORKERS, DEFAULT_QUEUE_CAPACITY,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Application directory under the user's config dir
pub const APP_DIR: &str = "cloudaudit";

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project to audit
    #[serde(default)]
    pub project_id: Option<String>,
    /// Partition (universe domain) of the project
    #[serde(default = "default_partition")]
    pub partition: String,
    /// Regions to scan; empty means every available region
    #[serde(default)]
    pub regions: Vec<String>,
    /// Services to scan; empty means every registered service
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default = "default_feeder_workers")]
    pub feeder_workers: usize,
    #[serde(default = "default_consumer_workers")]
    pub consumer_workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Deadline for a single list call, in seconds
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
    /// IP range files substituted for `ip-ranges-from-args`
    #[serde(default)]
    pub ip_ranges: Vec<String>,
}

fn default_partition() -> String {
    "gcp".to_string()
}

fn default_feeder_workers() -> usize {
    DEFAULT_FEEDER_WORKERS
}

fn default_consumer_workers() -> usize {
    DEFAULT_CONSUMER_WORKERS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: None,
            partition: default_partition(),
            regions: Vec::new(),
            services: Vec::new(),
            feeder_workers: DEFAULT_FEEDER_WORKERS,
            consumer_workers: DEFAULT_CONSUMER_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            call_timeout_secs: None,
            ip_ranges: Vec::new(),
        }
    }
}

impl Config {
    /// Directory holding the config file and the log file
    pub fn app_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR))
    }

    fn config_path() -> Option<PathBuf> {
        Self::app_dir().map(|p| p.join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from `path`; a missing or invalid file yields the defaults
    pub fn load_from(path: &std::path::Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get effective project (config > gcloud default)
    pub fn effective_project(&self) -> Option<String> {
        self.project_id
            .clone()
            .or_else(crate::gcp::auth::get_default_project)
    }

    /// Fetch tuning for one service, cancelled through `cancel`
    pub fn fetch_options(&self, cancel: CancellationToken) -> FetchOptions {
        FetchOptions {
            feeder_workers: self.feeder_workers,
            consumer_workers: self.consumer_workers,
            queue_capacity: self.queue_capacity,
            call_timeout: self.call_timeout_secs.map(Duration::from_secs),
            cancel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_and_invalid_files_use_defaults() {
        let dir = TempDir::new().unwrap();
        let missing = Config::load_from(&dir.path().join("nope.json"));
        assert_eq!(missing.partition, "gcp");
        assert_eq!(missing.feeder_workers, DEFAULT_FEEDER_WORKERS);

        let invalid = dir.path().join("config.json");
        std::fs::write(&invalid, "{broken").unwrap();
        assert_eq!(Config::load_from(&invalid).consumer_workers, DEFAULT_CONSUMER_WORKERS);
    }

    #[test]
    fn test_partial_file_and_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"project_id": "audit-target", "feeder_workers": 3}"#).unwrap();

        let mut config = Config::load_from(&path);
        assert_eq!(config.project_id.as_deref(), Some("audit-target"));
        assert_eq!(config.feeder_workers, 3);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);

        config.call_timeout_secs = Some(15);
        config.save_to(&path).unwrap();
        let reloaded = Config::load_from(&path);
        assert_eq!(reloaded.call_timeout_secs, Some(15));
    }

    #[test]
    fn test_fetch_options() {
        let config = Config {
            consumer_workers: 7,
            call_timeout_secs: Some(30),
            ..Config::default()
        };
        let cancel = CancellationToken::new();
        let options = config.fetch_options(cancel.clone());
        assert_eq!(options.consumer_workers, 7);
        assert_eq!(options.call_timeout, Some(Duration::from_secs(30)));
        cancel.cancel();
        assert!(options.cancel.is_cancelled());
    }
}
