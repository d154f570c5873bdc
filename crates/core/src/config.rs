use crate::joblog::LogPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Redb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,

    /// Database file for the redb backend
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    #[serde(default = "default_container")]
    pub container: String,

    #[serde(default = "default_sequence_chunk_size")]
    pub sequence_chunk_size: usize,

    #[serde(default = "default_max_transact_retries")]
    pub max_transact_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogBackend {
    Memory,
    Jsonl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_backend")]
    pub backend: LogBackend,

    /// Directory for the jsonl backend
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

fn default_workers() -> usize {
    4
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/store.redb")
}

fn default_container() -> String {
    "stratus".to_string()
}

fn default_sequence_chunk_size() -> usize {
    1024
}

fn default_max_transact_retries() -> u32 {
    100
}

fn default_log_backend() -> LogBackend {
    LogBackend::Memory
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("data/logs")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    50
}

fn default_attempt_timeout_ms() -> u64 {
    1000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            store: StoreConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
            container: default_container(),
            sequence_chunk_size: default_sequence_chunk_size(),
            max_transact_retries: default_max_transact_retries(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            backend: default_log_backend(),
            dir: default_log_dir(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

impl LogConfig {
    pub fn policy(&self) -> LogPolicy {
        LogPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_millis(self.backoff_ms),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist
    pub fn load(config_path: &Path) -> Result<Self> {
        let config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.store.sequence_chunk_size == 0 {
            anyhow::bail!("store.sequence_chunk_size must be at least 1");
        }
        if self.store.container.is_empty() {
            anyhow::bail!("store.container must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = RuntimeConfig::load(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stratus.toml");
        std::fs::write(
            &path,
            r#"
workers = 8

[store]
backend = "redb"
path = "/var/lib/stratus/store.redb"

[log]
max_attempts = 5
"#,
        )
        .unwrap();

        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.store.backend, StoreBackend::Redb);
        assert_eq!(config.store.container, "stratus");
        assert_eq!(config.log.max_attempts, 5);
        assert_eq!(config.log.policy().backoff, Duration::from_millis(50));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stratus.toml");
        std::fs::write(&path, "workers = 0\n").unwrap();
        assert!(RuntimeConfig::load(&path).is_err());
    }
}
