//! MemberDaemon configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Main MemberDaemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Protocol client configuration
    pub client: ClientConfig,

    /// Retry/backoff configuration
    pub retry: RetryConfig,

    /// Default job parameters applied when the CLI omits them
    pub jobs: JobDefaults,

    /// Concurrency limits
    pub concurrency: ConcurrencyConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .memberdaemon.yml
        let local_config = PathBuf::from(".memberdaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/memberdaemon/memberdaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("memberdaemon").join("memberdaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!(
                            "Failed to load config from {}: {}",
                            user_config.display(),
                            e
                        );
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level from the config chain, for early logging setup
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Protocol client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend name (currently only "simulated" ships in-tree)
    pub provider: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            provider: "simulated".to_string(),
        }
    }
}

/// Retry/backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempt budget for transient errors
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Base backoff for the first transient retry, in milliseconds
    #[serde(rename = "backoff-base-ms")]
    pub backoff_base_ms: u64,

    /// Cap on a single rate-limit wait, in seconds
    #[serde(rename = "rate-limit-cap-secs")]
    pub rate_limit_cap_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_base_ms: 1000,
            rate_limit_cap_secs: 3600,
        }
    }
}

impl RetryConfig {
    /// Build the runtime policy from this configuration
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            rate_limit_cap: Duration::from_secs(self.rate_limit_cap_secs),
            ..Default::default()
        }
    }
}

/// Default job parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDefaults {
    /// Minimum per-item delay in seconds
    #[serde(rename = "delay-min")]
    pub delay_min: u64,

    /// Maximum per-item delay in seconds
    #[serde(rename = "delay-max")]
    pub delay_max: u64,

    /// Cap on candidates processed per job
    #[serde(rename = "max-members")]
    pub max_members: u64,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            delay_min: 6,
            delay_max: 15,
            max_members: 100,
        }
    }
}

/// Concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum pipelines running at once.
    ///
    /// Pipelines share the active account's protocol session, which does not
    /// tolerate overlapping invitation calls, so this stays at 1 unless a
    /// backend with per-job sessions is plugged in.
    #[serde(rename = "max-jobs")]
    pub max_jobs: u32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { max_jobs: 1 }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the roster files and the job database
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    /// Path of the sqlite job database
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("member.db")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("memberdaemon"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.client.provider, "simulated");
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.jobs.delay_min, 6);
        assert_eq!(config.jobs.delay_max, 15);
        assert_eq!(config.jobs.max_members, 100);
        assert_eq!(config.concurrency.max_jobs, 1);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
client:
  provider: simulated
retry:
  max-attempts: 5
jobs:
  delay-min: 2
  delay-max: 4
log-level: DEBUG
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.jobs.delay_min, 2);
        assert_eq!(config.jobs.delay_max, 4);
        // Unspecified fields fall back to defaults
        assert_eq!(config.jobs.max_members, 100);
        assert_eq!(config.log_level.as_deref(), Some("DEBUG"));
    }

    #[test]
    fn test_retry_config_to_policy() {
        let retry = RetryConfig {
            max_attempts: 7,
            backoff_base_ms: 500,
            rate_limit_cap_secs: 120,
        };
        let policy = retry.to_policy();
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.backoff_base, Duration::from_millis(500));
        assert_eq!(policy.rate_limit_cap, Duration::from_secs(120));
    }

    #[test]
    fn test_db_path_under_data_dir() {
        let storage = StorageConfig {
            data_dir: PathBuf::from("/tmp/mdtest"),
        };
        assert_eq!(storage.db_path(), PathBuf::from("/tmp/mdtest/member.db"));
    }
}
