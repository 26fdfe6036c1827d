//! Configuration loading for relaytask.
//!
//! Configuration is loaded from a TOML file (default: `relaytask.toml`).
//! Every field has a default, so an empty file is a valid configuration.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use task_core::{ProcessRole, RetryPolicy};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Task queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Execution timeouts.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Cross-process access arbitration.
    #[serde(default)]
    pub access: AccessConfig,
}

/// Task queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Path to the SQLite task store.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// Maximum number of queued tasks (default: 10000).
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

/// Execution timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Wait for a relay or mediator acknowledgement in milliseconds (default: 20000).
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Lock requests per transaction before giving up (default: 3).
    #[serde(default = "default_lock_attempts")]
    pub lock_attempts: u32,
    /// Wait for a running transaction to end after a rejected lock, in
    /// milliseconds (default: 10000).
    #[serde(default = "default_transaction_ended_timeout_ms")]
    pub transaction_ended_timeout_ms: u64,
    /// Lifetime of a transaction lock on the mediator in seconds (default: 60).
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u32,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Automatic retries per task (default: 1).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds (default: 500).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound of the exponential delay in milliseconds (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter in milliseconds (default: 250).
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

/// Access coordinator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    /// Role of this process (default: app).
    #[serde(default = "default_role")]
    pub role: ProcessRole,
    /// Application id used as topic prefix.
    #[serde(default = "default_app_id")]
    pub app_id: String,
    /// Secret shared by all processes of the installation.
    #[serde(default)]
    pub shared_secret: String,
    /// Interval between `requested` announcements in milliseconds (default: 70).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Give up waiting for an answer after this many milliseconds (default: 700).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

// Default value functions
fn default_store_path() -> PathBuf {
    PathBuf::from("tasks.db")
}

fn default_capacity() -> usize {
    10_000
}

fn default_response_timeout_ms() -> u64 {
    20_000
}

fn default_lock_attempts() -> u32 {
    3
}

fn default_transaction_ended_timeout_ms() -> u64 {
    10_000
}

fn default_lock_ttl_secs() -> u32 {
    60
}

fn default_max_retries() -> u32 {
    1
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_role() -> ProcessRole {
    ProcessRole::App
}

fn default_app_id() -> String {
    "relaytask".to_string()
}

fn default_poll_interval_ms() -> u64 {
    70
}

fn default_request_timeout_ms() -> u64 {
    700
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            capacity: default_capacity(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            lock_attempts: default_lock_attempts(),
            transaction_ended_timeout_ms: default_transaction_ended_timeout_ms(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            role: default_role(),
            app_id: default_app_id(),
            shared_secret: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ExecutionConfig {
    /// Acknowledgement timeout.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Wait for `transaction_ended` after a rejection.
    pub fn transaction_ended_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_ended_timeout_ms)
    }
}

impl RetryConfig {
    /// Build the retry policy.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

impl AccessConfig {
    /// Interval between `requested` announcements.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Access request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.queue.store_path, PathBuf::from("tasks.db"));
        assert_eq!(config.execution.response_timeout(), Duration::from_secs(20));
        assert_eq!(config.retry.policy(), RetryPolicy::default());
        assert_eq!(config.access.role, ProcessRole::App);
        assert_eq!(config.access.poll_interval(), Duration::from_millis(70));
        assert_eq!(config.access.request_timeout(), Duration::from_millis(700));
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[queue]
store_path = "/data/tasks.db"
capacity = 50

[execution]
response_timeout_ms = 5000
lock_attempts = 5

[retry]
max_retries = 3

[access]
role = "notification_extension"
app_id = "ch.example"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.queue.store_path, PathBuf::from("/data/tasks.db"));
        assert_eq!(config.queue.capacity, 50);
        assert_eq!(config.execution.response_timeout_ms, 5000);
        assert_eq!(config.execution.lock_attempts, 5);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.access.role, ProcessRole::NotificationExtension);
        assert_eq!(config.access.app_id, "ch.example");
    }

    #[test]
    fn config_missing_fields_use_defaults() {
        let toml = r#"
[queue]
[execution]
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.queue.capacity, 10_000);
        assert_eq!(config.execution.transaction_ended_timeout_ms, 10_000);
        assert_eq!(config.retry.jitter_ms, 250);
        assert_eq!(config.access.request_timeout_ms, 700);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let toml = r#"
[access]
role = "widget"
"#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/relaytask.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
        assert!(err.to_string().contains("/nonexistent/relaytask.toml"));
    }
}
