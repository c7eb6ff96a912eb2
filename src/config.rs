use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Name of the coordinator's own log file inside the log directory
pub const LOG_FILE_NAME: &str = "rsync_cord.log";

/// Main configuration structure, built once at startup and shared read-only
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Repository URIs to synchronize, one job each
    pub jobs: Vec<String>,

    /// Path to the rsync executable
    pub rsync: String,

    /// Root directory that receives the synchronized repositories
    pub repository: String,

    /// Root directory for the coordinator log and per-job transfer logs
    pub logs: String,

    /// Listener connection and launch settings
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Worker pool settings
    #[serde(default)]
    pub pool: PoolConfig,

    /// Backoff settings for failed transfers
    #[serde(default)]
    pub retry: RetryConfig,

    /// Transfer command settings
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Listener configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ListenerConfig {
    /// Loopback port the listener accepts completion messages on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Listener executable launched when nothing listens on the port
    pub binary: Option<String>,

    /// How long to wait for a freshly launched listener to open its port
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Upper bound on establishing a notification connection
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Worker pool configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    /// Maximum number of concurrent workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How long a worker waits on an empty queue before exiting
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
}

/// Retry backoff configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry; doubled after every further failure
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,

    /// Retrying stops once the next delay would reach this value
    #[serde(default = "default_backoff_ceiling_secs")]
    pub backoff_ceiling_secs: u64,
}

/// Transfer command configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TransferConfig {
    /// I/O timeout handed to rsync via --timeout
    #[serde(default = "default_transfer_timeout_secs")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_port() -> u16 {
    3450
}
fn default_startup_timeout_ms() -> u64 {
    2000
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_max_workers() -> usize {
    8
}
fn default_dequeue_timeout_ms() -> u64 {
    1000
}
fn default_initial_backoff_secs() -> u64 {
    5
}
fn default_backoff_ceiling_secs() -> u64 {
    300
}
fn default_transfer_timeout_secs() -> u64 {
    10
}

// Default implementations
impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            binary: None,
            startup_timeout_ms: default_startup_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: default_initial_backoff_secs(),
            backoff_ceiling_secs: default_backoff_ceiling_secs(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_transfer_timeout_secs(),
        }
    }
}

impl ListenerConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl PoolConfig {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }
}

impl Config {
    /// Build a configuration with default pool, retry, listener and transfer settings
    pub fn new(
        jobs: Vec<String>,
        rsync: impl Into<String>,
        repository: impl Into<String>,
        logs: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            rsync: rsync.into(),
            repository: repository.into(),
            logs: logs.into(),
            listener: ListenerConfig::default(),
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
            transfer: TransferConfig::default(),
        }
    }

    /// Load configuration from a file.
    ///
    /// `.yml`/`.yaml` files are parsed as YAML; anything else is read as the
    /// legacy `KEY=VALUE` format (`DIRS=`, `RSYNC=`, `REPOSITORY=`, `LOGS=`).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read config file {:?}; check that it exists and is readable",
                path
            )
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yml") | Some("yaml")
        );

        let mut config = if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::parse_legacy(&content)
                .with_context(|| format!("Invalid config file: {:?}", path))?
        };

        // Expand environment variables in paths
        config.expand_paths()?;

        Ok(config)
    }

    /// Parse the line-oriented `KEY=VALUE` configuration format
    pub fn parse_legacy(content: &str) -> Result<Self, ConfigError> {
        let mut dirs = None;
        let mut rsync = None;
        let mut repository = None;
        let mut logs = None;

        for line in content.lines() {
            if let Some(value) = line.strip_prefix("DIRS=") {
                dirs = Some(value);
            } else if let Some(value) = line.strip_prefix("RSYNC=") {
                rsync = Some(trim_path_value(value));
            } else if let Some(value) = line.strip_prefix("REPOSITORY=") {
                repository = Some(trim_path_value(value));
            } else if let Some(value) = line.strip_prefix("LOGS=") {
                logs = Some(trim_path_value(value));
            }
        }

        let dirs = dirs.ok_or(ConfigError::MissingField("DIRS"))?;
        let rsync = rsync
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingField("RSYNC"))?;
        let repository = repository
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingField("REPOSITORY"))?;
        let logs = logs
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingField("LOGS"))?;

        let mut config = Self::new(parse_job_list(dirs)?, rsync, repository, logs);
        config.listener.binary = std::env::var("RPKI_ROOT")
            .ok()
            .map(|root| format!("{}/rsync_aur/rsync_listener", root));

        Ok(config)
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.rsync = shellexpand::full(&self.rsync)
            .context("Failed to expand rsync path")?
            .into_owned();

        self.repository = shellexpand::full(&self.repository)
            .context("Failed to expand repository path")?
            .into_owned();

        self.logs = shellexpand::full(&self.logs)
            .context("Failed to expand logs path")?
            .into_owned();

        if let Some(binary) = &self.listener.binary {
            self.listener.binary = Some(
                shellexpand::full(binary)
                    .context("Failed to expand listener binary path")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    /// Reject configurations that cannot be dispatched
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs.is_empty() {
            return Err(ConfigError::NoJobs);
        }
        if let Some(job) = self.jobs.iter().find(|job| job.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "jobs",
                reason: format!("empty job identifier {:?}", job),
            });
        }
        // Job ids travel in space-delimited, single-line listener records
        if let Some(job) = self
            .jobs
            .iter()
            .find(|job| job.chars().any(char::is_whitespace))
        {
            return Err(ConfigError::InvalidValue {
                field: "jobs",
                reason: format!("job identifier {:?} contains whitespace", job),
            });
        }
        if self.rsync.is_empty() {
            return Err(ConfigError::MissingField("RSYNC"));
        }
        if self.repository.is_empty() {
            return Err(ConfigError::MissingField("REPOSITORY"));
        }
        if self.logs.is_empty() {
            return Err(ConfigError::MissingField("LOGS"));
        }
        if self.pool.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool.max_workers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.initial_backoff_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.initial_backoff_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.retry.backoff_ceiling_secs <= self.retry.initial_backoff_secs {
            return Err(ConfigError::InvalidValue {
                field: "retry.backoff_ceiling_secs",
                reason: format!(
                    "must exceed the initial backoff of {}s",
                    self.retry.initial_backoff_secs
                ),
            });
        }
        Ok(())
    }

    pub fn repository_dir(&self) -> PathBuf {
        PathBuf::from(&self.repository)
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.logs)
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.log_dir().join(LOG_FILE_NAME)
    }

    /// Create the log and repository roots plus the parent directory of every job under each
    pub fn ensure_directories(&self) -> Result<()> {
        let log_dir = self.log_dir();
        let repo_dir = self.repository_dir();

        for root in [&log_dir, &repo_dir] {
            std::fs::create_dir_all(root)
                .with_context(|| format!("Failed to create directory: {:?}", root))?;
        }

        for job in &self.jobs {
            for root in [&log_dir, &repo_dir] {
                if let Some(parent) = root.join(job).parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create directory: {:?}", parent))?;
                }
            }
        }

        Ok(())
    }
}

fn trim_path_value(value: &str) -> String {
    value
        .trim_matches(|c| matches!(c, '\n' | '\r' | '"' | ';' | ':'))
        .to_string()
}

/// Split a space-delimited `DIRS=` value into job identifiers
fn parse_job_list(value: &str) -> Result<Vec<String>, ConfigError> {
    if value.contains(',') {
        return Err(ConfigError::MalformedDelimiter { found: "Commas" });
    }
    if value.contains(';') {
        return Err(ConfigError::MalformedDelimiter { found: "Semicolons" });
    }

    Ok(value
        .trim_matches(|c| matches!(c, '"' | '\'' | '\n' | '\r'))
        .split_whitespace()
        .map(str::to_string)
        .collect())
}
