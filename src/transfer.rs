use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use crate::queue::{Job, JobPaths};
use crate::Config;

/// Exit status and diagnostics of one transfer attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Process exit code, `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Everything the transfer wrote to stderr
    pub stderr: String,
}

impl TransferOutcome {
    pub fn new(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Only the exit code decides success; stderr output is diagnostic
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs one transfer attempt for a job
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferRunner: Send + Sync {
    async fn run(&self, job: &Job, paths: &JobPaths) -> Result<TransferOutcome>;
}

/// Transfer runner backed by the rsync executable
#[derive(Debug, Clone)]
pub struct RsyncRunner {
    binary: PathBuf,
    io_timeout_secs: u64,
}

impl RsyncRunner {
    pub fn new(binary: impl Into<PathBuf>, io_timeout_secs: u64) -> Self {
        Self {
            binary: binary.into(),
            io_timeout_secs,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.rsync, config.transfer.timeout_secs)
    }

    /// Arguments passed to rsync for a job
    pub fn command_args(&self, job: &Job, paths: &JobPaths) -> Vec<String> {
        vec![
            "-airz".to_string(),
            "--del".to_string(),
            format!("--timeout={}", self.io_timeout_secs),
            job.source_url(),
            paths.output_path.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl TransferRunner for RsyncRunner {
    async fn run(&self, job: &Job, paths: &JobPaths) -> Result<TransferOutcome> {
        if let Some(parent) = paths.log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create transfer log directory")?;
        }

        // Retries of the same job append to the same log
        let log_file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&paths.log_path)
            .await
            .with_context(|| format!("Failed to open transfer log: {}", paths.log_path.display()))?
            .into_std()
            .await;

        let args = self.command_args(job, paths);
        debug!("Running {} {}", self.binary.display(), args.join(" "));

        let output = AsyncCommand::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.binary.display()))?;

        Ok(TransferOutcome {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        })
    }
}
