//! Job Queue - shared pool of pending synchronization jobs
//!
//! The queue is filled once before dispatch and then drained concurrently by
//! the workers. Each job is handed to exactly one worker.

use chrono::Utc;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout_at, Instant};

use crate::Config;

/// A single repository to synchronize, identified by its URI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Job {
    uri: String,
}

impl Job {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Remote rsync source for this job
    pub fn source_url(&self) -> String {
        format!("rsync://{}/", self.uri)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Filesystem locations derived for one job run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    /// Where the repository contents are synchronized to
    pub output_path: PathBuf,
    /// Where rsync's stdout is appended, shared by every attempt of the run
    pub log_path: PathBuf,
}

impl JobPaths {
    /// Derive the paths for a job, stamping the log file with the current time
    pub fn for_job(config: &Config, job: &Job) -> Self {
        let now = Utc::now();
        let stamp = now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6;

        Self {
            output_path: config.repository_dir().join(job.uri()),
            log_path: config.log_dir().join(format!("{}.{:.6}", job.uri(), stamp)),
        }
    }
}

/// Thread-safe FIFO of pending jobs
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    available: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a queue holding the given jobs in order
    pub fn from_jobs<I, S>(uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let jobs = uris.into_iter().map(Job::new).collect();
        Self {
            jobs: Mutex::new(jobs),
            available: Notify::new(),
        }
    }

    /// Enqueue a job. Only called before workers start draining the queue.
    pub async fn put(&self, job: Job) {
        self.jobs.lock().await.push_back(job);
        self.available.notify_one();
    }

    /// Take the next job, waiting up to `timeout` for one to become available.
    ///
    /// Returns `None` when the queue stayed empty for the whole timeout.
    pub async fn try_get(&self, timeout: Duration) -> Option<Job> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(job) = self.jobs.lock().await.pop_front() {
                return Some(job);
            }

            if timeout_at(deadline, self.available.notified()).await.is_err() {
                return None;
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}
