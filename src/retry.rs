//! Retry Policy - drives a job through repeated transfer attempts
//!
//! The first attempt runs immediately. Each failure is followed by a backoff
//! sleep that starts at the initial delay and doubles every time; retrying
//! stops once the next delay would reach the ceiling. With the default 5s
//! start and 300s ceiling that is 5, 10, 20, 40, 80 and 160 seconds, seven
//! attempts in total.

use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::queue::{Job, JobPaths};
use crate::transfer::TransferRunner;

/// Backoff schedule for a failing job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub backoff_ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(5),
            backoff_ceiling: Duration::from_secs(300),
        }
    }
}

/// Iterator over the delays slept before each retry
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    next: Duration,
    ceiling: Duration,
}

impl Iterator for BackoffSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.next.is_zero() || self.next >= self.ceiling {
            return None;
        }
        let delay = self.next;
        self.next = delay.saturating_mul(2);
        Some(delay)
    }
}

/// Where a job currently is in its attempt sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Attempting { attempt: u32 },
    Retrying { delay: Duration },
    Success,
    Exhausted,
}

/// Per-job attempt bookkeeping, owned by the worker processing the job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptRecord {
    pub attempts: u32,
    pub last_exit_code: Option<i32>,
    pub last_stderr: String,
    /// Delays slept between attempts, in order
    pub delays: Vec<Duration>,
    pub backoff_elapsed: Duration,
}

/// Terminal outcome of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Synced(AttemptRecord),
    Exhausted(AttemptRecord),
}

impl JobOutcome {
    pub fn record(&self) -> &AttemptRecord {
        match self {
            JobOutcome::Synced(record) | JobOutcome::Exhausted(record) => record,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, JobOutcome::Synced(_))
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            initial_backoff: Duration::from_secs(config.initial_backoff_secs),
            backoff_ceiling: Duration::from_secs(config.backoff_ceiling_secs),
        }
    }

    pub fn schedule(&self) -> BackoffSchedule {
        BackoffSchedule {
            next: self.initial_backoff,
            ceiling: self.backoff_ceiling,
        }
    }

    /// Upper bound on attempts for a job that never succeeds
    pub fn max_attempts(&self) -> u32 {
        1 + self.schedule().count() as u32
    }

    /// Run attempts until one succeeds or the schedule is exhausted
    pub async fn drive(
        &self,
        job: &Job,
        paths: &JobPaths,
        runner: &dyn TransferRunner,
    ) -> JobOutcome {
        let mut record = AttemptRecord::default();
        let mut schedule = self.schedule();
        let mut state = AttemptState::Attempting { attempt: 1 };

        loop {
            state = match state {
                AttemptState::Attempting { attempt } => {
                    record.attempts = attempt;

                    if self.attempt(job, paths, runner, &mut record).await {
                        AttemptState::Success
                    } else {
                        match schedule.next() {
                            Some(delay) => AttemptState::Retrying { delay },
                            None => AttemptState::Exhausted,
                        }
                    }
                }
                AttemptState::Retrying { delay } => {
                    debug!("{}: retrying in {}s", job, delay.as_secs());
                    tokio::time::sleep(delay).await;
                    record.delays.push(delay);
                    record.backoff_elapsed += delay;
                    AttemptState::Attempting {
                        attempt: record.attempts + 1,
                    }
                }
                AttemptState::Success => return JobOutcome::Synced(record),
                AttemptState::Exhausted => {
                    error!(
                        "{}: giving up after {} attempts ({}s of backoff), last return code: {}",
                        job,
                        record.attempts,
                        record.backoff_elapsed.as_secs(),
                        display_code(record.last_exit_code)
                    );
                    return JobOutcome::Exhausted(record);
                }
            };
        }
    }

    /// One transfer attempt; returns whether it succeeded
    async fn attempt(
        &self,
        job: &Job,
        paths: &JobPaths,
        runner: &dyn TransferRunner,
        record: &mut AttemptRecord,
    ) -> bool {
        let attempt = record.attempts;

        match runner.run(job, paths).await {
            Ok(outcome) => {
                record.last_exit_code = outcome.exit_code;
                record.last_stderr = outcome.stderr.clone();

                if !outcome.stderr.is_empty() {
                    error!("{}: rsync returned errors: {}", job, outcome.stderr);
                }

                if outcome.success() {
                    info!("{} attempt {} return code: 0", job, attempt);
                    true
                } else {
                    warn!(
                        "{} attempt {} return code: {}",
                        job,
                        attempt,
                        display_code(outcome.exit_code)
                    );
                    false
                }
            }
            Err(e) => {
                record.last_exit_code = None;
                record.last_stderr = format!("{:#}", e);
                error!("{} attempt {} could not run: {:#}", job, attempt, e);
                false
            }
        }
    }
}

fn display_code(code: Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}
