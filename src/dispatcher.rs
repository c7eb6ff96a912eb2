//! Dispatcher - runs the worker pool over the configured jobs
//!
//! The dispatcher fills the job queue, spawns `min(max_workers, jobs)`
//! workers that all drain the same queue, waits until every one of them has
//! terminated and then tells the listener that the run is over.

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, Instrument};

use crate::listener::{self, ListenerStatus};
use crate::notifier::{CompletionMessage, Notifier};
use crate::queue::{Job, JobQueue};
use crate::transfer::TransferRunner;
use crate::worker::{Worker, WorkerReport};
use crate::Config;

/// Results from a complete dispatch run
#[derive(Debug, Clone)]
pub struct DispatchSummary {
    pub workers_spawned: usize,
    pub jobs_synced: usize,
    pub jobs_exhausted: usize,
    pub notify_failures: usize,
    /// Whether the final `RSYNC_DONE` reached the listener
    pub all_done_delivered: bool,
    pub duration: Duration,
    pub reports: Vec<WorkerReport>,
}

/// Number of workers to start for a queue of `queued` jobs
pub fn worker_count(max_workers: usize, queued: usize) -> usize {
    max_workers.min(queued)
}

/// Owns the worker pool for one run
pub struct Dispatcher {
    config: Arc<Config>,
    runner: Arc<dyn TransferRunner>,
    notifier: Notifier,
}

impl Dispatcher {
    /// Create a dispatcher with the given configuration and transfer runner
    pub fn new(config: Config, runner: Arc<dyn TransferRunner>) -> Self {
        let notifier = Notifier::from_config(&config);

        Self {
            config: Arc::new(config),
            runner,
            notifier,
        }
    }

    /// Make sure a listener is reachable before any job runs
    pub async fn ensure_listener(&self) -> Result<ListenerStatus> {
        listener::ensure_listener(&self.config).await
    }

    /// Dispatch every configured job and wait for the pool to finish
    pub async fn run(&self) -> Result<DispatchSummary> {
        let queue = JobQueue::new();
        for uri in &self.config.jobs {
            queue.put(Job::new(uri.as_str())).await;
        }

        self.run_queue(queue).await
    }

    /// Drain an already filled queue with the worker pool
    pub async fn run_queue(&self, queue: JobQueue) -> Result<DispatchSummary> {
        let start_time = Instant::now();

        let queued = queue.len().await;
        let workers = worker_count(self.config.pool.max_workers, queued);
        info!(
            "Dispatching {} jobs to {} workers (max {})",
            queued, workers, self.config.pool.max_workers
        );

        let queue = Arc::new(queue);
        let mut handles = FuturesUnordered::new();

        for id in 0..workers {
            let worker = Worker::new(
                id,
                self.config.clone(),
                queue.clone(),
                self.runner.clone(),
                self.notifier.clone(),
            );
            let span = info_span!("worker", id);
            handles.push(tokio::spawn(worker.run().instrument(span)));
        }

        debug!("Number of workers spawned: {}", handles.len());

        // Join barrier: every spawned worker must finish before RSYNC_DONE
        let mut reports = Vec::with_capacity(workers);
        while let Some(joined) = handles.next().await {
            match joined {
                Ok(report) => {
                    debug!("Worker {} finished: {:?}", report.worker_id, report);
                    reports.push(report);
                }
                Err(e) => {
                    error!("Worker task failed: {}", e);
                }
            }
        }

        info!("All {} workers have finished", workers);

        let all_done_delivered = match self.notifier.notify(&CompletionMessage::AllDone).await {
            Ok(_) => true,
            Err(e) => {
                error!("Could not send {} to the listener: {}", CompletionMessage::AllDone, e);
                false
            }
        };

        let summary = self.compile_summary(workers, reports, start_time.elapsed(), all_done_delivered);

        info!(
            "Dispatch completed in {:.2}s: {} synced, {} exhausted, {} notification failures",
            summary.duration.as_secs_f64(),
            summary.jobs_synced,
            summary.jobs_exhausted,
            summary.notify_failures
        );

        Ok(summary)
    }

    /// Compile dispatch summary from worker reports
    fn compile_summary(
        &self,
        workers_spawned: usize,
        reports: Vec<WorkerReport>,
        duration: Duration,
        all_done_delivered: bool,
    ) -> DispatchSummary {
        DispatchSummary {
            workers_spawned,
            jobs_synced: reports.iter().map(|r| r.synced).sum(),
            jobs_exhausted: reports.iter().map(|r| r.exhausted).sum(),
            notify_failures: reports.iter().map(|r| r.notify_failures).sum(),
            all_done_delivered,
            duration,
            reports,
        }
    }

    /// Get configuration for external inspection
    pub fn config(&self) -> &Config {
        &self.config
    }
}
