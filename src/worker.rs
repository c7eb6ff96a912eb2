use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::notifier::{CompletionMessage, Notifier};
use crate::queue::{JobPaths, JobQueue};
use crate::retry::{JobOutcome, RetryPolicy};
use crate::transfer::TransferRunner;
use crate::Config;

/// What one worker did before it ran out of work
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub synced: usize,
    pub exhausted: usize,
    pub notify_failures: usize,
}

/// Pulls jobs from the shared queue until it stays empty for the dequeue timeout
pub struct Worker {
    id: usize,
    config: Arc<Config>,
    queue: Arc<JobQueue>,
    runner: Arc<dyn TransferRunner>,
    notifier: Notifier,
    policy: RetryPolicy,
    dequeue_timeout: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        config: Arc<Config>,
        queue: Arc<JobQueue>,
        runner: Arc<dyn TransferRunner>,
        notifier: Notifier,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config.retry);
        let dequeue_timeout = config.pool.dequeue_timeout();

        Self {
            id,
            config,
            queue,
            runner,
            notifier,
            policy,
            dequeue_timeout,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub async fn run(self) -> WorkerReport {
        let mut report = WorkerReport {
            worker_id: self.id,
            ..Default::default()
        };

        while let Some(job) = self.queue.try_get(self.dequeue_timeout).await {
            let paths = JobPaths::for_job(&self.config, &job);
            info!("Synchronizing {} into {}", job, paths.output_path.display());

            let outcome = self.policy.drive(&job, &paths, self.runner.as_ref()).await;
            match &outcome {
                JobOutcome::Synced(_) => {
                    report.synced += 1;
                    info!("Notifying the listener");
                }
                JobOutcome::Exhausted(record) => {
                    report.exhausted += 1;
                    // The listener receives the same record as for a synced job
                    warn!(
                        "{} exhausted after {} attempts, notifying the listener anyway",
                        job, record.attempts
                    );
                }
            }

            let message = CompletionMessage::for_job(&job, &paths);
            if let Err(e) = self.notifier.notify(&message).await {
                report.notify_failures += 1;
                error!("Could not notify the listener about {}: {}", job, e);
            }
        }

        info!("Exiting with no more work to do");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{MockTransferRunner, TransferOutcome};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn test_config(port: u16) -> Arc<Config> {
        let mut config = Config::new(vec![], "/usr/bin/rsync", "/srv/repo", "/srv/logs");
        config.listener.port = port;
        config.pool.dequeue_timeout_ms = 20;
        Arc::new(config)
    }

    /// Collect `count` messages from a listener socket
    async fn collect(listener: TcpListener, count: usize) -> Vec<String> {
        let mut messages = Vec::new();
        for _ in 0..count {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut message = String::new();
            socket.read_to_string(&mut message).await.unwrap();
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_worker_drains_queue_and_notifies_each_job() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = test_config(listener.local_addr().unwrap().port());
        let messages = tokio::spawn(collect(listener, 3));

        let mut runner = MockTransferRunner::new();
        runner
            .expect_run()
            .times(3)
            .returning(|_, _| Ok(TransferOutcome::new(Some(0), "")));

        let queue = Arc::new(JobQueue::from_jobs(["host/a", "host/b", "host/c"]));
        let worker = Worker::new(
            7,
            config.clone(),
            queue.clone(),
            Arc::new(runner),
            Notifier::from_config(&config),
        );
        assert_eq!(worker.id(), 7);

        let report = worker.run().await;

        assert_eq!(
            report,
            WorkerReport {
                worker_id: 7,
                synced: 3,
                exhausted: 0,
                notify_failures: 0,
            }
        );
        assert!(queue.is_empty().await);

        let messages = messages.await.unwrap();
        let jobs: Vec<&str> = messages
            .iter()
            .map(|m| m.split(' ').next().unwrap())
            .collect();
        assert_eq!(jobs, vec!["host/a", "host/b", "host/c"]);
        assert!(messages[0].starts_with("host/a /srv/repo/host/a /srv/logs/host/a."));
    }

    #[tokio::test]
    async fn test_exhausted_job_still_notifies() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = Config::clone(&test_config(listener.local_addr().unwrap().port()));
        // One 1s backoff, then the next delay reaches the ceiling
        config.retry.initial_backoff_secs = 1;
        config.retry.backoff_ceiling_secs = 2;
        let config = Arc::new(config);
        let messages = tokio::spawn(collect(listener, 1));

        let mut runner = MockTransferRunner::new();
        runner
            .expect_run()
            .times(2)
            .returning(|_, _| Ok(TransferOutcome::new(Some(30), "timeout in data send")));

        let queue = Arc::new(JobQueue::from_jobs(["host/broken"]));
        let report = Worker::new(
            0,
            config.clone(),
            queue,
            Arc::new(runner),
            Notifier::from_config(&config),
        )
        .run()
        .await;

        assert_eq!(report.exhausted, 1);
        assert_eq!(report.synced, 0);
        let messages = messages.await.unwrap();
        assert!(messages[0].starts_with("host/broken /srv/repo/host/broken "));
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_stop_worker() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = test_config(port);

        let mut runner = MockTransferRunner::new();
        runner
            .expect_run()
            .times(2)
            .returning(|_, _| Ok(TransferOutcome::new(Some(0), "")));

        let queue = Arc::new(JobQueue::from_jobs(["host/a", "host/b"]));
        let report = Worker::new(
            1,
            config.clone(),
            queue,
            Arc::new(runner),
            Notifier::from_config(&config),
        )
        .run()
        .await;

        assert_eq!(report.synced, 2);
        assert_eq!(report.notify_failures, 2);
    }
}
