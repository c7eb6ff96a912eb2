//! rsync-cord - Parallel rsync coordinator
//!
//! rsync-cord synchronizes a list of remote repositories with a bounded pool
//! of concurrent workers, retries failed transfers with exponential backoff
//! and reports every finished job to a listener process over loopback TCP.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading, validation and directory preparation
//! - [`queue`]: Jobs and the shared job queue
//! - [`transfer`]: rsync invocation
//! - [`retry`]: Backoff schedule and the per-job attempt state machine
//! - [`notifier`]: Completion messages to the listener
//! - [`listener`]: Listener probing and launch
//! - [`worker`]: The worker loop
//! - [`dispatcher`]: Worker pool control

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod notifier;
pub mod queue;
pub mod retry;
pub mod transfer;
pub mod worker;

pub use config::Config;
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use error::{ConfigError, NotifyError, ProbeError};
pub use notifier::{CompletionMessage, Notifier};
pub use queue::{Job, JobPaths, JobQueue};
pub use retry::{JobOutcome, RetryPolicy};
pub use transfer::{RsyncRunner, TransferOutcome, TransferRunner};
