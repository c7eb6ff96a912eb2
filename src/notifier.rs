//! Notifier - best-effort completion messages to the listener
//!
//! Every message travels on its own short-lived TCP connection to the
//! listener's loopback port. Failures are returned as [`NotifyError`]; callers
//! log them and carry on. Nothing here retries.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::NotifyError;
use crate::listener::listener_addr;
use crate::queue::{Job, JobPaths};
use crate::Config;

/// Sentinel telling the listener that every job has finished
pub const ALL_DONE: &str = "RSYNC_DONE";

/// A message for the listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionMessage {
    /// A job reached its terminal outcome
    Job {
        job: String,
        output_path: PathBuf,
        log_path: PathBuf,
    },
    /// All workers have terminated
    AllDone,
}

impl CompletionMessage {
    pub fn for_job(job: &Job, paths: &JobPaths) -> Self {
        CompletionMessage::Job {
            job: job.uri().to_string(),
            output_path: paths.output_path.clone(),
            log_path: paths.log_path.clone(),
        }
    }
}

impl fmt::Display for CompletionMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionMessage::Job {
                job,
                output_path,
                log_path,
            } => write!(f, "{} {} {}", job, output_path.display(), log_path.display()),
            CompletionMessage::AllDone => f.write_str(ALL_DONE),
        }
    }
}

/// Sends completion messages to the listener
#[derive(Debug, Clone)]
pub struct Notifier {
    addr: SocketAddr,
    connect_timeout: Duration,
}

impl Notifier {
    pub fn new(port: u16, connect_timeout: Duration) -> Self {
        Self {
            addr: listener_addr(port),
            connect_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.listener.port, config.listener.connect_timeout())
    }

    /// Deliver one message on a fresh connection; returns the number of bytes sent
    pub async fn notify(&self, message: &CompletionMessage) -> Result<usize, NotifyError> {
        let connect_error = |source| NotifyError::Connect {
            addr: self.addr,
            source,
        };

        let mut stream = timeout(self.connect_timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| connect_error(io::Error::from(io::ErrorKind::TimedOut)))?
            .map_err(connect_error)?;

        let payload = message.to_string();
        let sent = send_all(&mut stream, payload.as_bytes())
            .await
            .map_err(|source| NotifyError::Send {
                addr: self.addr,
                source,
            })?;

        if let Err(e) = stream.shutdown().await {
            debug!("Listener connection did not close cleanly: {}", e);
        }

        debug!("Sent {} bytes to listener: {}", sent, payload);
        Ok(sent)
    }
}

/// Write every byte of `data`, looping over partial writes
pub async fn send_all<W>(writer: &mut W, data: &[u8]) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut sent = 0;

    while sent < data.len() {
        let written = writer.write(&data[sent..]).await?;
        if written == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("listener stopped accepting data after {} bytes", sent),
            ));
        }
        sent += written;
    }

    writer.flush().await?;
    Ok(sent)
}
