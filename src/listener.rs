//! Listener control - makes sure exactly one listener accepts completion messages
//!
//! The listener is a separate executable. Before dispatch the coordinator
//! probes the listener port and only launches a new listener when nothing
//! answers there.

use anyhow::{anyhow, Context, Result};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::ProbeError;
use crate::Config;

const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// What `ensure_listener` found or did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerStatus {
    /// Something was already accepting connections on the port
    AlreadyRunning,
    /// A listener process was started
    Launched { pid: u32 },
}

pub fn listener_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Check whether anything accepts TCP connections on the listener port
pub async fn probe(port: u16, connect_timeout: Duration) -> Result<(), ProbeError> {
    probe_addr(listener_addr(port), connect_timeout).await
}

async fn probe_addr(addr: SocketAddr, connect_timeout: Duration) -> Result<(), ProbeError> {
    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(source)) => Err(ProbeError::Connect { addr, source }),
        Err(_) => Err(ProbeError::Connect {
            addr,
            source: io::Error::from(io::ErrorKind::TimedOut),
        }),
    }
}

/// Launch the configured listener unless one is already reachable
pub async fn ensure_listener(config: &Config) -> Result<ListenerStatus> {
    let port = config.listener.port;
    let connect_timeout = config.listener.connect_timeout();

    match probe(port, connect_timeout).await {
        Ok(()) => {
            info!("Listener already running on port {}, continuing", port);
            return Ok(ListenerStatus::AlreadyRunning);
        }
        Err(e) => debug!("Listener probe: {}", e),
    }

    let binary = config.listener.binary.as_deref().ok_or_else(|| {
        anyhow!(
            "No listener is running on port {} and no listener binary is configured",
            port
        )
    })?;

    debug!(
        "Launching listener: RPKI_LOGDIR={} {} {}",
        config.logs, binary, port
    );

    // The listener outlives this process, so the child handle is dropped unwaited
    let child = Command::new(binary)
        .arg(port.to_string())
        .env("RPKI_LOGDIR", &config.logs)
        .stdin(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to launch listener: {}", binary))?;
    let pid = child.id();
    info!("Listener pid: {}", pid);

    wait_until_listening(port, config.listener.startup_timeout(), connect_timeout).await;

    Ok(ListenerStatus::Launched { pid })
}

/// Wait for a freshly launched listener to open its port
async fn wait_until_listening(port: u16, startup_timeout: Duration, connect_timeout: Duration) {
    let deadline = Instant::now() + startup_timeout;

    loop {
        match probe(port, connect_timeout).await {
            Ok(()) => {
                debug!("Listener is accepting connections on port {}", port);
                return;
            }
            Err(e) if Instant::now() >= deadline => {
                warn!(
                    "Listener did not open port {} within {}ms ({}); notifications may be lost",
                    port,
                    startup_timeout.as_millis(),
                    e
                );
                return;
            }
            Err(_) => sleep(PROBE_INTERVAL).await,
        }
    }
}
