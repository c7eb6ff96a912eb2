use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Fatal configuration problems, reported before any job is dispatched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing {0}= variable in config")]
    MissingField(&'static str),

    #[error("{found} in DIRS variable, delimiter should be a space")]
    MalformedDelimiter { found: &'static str },

    #[error("You don't have any URIs to rsync with")]
    NoJobs,

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Failure to deliver a completion message to the listener.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to connect to listener at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to send message to listener at {addr}: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Result of probing the listener port.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("nothing is listening on {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}
