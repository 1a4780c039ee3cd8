//! Error taxonomy for the wallet bridge
//!
//! Operation-level failures stay with the task that produced them,
//! startup failures are fatal to the session, shutdown problems are logged.

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to the worker over its communication channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The worker processed the request and reported an error.
    #[error("{0}")]
    Rejected(String),
    #[error("Worker channel I/O error: {0}")]
    Io(String),
    #[error("Worker channel closed")]
    Closed,
    #[error("Worker protocol error: {0}")]
    Protocol(String),
}

impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        ChannelError::Io(err.to_string())
    }
}

/// Delivered to a single submitter; never aborts the queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue stopped")]
    Stopped,
    #[error("{operation} failed: {message}")]
    Operation { operation: String, message: String },
    #[error("{operation} could not reach the worker: {source}")]
    Channel {
        operation: String,
        #[source]
        source: ChannelError,
    },
}

impl QueueError {
    pub(crate) fn from_channel(operation: &str, err: ChannelError) -> Self {
        match err {
            ChannelError::Rejected(message) => QueueError::Operation {
                operation: operation.to_string(),
                message,
            },
            other => QueueError::Channel {
                operation: operation.to_string(),
                source: other,
            },
        }
    }

    /// Message suitable for a UI notification.
    pub fn message(&self) -> String {
        match self {
            QueueError::Stopped => "queue stopped".to_string(),
            QueueError::Operation { message, .. } => message.clone(),
            QueueError::Channel { source, .. } => source.to_string(),
        }
    }
}

/// Worker failed to launch or to establish its channel.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Failed to spawn worker '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Worker did not become ready within {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("Worker channel could not be established: {0}")]
    Channel(String),
    #[error("Worker already started (state: {0})")]
    AlreadyStarted(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine the user configuration directory")]
    NoConfigDir,
    #[error("Config file error ({path}): {message}")]
    Io { path: String, message: String },
    #[error("Invalid config format: {message}")]
    InvalidFormat { message: String },
    #[error("Missing required config field: {field}")]
    MissingField { field: &'static str },
    #[error("Timeout '{field}' must be greater than zero")]
    ZeroTimeout { field: &'static str },
}

/// Top-level error for callers that cross module boundaries.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Startup error: {0}")]
    Startup(#[from] StartupError),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Startup,
    Operation,
    QueueStopped,
    Config,
    Io,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Startup => "startup",
            ErrorCategory::Operation => "operation",
            ErrorCategory::QueueStopped => "queue_stopped",
            ErrorCategory::Config => "config",
            ErrorCategory::Io => "io",
        };
        f.write_str(name)
    }
}

impl BridgeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::Startup(_) => ErrorCategory::Startup,
            BridgeError::Queue(QueueError::Stopped) => ErrorCategory::QueueStopped,
            BridgeError::Queue(_) => ErrorCategory::Operation,
            BridgeError::Config(_) => ErrorCategory::Config,
            BridgeError::Io(_) => ErrorCategory::Io,
        }
    }

    /// Startup failures end the session; everything else is local to a caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self.category(), ErrorCategory::Startup | ErrorCategory::Config)
    }

    pub fn user_message(&self) -> String {
        match self {
            BridgeError::Startup(err) => format!("The wallet service could not start: {}", err),
            BridgeError::Queue(QueueError::Stopped) => {
                "The wallet is shutting down; the request was not sent".to_string()
            }
            BridgeError::Queue(err) => err.message(),
            BridgeError::Config(err) => format!("Configuration problem: {}", err),
            BridgeError::Io(err) => format!("File system problem: {}", err),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
