use crate::task::{TaskId, TaskStatus};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The transport could not be established.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("daemon socket not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("daemon at {} refused the connection", .0.display())]
    Refused(PathBuf),
    #[error("connecting to the daemon timed out after {0:?}")]
    Timeout(Duration),
    #[error("daemon handshake failed: {0}")]
    Handshake(String),
    #[error("invalid daemon uri '{0}'")]
    InvalidUri(String),
    #[error("daemon transport error: {0}")]
    Io(String),
}

impl ConnectionError {
    pub fn from_io(path: PathBuf, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ConnectionError::NotFound(path),
            io::ErrorKind::ConnectionRefused => ConnectionError::Refused(path),
            _ => ConnectionError::Io(err.to_string()),
        }
    }
}

/// A specific call against an established connection failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DaemonError {
    #[error("daemon call timed out")]
    Timeout,
    #[error("daemon connection lost")]
    Disconnected,
    #[error("malformed daemon response: {0}")]
    Malformed(String),
    #[error("daemon rejected the request: {0}")]
    Rejected(String),
}

impl DaemonError {
    /// Timeouts and dropped connections may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, DaemonError::Timeout | DaemonError::Disconnected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InconsistencyKind {
    /// The observed pair is not an edge of the task state machine.
    InvalidTransition,
    /// A finished task came back as queued or running under the same id.
    IdentifierReused,
}

impl InconsistencyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InconsistencyKind::InvalidTransition => "invalid_transition",
            InconsistencyKind::IdentifierReused => "identifier_reused",
        }
    }
}

/// Observed daemon data that violates the task state machine. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task {task_id}: {} from {from} to {to}", kind.as_str())]
pub struct ModelInconsistency {
    pub task_id: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub kind: InconsistencyKind,
}

/// Local rejection of a duplicate submit; nothing reaches the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} already pending for task {task_id}")]
pub struct CommandAlreadyPending {
    pub task_id: TaskId,
    pub kind: crate::dispatcher::CommandKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error(transparent)]
    AlreadyPending(#[from] CommandAlreadyPending),
    #[error("command queue full")]
    QueueFull,
    #[error("daemon adapter stopped")]
    ChannelClosed,
    #[error("{0}")]
    Invalid(String),
}

/// Reasons the event loop gives up. Teardown still runs for each of them.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("could not connect to the daemon after {attempts} attempts: {error}")]
    StartupFailed { attempts: u32, error: ConnectionError },
    #[error("lost the daemon and gave up after {attempts} reconnect attempts: {error}")]
    ReconnectFailed { attempts: u32, error: ConnectionError },
    #[error("terminal input failed: {0}")]
    Input(#[source] io::Error),
    #[error("render failed: {0}")]
    Render(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RenderError(pub String);

impl From<io::Error> for RenderError {
    fn from(err: io::Error) -> Self {
        RenderError(err.to_string())
    }
}
