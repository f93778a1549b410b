use std::fmt::{self, Display};
use std::io;

#[derive(Debug)]
pub enum PoolError {
    Message(String),
    InvalidSize(usize),
    InvalidConfig(String),
    /// The pool has started shutting down and no longer accepts tasks.
    Closed,
    QueueFull,
    /// A worker tried to publish after the result sink was closed. This
    /// only happens if the shutdown ordering is broken.
    SinkClosed,
    /// `shutdown` was called from one of the pool's own workers, which
    /// would wait for itself.
    ShutdownFromWorker,
    Io(io::Error),
    Serde(serde_json::Error),
}

impl From<io::Error> for PoolError {
    fn from(value: io::Error) -> Self {
        PoolError::Io(value)
    }
}

impl From<serde_json::Error> for PoolError {
    fn from(value: serde_json::Error) -> Self {
        PoolError::Serde(value)
    }
}

impl Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Message(msg) => f.write_str(msg),
            PoolError::InvalidSize(size) => {
                write!(f, "invalid pool size {}, expected at least 1", size)
            }
            PoolError::InvalidConfig(msg) => write!(f, "invalid pool config: {}", msg),
            PoolError::Closed => f.write_str("pool is closed"),
            PoolError::QueueFull => f.write_str("task queue is full"),
            PoolError::SinkClosed => f.write_str("result published after the sink was closed"),
            PoolError::ShutdownFromWorker => {
                f.write_str("shutdown called from a worker of the same pool")
            }
            PoolError::Io(e) => write!(f, "io error: {}", e),
            PoolError::Serde(e) => write!(f, "config error: {}", e),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::Io(e) => Some(e),
            PoolError::Serde(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
