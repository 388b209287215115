//! Error types for log tailing.

use std::io;
use std::path::PathBuf;

use podtail_types::ContainerId;
use thiserror::Error;

/// Errors raised while tailing a container log
#[derive(Debug, Error)]
pub enum TailError {
    /// The log file does not exist (yet). Retried on the next notification.
    #[error("log file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A start was requested for a container that already has a live watch.
    #[error("container {0} already has a live watch")]
    DuplicateWatch(ContainerId),

    #[error("filesystem notification error: {0}")]
    Notify(#[from] notify::Error),
}

impl TailError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the next notification may succeed without intervention
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::FileNotFound(_))
    }
}

/// A log line that is not a valid json-file record
#[derive(Debug, Error)]
#[error("malformed log line ({len} bytes): {source}")]
pub struct MalformedRecord {
    pub len: usize,
    #[source]
    pub source: serde_json::Error,
}

/// Delivery failures reported by a sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink closed")]
    Closed,

    #[error("sink I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
