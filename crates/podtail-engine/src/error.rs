use podtail_types::{PodId, SourceError, UnsupportedEvent};
use thiserror::Error;

/// Structural errors in the pod table. Both are fatal.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("removal of unknown pod {0}")]
    UnknownPod(PodId),

    #[error(transparent)]
    UnsupportedEvent(#[from] UnsupportedEvent),
}

/// Failures of the blocking worker behind an `EventBridge`
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("event source panicked: {0}")]
    Panicked(String),

    #[error("event source worker exited unexpectedly")]
    WorkerLost,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("pod source error: {0}")]
    Source(#[from] SourceError),

    #[error("reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("event bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
