//! Reconciliation engine for podtail
//!
//! Keeps the set of tailed containers in sync with the pods observed on the
//! node: the `EventBridge` turns the blocking pod event source into an async
//! sequence, the `Reconciler` applies each snapshot as set differences and
//! `run` drives both from a single control task.

mod bridge;
mod cohort;
mod error;
mod reconciler;
mod runner;

#[cfg(test)]
mod test_support;

pub use bridge::EventBridge;
pub use cohort::CohortClassifier;
pub use error::{BridgeError, EngineError, ReconcileError};
pub use reconciler::{PodRecord, Reconciler};
pub use runner::run;
