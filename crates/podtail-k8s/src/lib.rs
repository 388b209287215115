//! Kubernetes pod source for podtail
//!
//! This crate connects to the cluster, lists the pods scheduled to one node
//! and exposes the pod watch as a blocking iterator of lifecycle events.

mod client;
mod convert;
mod source;

pub use client::KubeClient;
pub use convert::snapshot_from_pod;
pub use source::{KubePodSource, PodEventIter};

// Re-export types that are used in our public API
pub use podtail_types::{PodEvent, PodListing, PodSnapshot, PodSource, SourceError};
