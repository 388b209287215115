//! Shared types for podtail
//!
//! This crate contains the data model used across podtail crates: pod and
//! container identities, lifecycle events, tail policies, log records and
//! the contract a cluster event source has to fulfil.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Identity Types
// ============================================================================

/// Cluster-assigned pod uid
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PodId(String);

impl PodId {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Runtime-assigned container id, always stored without its runtime prefix
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Build an id from the raw value reported by the cluster, stripping any
    /// `<runtime>://` prefix (e.g. `docker://`, `containerd://`)
    pub fn normalize(raw: &str) -> Self {
        let raw = raw.trim();
        let id = match raw.find("://") {
            Some(pos) => &raw[pos + 3..],
            None => raw,
        };
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form used in log output
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a pod as observed by the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodIdentity {
    pub uid: PodId,
    pub name: String,
    pub namespace: String,
    pub node: Option<String>,
}

impl PodIdentity {
    pub fn new(uid: PodId, name: String, namespace: String) -> Self {
        Self {
            uid,
            name,
            namespace,
            node: None,
        }
    }
}

// ============================================================================
// Pod Snapshots and Lifecycle Events
// ============================================================================

/// Status of one container as reported in a pod snapshot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerStatus {
    /// Absent until the runtime has created the container
    pub id: Option<ContainerId>,
    pub name: String,
    pub image: String,
    pub restart_count: i32,
}

impl ContainerStatus {
    pub fn new(name: String) -> Self {
        Self {
            id: None,
            name,
            image: String::new(),
            restart_count: 0,
        }
    }
}

/// Full state of a pod at one point in time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodSnapshot {
    pub identity: PodIdentity,
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<ContainerStatus>,
}

impl PodSnapshot {
    pub fn new(identity: PodIdentity) -> Self {
        Self {
            identity,
            labels: BTreeMap::new(),
            containers: Vec::new(),
        }
    }

    /// Container ids reported by this snapshot; containers without an id are skipped
    pub fn reported_ids(&self) -> HashSet<ContainerId> {
        self.containers.iter().filter_map(|c| c.id.clone()).collect()
    }

    pub fn container(&self, id: &ContainerId) -> Option<&ContainerStatus> {
        self.containers.iter().find(|c| c.id.as_ref() == Some(id))
    }
}

/// Raised when a lifecycle event kind is outside the modeled set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported event kind: {0}")]
pub struct UnsupportedEvent(pub String);

/// Lifecycle event kinds the reconciler understands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "ADDED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
        }
    }
}

impl FromStr for EventKind {
    type Err = UnsupportedEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADDED" => Ok(Self::Added),
            "MODIFIED" => Ok(Self::Modified),
            "DELETED" => Ok(Self::Deleted),
            other => Err(UnsupportedEvent(other.to_string())),
        }
    }
}

/// A pod lifecycle event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PodEvent {
    Added(PodSnapshot),
    Modified(PodSnapshot),
    Deleted(PodSnapshot),
}

impl PodEvent {
    pub fn new(kind: EventKind, pod: PodSnapshot) -> Self {
        match kind {
            EventKind::Added => Self::Added(pod),
            EventKind::Modified => Self::Modified(pod),
            EventKind::Deleted => Self::Deleted(pod),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Added(_) => EventKind::Added,
            Self::Modified(_) => EventKind::Modified,
            Self::Deleted(_) => EventKind::Deleted,
        }
    }

    pub fn pod(&self) -> &PodSnapshot {
        match self {
            Self::Added(pod) | Self::Modified(pod) | Self::Deleted(pod) => pod,
        }
    }
}

// ============================================================================
// Tail Policy
// ============================================================================

/// Whether a pod was already running when the process started
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cohort {
    /// Seen in the initial listing
    PreExisting,
    /// First seen afterwards
    New,
}

impl Cohort {
    /// Pre-existing containers skip their backlog, new ones are read in full
    pub fn start_position(&self) -> StartPosition {
        match self {
            Self::PreExisting => StartPosition::End,
            Self::New => StartPosition::Beginning,
        }
    }
}

/// Where tailing begins the first time a log file is opened
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartPosition {
    Beginning,
    End,
}

/// Everything a tail task needs to know about the container it follows
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchSpec {
    pub container: ContainerId,
    pub container_name: String,
    pub image: String,
    pub restart_count: i32,
    pub pod: PodIdentity,
    pub labels: BTreeMap<String, String>,
    pub start: StartPosition,
}

impl WatchSpec {
    /// Describe the watch for one container of a snapshot
    pub fn from_snapshot(snapshot: &PodSnapshot, container: &ContainerId, cohort: Cohort) -> Self {
        let status = snapshot.container(container);
        Self {
            container: container.clone(),
            container_name: status.map(|s| s.name.clone()).unwrap_or_default(),
            image: status.map(|s| s.image.clone()).unwrap_or_default(),
            restart_count: status.map(|s| s.restart_count).unwrap_or(0),
            pod: snapshot.identity.clone(),
            labels: snapshot.labels.clone(),
            start: cohort.start_position(),
        }
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// Log severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
    Unknown,
}

impl LogLevel {
    /// Parse log level from common formats
    pub fn from_label(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" | "trc" | "trce" => Self::Trace,
            "debug" | "dbg" | "debg" => Self::Debug,
            "info" | "inf" | "information" => Self::Info,
            "warn" | "warning" | "wrn" => Self::Warn,
            "error" | "err" | "erro" => Self::Error,
            "fatal" | "panic" | "critical" | "crit" | "ftl" => Self::Fatal,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
            Self::Unknown => "unknown",
        }
    }
}

/// One parsed line of a container log file
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    pub message: String,
    /// `stdout` or `stderr`
    pub stream: String,
    pub timestamp: DateTime<Utc>,
    pub pod: PodId,
    pub container: ContainerId,
}

/// A log record with pod and container metadata attached, as handed to a sink
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EnrichedRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub stream: String,
    pub level: LogLevel,
    pub node: Option<String>,
    pub namespace: String,
    pub pod_name: String,
    pub pod_uid: PodId,
    pub container_name: String,
    pub container_id: ContainerId,
    pub image: String,
    pub restart_count: i32,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

// ============================================================================
// Cluster Event Source Contract
// ============================================================================

/// Errors raised by a cluster event source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    UnsupportedEvent(#[from] UnsupportedEvent),

    #[error("cluster api error: {0}")]
    Api(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("malformed pod object: {0}")]
    MalformedPod(String),
}

/// Result of a full listing: every pod plus the version to resume watching from
#[derive(Clone, Debug, Default)]
pub struct PodListing {
    pub pods: Vec<PodSnapshot>,
    pub resource_version: String,
}

/// A blocking source of pod state
///
/// Both calls may block on network I/O and are expected to run off the
/// control task.
pub trait PodSource: Send + Sync + 'static {
    /// Blocking iterator over lifecycle events
    type Events: Iterator<Item = Result<PodEvent, SourceError>> + Send + 'static;

    /// One-shot listing of every pod currently known
    fn list(&self) -> Result<PodListing, SourceError>;

    /// Events that happened after `resource_version`; ends when the server closes the watch
    fn watch(&self, resource_version: &str) -> Result<Self::Events, SourceError>;
}
