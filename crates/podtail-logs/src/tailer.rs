use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use podtail_types::{ContainerId, WatchSpec};

use crate::enrich::Enricher;
use crate::error::TailError;
use crate::notifier::{FileEvent, FileNotifier};
use crate::sink::LogSink;
use crate::tail::{ContainerTail, log_path};

/// What to do when a start arrives for a container whose watch already ended
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadWatchPolicy {
    /// Discard the ended watch and start a fresh one
    #[default]
    Replace,
    /// Keep rejecting with `DuplicateWatch` until the container is stopped
    Reject,
}

#[derive(Clone, Debug)]
pub struct TailerConfig {
    /// Root of the per-container log directories
    pub containers_dir: PathBuf,
    /// Upper bound between read passes when no notification arrives
    pub poll_interval: Duration,
    pub dead_watch_policy: DeadWatchPolicy,
    pub label_allowlist: Vec<String>,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            containers_dir: PathBuf::from("/var/lib/docker/containers"),
            poll_interval: Duration::from_secs(1),
            dead_watch_policy: DeadWatchPolicy::default(),
            label_allowlist: Vec::new(),
        }
    }
}

/// Lifecycle of a single container watch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchState {
    /// Task running, log file not opened yet
    Registered,
    /// File opened and start position applied
    Open,
    /// At least one read pass completed
    Tailing,
    /// Task finished: stopped, file deleted, or shutdown
    Stopped,
}

/// Start/stop interface the reconciler drives
pub trait WatchControl {
    /// Begin tailing a container. Fails with `DuplicateWatch` if a live watch
    /// for the same container exists.
    fn start(&mut self, spec: WatchSpec) -> Result<(), TailError>;

    /// Stop tailing a container. Returns whether a watch was present; stopping
    /// an unknown container is a no-op.
    fn stop(&mut self, container: &ContainerId) -> bool;
}

struct WatchHandle {
    cancel: CancellationToken,
    state: watch::Receiver<WatchState>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    fn is_live(&self) -> bool {
        !self.task.is_finished() && *self.state.borrow() != WatchState::Stopped
    }
}

/// Owns one tailing task per watched container
///
/// A stopped task may still be finishing its current line when `stop`
/// returns. Its handle is kept, and a watch started again for the same
/// container waits for it before touching the file, so at most one task
/// reads a container log at any time.
pub struct Tailer {
    config: TailerConfig,
    sink: Arc<dyn LogSink>,
    enricher: Arc<Enricher>,
    notifier: FileNotifier,
    shutdown: CancellationToken,
    watches: HashMap<ContainerId, WatchHandle>,
    stopping: HashMap<ContainerId, JoinHandle<()>>,
}

impl Tailer {
    pub fn new(config: TailerConfig, sink: Arc<dyn LogSink>) -> Self {
        let enricher = Arc::new(Enricher::new(config.label_allowlist.iter().cloned()));
        Self {
            config,
            sink,
            enricher,
            notifier: FileNotifier::new(),
            shutdown: CancellationToken::new(),
            watches: HashMap::new(),
            stopping: HashMap::new(),
        }
    }

    /// Number of watches whose task is still running
    pub fn live_count(&self) -> usize {
        self.watches.values().filter(|h| h.is_live()).count()
    }

    /// Number of stopped watches whose task has not finished yet
    pub fn stopping_count(&self) -> usize {
        self.stopping.values().filter(|task| !task.is_finished()).count()
    }

    pub fn state(&self, container: &ContainerId) -> Option<WatchState> {
        self.watches.get(container).map(|h| *h.state.borrow())
    }

    /// Follow state changes of one watch
    pub fn subscribe(&self, container: &ContainerId) -> Option<watch::Receiver<WatchState>> {
        self.watches.get(container).map(|h| h.state.clone())
    }

    /// Cancel every watch and wait for the tasks to finish
    pub async fn shutdown_all(&mut self) {
        self.shutdown.cancel();
        let count = self.watches.len();
        let tasks = self
            .watches
            .drain()
            .map(|(container, handle)| (container, handle.task))
            .chain(self.stopping.drain());
        for (container, task) in tasks {
            if let Err(e) = task.await {
                tracing::warn!(container = %container.short(), error = %e, "watch task failed");
            }
        }
        self.sink.flush();
        tracing::info!(count, "all watches stopped");
    }

    fn prune_stopping(&mut self) {
        self.stopping.retain(|_, task| !task.is_finished());
    }
}

impl WatchControl for Tailer {
    fn start(&mut self, spec: WatchSpec) -> Result<(), TailError> {
        let container = spec.container.clone();
        self.prune_stopping();

        let mut predecessor = self.stopping.remove(&container);
        if let Some(existing) = self.watches.get(&container) {
            if existing.is_live() || self.config.dead_watch_policy == DeadWatchPolicy::Reject {
                if let Some(task) = predecessor {
                    self.stopping.insert(container.clone(), task);
                }
                return Err(TailError::DuplicateWatch(container));
            }
            tracing::warn!(container = %container.short(), "replacing ended watch");
            if let Some(old) = self.watches.remove(&container) {
                old.cancel.cancel();
                predecessor = Some(old.task);
            }
        }

        let path = log_path(&self.config.containers_dir, &container);
        let tail = ContainerTail::new(spec, path, Arc::clone(&self.enricher));
        let cancel = self.shutdown.child_token();
        let (state_tx, state_rx) = watch::channel(WatchState::Registered);

        tracing::info!(
            container = %container.short(),
            pod = %tail.spec().pod.name,
            namespace = %tail.spec().pod.namespace,
            start = ?tail.spec().start,
            "starting watch"
        );

        let task = tokio::spawn(drive(
            tail,
            Watch {
                notifier: self.notifier.clone(),
                sink: Arc::clone(&self.sink),
                cancel: cancel.clone(),
                state: state_tx,
                poll_interval: self.config.poll_interval,
                predecessor,
            },
        ));

        self.watches.insert(
            container,
            WatchHandle {
                cancel,
                state: state_rx,
                task,
            },
        );
        Ok(())
    }

    fn stop(&mut self, container: &ContainerId) -> bool {
        self.prune_stopping();
        match self.watches.remove(container) {
            Some(handle) => {
                tracing::info!(container = %container.short(), "stopping watch");
                handle.cancel.cancel();
                if !handle.task.is_finished() {
                    self.stopping.insert(container.clone(), handle.task);
                }
                true
            }
            None => false,
        }
    }
}

impl Drop for Tailer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Everything a watch task needs besides its tail
struct Watch {
    notifier: FileNotifier,
    sink: Arc<dyn LogSink>,
    cancel: CancellationToken,
    state: watch::Sender<WatchState>,
    poll_interval: Duration,
    /// Task of an earlier watch on the same container that must end first
    predecessor: Option<JoinHandle<()>>,
}

/// Body of a watch task
async fn drive(mut tail: ContainerTail, ctx: Watch) {
    let Watch {
        notifier,
        sink,
        cancel,
        state,
        poll_interval,
        predecessor,
    } = ctx;
    let container = tail.spec().container.clone();

    // Already cancelled, so it ends after at most one more line
    if let Some(task) = predecessor {
        let _ = task.await;
    }

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut registration = notifier.register(tail.path().to_path_buf(), events_tx);

    while !cancel.is_cancelled() {
        registration.ensure_watching();

        pass(&mut tail, sink.as_ref(), &cancel, &state).await;

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            event = tokio::time::timeout(poll_interval, events.recv()) => match event {
                Ok(Some(FileEvent::Deleted)) => {
                    drain_before_exit(&mut tail, sink.as_ref(), &cancel).await;
                    tracing::info!(container = %container.short(), "log file deleted; watch ended");
                    break;
                }
                Ok(Some(FileEvent::Rotated)) => {
                    follow_rotation(&mut tail, sink.as_ref(), &cancel, &state).await;
                }
                Ok(Some(FileEvent::Modified)) => {}
                Ok(None) => break,
                // Poll: a removed container directory is a deletion, a path
                // that is missing or names another file is a rotation
                Err(_) => {
                    if tail.is_open() && directory_gone(&tail).await {
                        tracing::info!(container = %container.short(), "log directory gone; watch ended");
                        break;
                    }
                    follow_rotation(&mut tail, sink.as_ref(), &cancel, &state).await;
                }
            },
        }
    }

    drop(registration);
    state.send_replace(WatchState::Stopped);
}

async fn pass(
    tail: &mut ContainerTail,
    sink: &dyn LogSink,
    cancel: &CancellationToken,
    state: &watch::Sender<WatchState>,
) {
    let container = tail.spec().container.clone();

    if !tail.is_open() {
        match tail.open().await {
            Ok(()) => {
                state.send_replace(WatchState::Open);
            }
            Err(e) if e.is_transient() => {
                tracing::debug!(container = %container.short(), error = %e, "log file not ready");
                return;
            }
            Err(e) => {
                tracing::warn!(container = %container.short(), error = %e, "failed to open log file");
                return;
            }
        }
    }

    match tail.on_change(sink, cancel).await {
        Ok(stats) => {
            if *state.borrow() != WatchState::Tailing {
                state.send_replace(WatchState::Tailing);
            }
            if !stats.is_empty() {
                tracing::trace!(
                    container = %container.short(),
                    forwarded = stats.forwarded,
                    malformed = stats.malformed,
                    undelivered = stats.undelivered,
                    oversized = stats.oversized,
                    "read pass"
                );
            }
        }
        Err(e) if e.is_transient() => {
            tracing::debug!(container = %container.short(), error = %e, "log file not ready");
        }
        Err(e) => {
            tracing::warn!(container = %container.short(), error = %e, "read pass failed");
        }
    }
}

async fn follow_rotation(
    tail: &mut ContainerTail,
    sink: &dyn LogSink,
    cancel: &CancellationToken,
    state: &watch::Sender<WatchState>,
) {
    match tail.follow_rotation(sink, cancel).await {
        Ok(true) => {
            state.send_replace(WatchState::Registered);
        }
        Ok(false) => {}
        Err(e) => {
            state.send_replace(WatchState::Registered);
            tracing::warn!(
                container = %tail.spec().container.short(),
                error = %e,
                "failed to read rotated log file"
            );
        }
    }
}

/// Forward lines written before the unlink
async fn drain_before_exit(tail: &mut ContainerTail, sink: &dyn LogSink, cancel: &CancellationToken) {
    if tail.is_open() {
        if let Err(e) = tail.on_change(sink, cancel).await {
            tracing::debug!(container = %tail.spec().container.short(), error = %e, "final read failed");
        }
    }
}

async fn directory_gone(tail: &ContainerTail) -> bool {
    match tail.path().parent() {
        Some(dir) => matches!(tokio::fs::try_exists(dir).await, Ok(false)),
        None => false,
    }
}
