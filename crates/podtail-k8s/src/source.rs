use futures::StreamExt;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::{ListParams, WatchEvent, WatchParams};
use tokio::runtime::Handle;

use podtail_types::{EventKind, PodEvent, PodListing, PodSource, SourceError, UnsupportedEvent};

use crate::convert::snapshot_from_pod;

/// Server-side watch timeout; the API server caps it just below 300s
const WATCH_TIMEOUT_SECS: u32 = 290;

/// Pod source for all pods scheduled to one node
///
/// Calls block on the runtime handle captured at construction, so they must
/// run on a blocking worker, never on a runtime thread.
pub struct KubePodSource {
    api: Api<Pod>,
    node_name: String,
    handle: Handle,
}

impl KubePodSource {
    /// Must be called from within a tokio runtime
    pub fn new(client: kube::Client, node_name: impl Into<String>) -> Self {
        Self {
            api: Api::all(client),
            node_name: node_name.into(),
            handle: Handle::current(),
        }
    }

    fn node_selector(&self) -> String {
        format!("spec.nodeName={}", self.node_name)
    }
}

impl PodSource for KubePodSource {
    type Events = PodEventIter;

    fn list(&self) -> Result<PodListing, SourceError> {
        let params = ListParams::default().fields(&self.node_selector());
        let list = self
            .handle
            .block_on(self.api.list(&params))
            .map_err(|e| SourceError::Api(Box::new(e)))?;

        let resource_version = list.metadata.resource_version.unwrap_or_default();
        let pods = list
            .items
            .iter()
            .filter_map(|pod| {
                let snapshot = snapshot_from_pod(pod);
                if snapshot.is_none() {
                    tracing::debug!(pod = ?pod.metadata.name, "skipping pod without uid");
                }
                snapshot
            })
            .collect::<Vec<_>>();

        tracing::info!(
            node = %self.node_name,
            pods = pods.len(),
            resource_version = %resource_version,
            "listed pods"
        );

        Ok(PodListing {
            pods,
            resource_version,
        })
    }

    fn watch(&self, resource_version: &str) -> Result<PodEventIter, SourceError> {
        let params = WatchParams::default()
            .fields(&self.node_selector())
            .timeout(WATCH_TIMEOUT_SECS);

        Ok(PodEventIter {
            api: self.api.clone(),
            params,
            resource_version: resource_version.to_string(),
            handle: self.handle.clone(),
            stream: None,
            done: false,
        })
    }
}

/// What a single watch event means for the iterator
enum Step {
    Emit(PodEvent),
    Skip,
    /// The resume version is too old; the caller has to relist
    Expired,
    Fail(SourceError),
}

fn step(event: WatchEvent<Pod>) -> Step {
    let (kind, pod) = match event {
        WatchEvent::Added(pod) => ("ADDED", pod),
        WatchEvent::Modified(pod) => ("MODIFIED", pod),
        WatchEvent::Deleted(pod) => ("DELETED", pod),
        WatchEvent::Bookmark(_) => return Step::Skip,
        WatchEvent::Error(status) if status.code == 410 => {
            tracing::info!(message = %status.message, "watch resource version expired");
            return Step::Expired;
        }
        WatchEvent::Error(status) => {
            tracing::error!(
                code = status.code,
                reason = %status.reason,
                message = %status.message,
                "watch returned an error event"
            );
            return Step::Fail(UnsupportedEvent("ERROR".to_string()).into());
        }
    };

    let Some(snapshot) = snapshot_from_pod(&pod) else {
        tracing::debug!(pod = ?pod.metadata.name, kind, "skipping pod without uid");
        return Step::Skip;
    };

    match kind.parse::<EventKind>() {
        Ok(kind) => Step::Emit(PodEvent::new(kind, snapshot)),
        Err(e) => Step::Fail(SourceError::UnsupportedEvent(e)),
    }
}

/// Blocking iterator over the pod watch
///
/// The watch request is sent on the first call to `next`. The iterator ends
/// when the server closes the watch or reports the version as expired, and
/// after the first error.
pub struct PodEventIter {
    api: Api<Pod>,
    params: WatchParams,
    resource_version: String,
    handle: Handle,
    stream: Option<BoxStream<'static, kube::Result<WatchEvent<Pod>>>>,
    done: bool,
}

impl Iterator for PodEventIter {
    type Item = Result<PodEvent, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.stream.is_none() {
            match self
                .handle
                .block_on(self.api.watch(&self.params, &self.resource_version))
            {
                Ok(stream) => self.stream = Some(stream.boxed()),
                Err(e) => {
                    self.done = true;
                    return Some(Err(SourceError::Api(Box::new(e))));
                }
            }
        }

        loop {
            let stream = self.stream.as_mut()?;
            match self.handle.block_on(stream.next()) {
                Some(Ok(event)) => match step(event) {
                    Step::Emit(event) => return Some(Ok(event)),
                    Step::Skip => continue,
                    Step::Expired => {
                        self.done = true;
                        return None;
                    }
                    Step::Fail(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(SourceError::Api(Box::new(e))));
                }
                None => {
                    tracing::debug!("pod watch closed by server");
                    self.done = true;
                    return None;
                }
            }
        }
    }
}
