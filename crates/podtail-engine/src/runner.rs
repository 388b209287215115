use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use podtail_logs::WatchControl;
use podtail_types::{PodListing, PodSource};

use crate::bridge::EventBridge;
use crate::error::EngineError;
use crate::reconciler::Reconciler;

/// Drive the reconciler from a pod source until shutdown
///
/// Lists once, then follows the watch. Whenever the watch ends the pods are
/// listed again and the table resynced before watching resumes. Source,
/// bridge and reconcile errors end the loop; cancellation returns `Ok`.
pub async fn run<S, W>(
    source: Arc<S>,
    reconciler: &mut Reconciler<W>,
    shutdown: CancellationToken,
) -> Result<(), EngineError>
where
    S: PodSource,
    W: WatchControl,
{
    let listing = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return Ok(()),
        listing = list(&source) => listing?,
    };

    for pod in &listing.pods {
        reconciler.observe_snapshot(pod);
    }
    reconciler.finish_initial_listing();
    tracing::info!(
        pods = reconciler.pod_count(),
        watches = reconciler.watched_count(),
        "initial listing applied"
    );

    let mut resource_version = listing.resource_version;
    loop {
        let events = {
            let source = Arc::clone(&source);
            let version = resource_version.clone();
            tokio::task::spawn_blocking(move || source.watch(&version)).await??
        };
        tracing::debug!(resource_version = %resource_version, "watching pods");

        let mut bridge = EventBridge::wrap(events);
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                next = bridge.next() => next,
            };
            match next {
                None => break,
                Some(pulled) => {
                    let event = pulled??;
                    tracing::trace!(
                        kind = event.kind().as_str(),
                        pod = %event.pod().identity.name,
                        "pod event"
                    );
                    reconciler.observe_event(event)?;
                }
            }
        }

        tracing::debug!("pod watch ended; relisting");
        let listing = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            listing = list(&source) => listing?,
        };
        reconciler.resync(&listing.pods)?;
        resource_version = listing.resource_version;
    }
}

async fn list<S: PodSource>(source: &Arc<S>) -> Result<PodListing, EngineError> {
    let source = Arc::clone(source);
    Ok(tokio::task::spawn_blocking(move || source.list()).await??)
}
