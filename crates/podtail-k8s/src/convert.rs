use k8s_openapi::api::core::v1::Pod;

use podtail_types::{ContainerId, ContainerStatus, PodId, PodIdentity, PodSnapshot};

/// Convert a k8s Pod to a snapshot
///
/// Returns `None` for pods without a uid, which cannot be tracked.
pub fn snapshot_from_pod(pod: &Pod) -> Option<PodSnapshot> {
    let uid = pod.metadata.uid.clone()?;
    let name = pod.metadata.name.clone().unwrap_or_default();
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();

    let mut identity = PodIdentity::new(PodId::new(uid), name, namespace);
    identity.node = pod.spec.as_ref().and_then(|s| s.node_name.clone());

    let mut snapshot = PodSnapshot::new(identity);

    if let Some(labels) = &pod.metadata.labels {
        snapshot.labels = labels.clone();
    }

    if let Some(status) = &pod.status {
        let init = status.init_container_statuses.iter().flatten();
        let main = status.container_statuses.iter().flatten();
        snapshot.containers = init
            .chain(main)
            .map(|cs| {
                let mut container = ContainerStatus::new(cs.name.clone());
                container.id = cs
                    .container_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .map(ContainerId::normalize);
                container.image = cs.image.clone();
                container.restart_count = cs.restart_count;
                container
            })
            .collect();
    }

    Some(snapshot)
}
