use std::collections::{BTreeMap, BTreeSet};

use podtail_types::{EnrichedRecord, LogRecord, WatchSpec};

use crate::parser::LogParser;

/// Attaches pod and container metadata to parsed records
#[derive(Clone, Debug, Default)]
pub struct Enricher {
    /// Pod labels copied onto records (empty = all)
    label_allowlist: BTreeSet<String>,
}

impl Enricher {
    pub fn new(label_allowlist: impl IntoIterator<Item = String>) -> Self {
        Self {
            label_allowlist: label_allowlist.into_iter().collect(),
        }
    }

    pub fn enrich(&self, record: LogRecord, spec: &WatchSpec) -> EnrichedRecord {
        EnrichedRecord {
            level: LogParser::detect_level(&record.message),
            timestamp: record.timestamp,
            message: record.message,
            stream: record.stream,
            node: spec.pod.node.clone(),
            namespace: spec.pod.namespace.clone(),
            pod_name: spec.pod.name.clone(),
            pod_uid: record.pod,
            container_name: spec.container_name.clone(),
            container_id: record.container,
            image: spec.image.clone(),
            restart_count: spec.restart_count,
            labels: self.select_labels(&spec.labels),
        }
    }

    fn select_labels(&self, labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        if self.label_allowlist.is_empty() {
            return labels.clone();
        }
        labels
            .iter()
            .filter(|(k, _)| self.label_allowlist.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use podtail_types::{
        Cohort, ContainerId, ContainerStatus, LogLevel, PodId, PodIdentity, PodSnapshot,
    };

    fn spec() -> WatchSpec {
        let mut identity = PodIdentity::new(PodId::new("u1"), "web-0".into(), "shop".into());
        identity.node = Some("worker-1".into());
        let mut snap = PodSnapshot::new(identity);
        snap.labels.insert("app".into(), "web".into());
        snap.labels.insert("pod-template-hash".into(), "abc".into());
        let mut status = ContainerStatus::new("app".into());
        status.id = Some(ContainerId::normalize("docker://c1"));
        status.image = "web:2".into();
        status.restart_count = 1;
        snap.containers.push(status);
        WatchSpec::from_snapshot(&snap, &ContainerId::normalize("c1"), Cohort::New)
    }

    fn record(message: &str) -> LogRecord {
        LogRecord {
            message: message.into(),
            stream: "stdout".into(),
            timestamp: Utc::now(),
            pod: PodId::new("u1"),
            container: ContainerId::normalize("c1"),
        }
    }

    #[test]
    fn test_enrich_attaches_metadata() {
        let enriched = Enricher::default().enrich(record("ERROR: boom"), &spec());
        assert_eq!(enriched.node.as_deref(), Some("worker-1"));
        assert_eq!(enriched.namespace, "shop");
        assert_eq!(enriched.pod_name, "web-0");
        assert_eq!(enriched.container_name, "app");
        assert_eq!(enriched.image, "web:2");
        assert_eq!(enriched.restart_count, 1);
        assert_eq!(enriched.level, LogLevel::Error);
        assert_eq!(enriched.labels.len(), 2);
    }

    #[test]
    fn test_label_allowlist() {
        let enricher = Enricher::new(["app".to_string()]);
        let enriched = enricher.enrich(record("hi"), &spec());
        assert_eq!(enriched.labels.len(), 1);
        assert_eq!(enriched.labels.get("app").map(String::as_str), Some("web"));
    }
}
