use std::collections::{HashMap, HashSet};

use podtail_logs::WatchControl;
use podtail_types::{
    Cohort, ContainerId, EventKind, PodEvent, PodId, PodIdentity, PodSnapshot, WatchSpec,
};

use crate::cohort::CohortClassifier;
use crate::error::ReconcileError;

/// What the reconciler knows about one pod
#[derive(Clone, Debug)]
pub struct PodRecord {
    pub identity: PodIdentity,
    pub cohort: Cohort,
    /// Containers with a watch, equal to the last non-empty reported set
    pub watched: HashSet<ContainerId>,
}

/// Keeps container watches in line with the observed pods
///
/// The reported container ids, not the event kind, decide what is started
/// and stopped, so replaying a snapshot is harmless.
pub struct Reconciler<W> {
    watcher: W,
    classifier: CohortClassifier,
    pods: HashMap<PodId, PodRecord>,
}

impl<W: WatchControl> Reconciler<W> {
    pub fn new(watcher: W) -> Self {
        Self {
            watcher,
            classifier: CohortClassifier::new(),
            pods: HashMap::new(),
        }
    }

    /// Create or update the record for a pod and start/stop watches to match
    /// its reported containers. A snapshot without container ids changes nothing.
    pub fn observe_snapshot(&mut self, snapshot: &PodSnapshot) {
        let uid = &snapshot.identity.uid;
        if !self.pods.contains_key(uid) {
            let cohort = self.classifier.classify(uid);
            tracing::debug!(
                pod = %snapshot.identity.name,
                namespace = %snapshot.identity.namespace,
                uid = %uid,
                ?cohort,
                "tracking pod"
            );
            self.pods.insert(
                uid.clone(),
                PodRecord {
                    identity: snapshot.identity.clone(),
                    cohort,
                    watched: HashSet::new(),
                },
            );
        }
        let Some(record) = self.pods.get_mut(uid) else {
            return;
        };

        let reported = snapshot.reported_ids();
        if reported.is_empty() {
            return;
        }

        let mut to_stop: Vec<_> = record.watched.difference(&reported).cloned().collect();
        let mut to_start: Vec<_> = reported.difference(&record.watched).cloned().collect();
        to_stop.sort();
        to_start.sort();

        for container in &to_stop {
            self.watcher.stop(container);
        }
        for container in &to_start {
            let spec = WatchSpec::from_snapshot(snapshot, container, record.cohort);
            if let Err(e) = self.watcher.start(spec) {
                tracing::error!(
                    pod = %record.identity.name,
                    container = %container.short(),
                    error = %e,
                    "failed to start watch"
                );
            }
        }

        if !to_stop.is_empty() || !to_start.is_empty() {
            tracing::debug!(
                pod = %record.identity.name,
                started = to_start.len(),
                stopped = to_stop.len(),
                "reconciled containers"
            );
        }
        record.watched = reported;
    }

    /// Stop every watch of a pod and forget it
    pub fn observe_removal(&mut self, pod: &PodId) -> Result<(), ReconcileError> {
        let record = self
            .pods
            .remove(pod)
            .ok_or_else(|| ReconcileError::UnknownPod(pod.clone()))?;

        for container in &record.watched {
            self.watcher.stop(container);
        }
        tracing::debug!(
            pod = %record.identity.name,
            namespace = %record.identity.namespace,
            stopped = record.watched.len(),
            "pod removed"
        );
        Ok(())
    }

    pub fn observe_event(&mut self, event: PodEvent) -> Result<(), ReconcileError> {
        match event {
            PodEvent::Added(pod) | PodEvent::Modified(pod) => {
                self.observe_snapshot(&pod);
                Ok(())
            }
            PodEvent::Deleted(pod) => self.observe_removal(&pod.identity.uid),
        }
    }

    /// Dispatch an event whose kind arrives as text
    pub fn observe_raw_event(&mut self, kind: &str, pod: PodSnapshot) -> Result<(), ReconcileError> {
        let kind: EventKind = kind.parse()?;
        self.observe_event(PodEvent::new(kind, pod))
    }

    /// Pods observed from now on belong to the new cohort
    pub fn finish_initial_listing(&mut self) {
        self.classifier.seal();
    }

    pub fn is_listing(&self) -> bool {
        !self.classifier.is_sealed()
    }

    /// Apply a fresh full listing: pods missing from it are removed, every
    /// listed pod is observed
    pub fn resync(&mut self, pods: &[PodSnapshot]) -> Result<(), ReconcileError> {
        let listed: HashSet<&PodId> = pods.iter().map(|p| &p.identity.uid).collect();
        let gone: Vec<PodId> = self
            .pods
            .keys()
            .filter(|uid| !listed.contains(uid))
            .cloned()
            .collect();

        for uid in &gone {
            self.observe_removal(uid)?;
        }
        for pod in pods {
            self.observe_snapshot(pod);
        }

        tracing::info!(
            pods = self.pods.len(),
            removed = gone.len(),
            watches = self.watched_count(),
            "resynced pod table"
        );
        Ok(())
    }

    pub fn pod(&self, uid: &PodId) -> Option<&PodRecord> {
        self.pods.get(uid)
    }

    pub fn pod_count(&self) -> usize {
        self.pods.len()
    }

    /// Containers the reconciler believes are watched
    pub fn watched_count(&self) -> usize {
        self.pods.values().map(|p| p.watched.len()).sum()
    }

    pub fn watcher(&self) -> &W {
        &self.watcher
    }

    pub fn watcher_mut(&mut self) -> &mut W {
        &mut self.watcher
    }

    pub fn into_watcher(self) -> W {
        self.watcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Command, RecordingWatcher, cid, event, snapshot};
    use podtail_types::StartPosition;
    use proptest::prelude::*;

    fn reconciler() -> Reconciler<RecordingWatcher> {
        let mut reconciler = Reconciler::new(RecordingWatcher::default());
        reconciler.finish_initial_listing();
        reconciler
    }

    #[test]
    fn test_lifecycle_scenario() {
        let mut r = reconciler();
        let begin = StartPosition::Beginning;

        r.observe_event(event(EventKind::Added, "u1", &["c1"])).unwrap();
        assert_eq!(r.watcher_mut().take(), vec![Command::Start(cid("c1"), begin)]);

        r.observe_event(event(EventKind::Modified, "u1", &["c1", "c2"])).unwrap();
        assert_eq!(r.watcher_mut().take(), vec![Command::Start(cid("c2"), begin)]);

        r.observe_event(event(EventKind::Modified, "u1", &["c2"])).unwrap();
        assert_eq!(r.watcher_mut().take(), vec![Command::Stop(cid("c1"))]);

        r.observe_event(event(EventKind::Deleted, "u1", &["c2"])).unwrap();
        assert_eq!(r.watcher_mut().take(), vec![Command::Stop(cid("c2"))]);

        assert!(r.watcher().live.is_empty());
        assert_eq!(r.pod_count(), 0);
    }

    #[test]
    fn test_same_snapshot_twice_is_idempotent() {
        let mut r = reconciler();
        let snap = snapshot("u1", &["c1", "c2"]);

        r.observe_snapshot(&snap);
        assert_eq!(r.watcher_mut().take().len(), 2);
        r.observe_snapshot(&snap);
        assert!(r.watcher_mut().take().is_empty());
    }

    #[test]
    fn test_runtime_prefix_is_normalized() {
        let mut r = reconciler();
        r.observe_snapshot(&snapshot("u1", &["docker://abc"]));
        r.observe_snapshot(&snapshot("u1", &["containerd://abc"]));

        assert_eq!(
            r.watcher_mut().take(),
            vec![Command::Start(cid("abc"), StartPosition::Beginning)]
        );
    }

    #[test]
    fn test_empty_snapshot_is_noop() {
        let mut r = reconciler();
        r.observe_snapshot(&snapshot("u1", &[]));
        assert!(r.watcher().commands.is_empty());
        assert!(r.pod(&PodId::new("u1")).is_some());

        r.observe_snapshot(&snapshot("u1", &["c1"]));
        r.observe_snapshot(&snapshot("u1", &[]));
        assert_eq!(r.watcher_mut().take().len(), 1);
        assert_eq!(r.watched_count(), 1);
    }

    #[test]
    fn test_cohort_fixed_at_first_observation() {
        let mut r = Reconciler::new(RecordingWatcher::default());
        r.observe_snapshot(&snapshot("old", &[]));
        r.finish_initial_listing();
        assert!(!r.is_listing());

        // The first container appears after the listing, the cohort does not move
        r.observe_snapshot(&snapshot("old", &["c1"]));
        r.observe_snapshot(&snapshot("new", &["c2"]));

        assert_eq!(r.pod(&PodId::new("old")).unwrap().cohort, Cohort::PreExisting);
        assert_eq!(r.pod(&PodId::new("new")).unwrap().cohort, Cohort::New);
        assert_eq!(
            r.watcher_mut().take(),
            vec![
                Command::Start(cid("c1"), StartPosition::End),
                Command::Start(cid("c2"), StartPosition::Beginning),
            ]
        );
    }

    #[test]
    fn test_unknown_removal_fails() {
        let mut r = reconciler();
        let err = r.observe_removal(&PodId::new("ghost")).unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownPod(uid) if uid.as_str() == "ghost"));
    }

    #[test]
    fn test_unsupported_event_kind_fails() {
        let mut r = reconciler();
        let err = r.observe_raw_event("BOOKMARK", snapshot("u1", &["c1"])).unwrap_err();
        assert!(matches!(err, ReconcileError::UnsupportedEvent(e) if e.0 == "BOOKMARK"));
        assert!(r.watcher().commands.is_empty());

        r.observe_raw_event("ADDED", snapshot("u1", &["c1"])).unwrap();
        assert_eq!(r.watched_count(), 1);
    }

    #[test]
    fn test_resync_removes_missing_pods() {
        let mut r = Reconciler::new(RecordingWatcher::default());
        r.observe_snapshot(&snapshot("u1", &["c1"]));
        r.observe_snapshot(&snapshot("u2", &["c2"]));
        r.finish_initial_listing();
        r.watcher_mut().take();

        r.resync(&[snapshot("u2", &["c2", "c3"]), snapshot("u3", &["c4"])]).unwrap();

        let commands = r.watcher_mut().take();
        assert!(commands.contains(&Command::Stop(cid("c1"))));
        assert!(commands.contains(&Command::Start(cid("c3"), StartPosition::End)));
        assert!(commands.contains(&Command::Start(cid("c4"), StartPosition::Beginning)));
        assert_eq!(commands.len(), 3);
        assert!(r.pod(&PodId::new("u1")).is_none());
    }

    #[derive(Clone, Debug)]
    enum Op {
        Snapshot(usize, Vec<usize>),
        Remove(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0..3usize, proptest::collection::vec(0..4usize, 0..4)).prop_map(|(p, c)| Op::Snapshot(p, c)),
            1 => (0..3usize).prop_map(Op::Remove),
        ]
    }

    fn pod_snapshot(pod: usize, containers: &[usize]) -> PodSnapshot {
        let ids: Vec<String> = containers.iter().map(|c| format!("docker://p{pod}-c{c}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        snapshot(&format!("u{pod}"), &refs)
    }

    proptest! {
        #[test]
        fn prop_watches_converge_and_stay_unique(
            ops in proptest::collection::vec(op(), 1..40),
            listing_len in 0..10usize,
        ) {
            let mut r = Reconciler::new(RecordingWatcher::default());
            let mut cohorts: HashMap<PodId, Cohort> = HashMap::new();

            for (i, op) in ops.iter().enumerate() {
                if i == listing_len {
                    r.finish_initial_listing();
                }
                match op {
                    Op::Snapshot(pod, containers) => {
                        let snap = pod_snapshot(*pod, containers);
                        let before = r.pod(&snap.identity.uid).map(|p| p.watched.clone());
                        r.observe_snapshot(&snap);

                        let record = r.pod(&snap.identity.uid).unwrap();
                        let reported = snap.reported_ids();
                        if reported.is_empty() {
                            prop_assert_eq!(Some(record.watched.clone()), before.or(Some(HashSet::new())));
                        } else {
                            prop_assert_eq!(&record.watched, &reported);
                        }

                        let cohort = *cohorts.entry(snap.identity.uid.clone()).or_insert(record.cohort);
                        prop_assert_eq!(cohort, record.cohort);
                    }
                    Op::Remove(pod) => {
                        let uid = PodId::new(format!("u{pod}"));
                        let known = r.pod(&uid).is_some();
                        prop_assert_eq!(r.observe_removal(&uid).is_ok(), known);
                    }
                }

                prop_assert_eq!(r.watcher().duplicates, 0);
                prop_assert_eq!(r.watcher().live.len(), r.watched_count());
            }
        }

        #[test]
        fn prop_repeated_snapshot_issues_no_commands(containers in proptest::collection::vec(0..6usize, 0..6)) {
            let mut r = Reconciler::new(RecordingWatcher::default());
            let snap = pod_snapshot(0, &containers);
            r.observe_snapshot(&snap);
            r.watcher_mut().take();
            r.observe_snapshot(&snap);
            prop_assert!(r.watcher().commands.is_empty());
        }
    }
}
