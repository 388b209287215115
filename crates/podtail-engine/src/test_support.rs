use std::collections::HashMap;

use podtail_logs::{TailError, WatchControl};
use podtail_types::{
    ContainerId, ContainerStatus, EventKind, PodEvent, PodId, PodIdentity, PodSnapshot,
    StartPosition, WatchSpec,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start(ContainerId, StartPosition),
    Stop(ContainerId),
}

/// Watch control that records commands and enforces one watch per container
#[derive(Debug, Default)]
pub struct RecordingWatcher {
    pub commands: Vec<Command>,
    pub live: HashMap<ContainerId, StartPosition>,
    pub duplicates: usize,
}

impl RecordingWatcher {
    pub fn take(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }
}

impl WatchControl for RecordingWatcher {
    fn start(&mut self, spec: WatchSpec) -> Result<(), TailError> {
        if self.live.contains_key(&spec.container) {
            self.duplicates += 1;
            return Err(TailError::DuplicateWatch(spec.container));
        }
        self.live.insert(spec.container.clone(), spec.start);
        self.commands.push(Command::Start(spec.container, spec.start));
        Ok(())
    }

    fn stop(&mut self, container: &ContainerId) -> bool {
        self.commands.push(Command::Stop(container.clone()));
        self.live.remove(container).is_some()
    }
}

pub fn cid(id: &str) -> ContainerId {
    ContainerId::normalize(id)
}

pub fn snapshot(uid: &str, ids: &[&str]) -> PodSnapshot {
    let identity = PodIdentity::new(PodId::new(uid), format!("pod-{uid}"), "default".into());
    let mut snap = PodSnapshot::new(identity);
    for (i, id) in ids.iter().enumerate() {
        let mut status = ContainerStatus::new(format!("c{i}"));
        status.id = Some(ContainerId::normalize(id));
        snap.containers.push(status);
    }
    snap
}

pub fn event(kind: EventKind, uid: &str, ids: &[&str]) -> PodEvent {
    PodEvent::new(kind, snapshot(uid, ids))
}
