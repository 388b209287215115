use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::TailError;

/// Notification about the watched log file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileEvent {
    Modified,
    /// The file was renamed away; a new file may take its place
    Rotated,
    Deleted,
}

type Routes = HashMap<PathBuf, mpsc::UnboundedSender<FileEvent>>;

struct Directories {
    watcher: Option<RecommendedWatcher>,
    interest: HashMap<PathBuf, usize>,
}

/// One OS watcher shared by every container watch
///
/// Parent directories are watched rather than files, so a log file does not
/// need to exist at registration. Events are routed to the registration for
/// their path. If the OS watcher cannot be created every registration stays
/// unwatched and callers rely on polling.
#[derive(Clone)]
pub struct FileNotifier {
    routes: Arc<Mutex<Routes>>,
    directories: Arc<Mutex<Directories>>,
}

impl FileNotifier {
    pub fn new() -> Self {
        let routes: Arc<Mutex<Routes>> = Arc::default();

        let dispatch = Arc::clone(&routes);
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let routes = dispatch.lock();
                for path in &event.paths {
                    let Some(tx) = routes.get(path) else {
                        continue;
                    };
                    if let Some(file_event) = classify(&event, path) {
                        let _ = tx.send(file_event);
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "filesystem notification error"),
        });

        let watcher = match watcher {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "filesystem notifications unavailable; polling only");
                None
            }
        };

        Self {
            routes,
            directories: Arc::new(Mutex::new(Directories {
                watcher,
                interest: HashMap::new(),
            })),
        }
    }

    /// Route events for `path` to `tx` until the registration is dropped
    pub fn register(&self, path: PathBuf, tx: mpsc::UnboundedSender<FileEvent>) -> Registration {
        self.routes.lock().insert(path.clone(), tx.clone());
        Registration {
            notifier: self.clone(),
            path,
            tx,
            watching: false,
            failed: false,
        }
    }

    /// Number of directories currently watched with the OS
    pub fn watched_dirs(&self) -> usize {
        self.directories.lock().interest.len()
    }

    fn watch_dir(&self, dir: &Path) -> Result<bool, TailError> {
        let mut directories = self.directories.lock();
        let Directories { watcher, interest } = &mut *directories;
        let Some(watcher) = watcher.as_mut() else {
            return Ok(false);
        };

        match interest.get_mut(dir) {
            Some(count) => *count += 1,
            None => {
                watcher.watch(dir, RecursiveMode::NonRecursive)?;
                interest.insert(dir.to_path_buf(), 1);
            }
        }
        Ok(true)
    }

    fn unwatch_dir(&self, dir: &Path) {
        let mut directories = self.directories.lock();
        let Directories { watcher, interest } = &mut *directories;
        let Some(count) = interest.get_mut(dir) else {
            return;
        };

        *count -= 1;
        if *count == 0 {
            interest.remove(dir);
            // The OS drops the watch itself when the directory is removed
            if let Some(Err(e)) = watcher.as_mut().map(|w| w.unwatch(dir)) {
                tracing::debug!(dir = %dir.display(), error = %e, "unwatch failed");
            }
        }
    }
}

impl Default for FileNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Interest of one watch in one log file
pub struct Registration {
    notifier: FileNotifier,
    path: PathBuf,
    tx: mpsc::UnboundedSender<FileEvent>,
    watching: bool,
    failed: bool,
}

impl Registration {
    pub fn is_watching(&self) -> bool {
        self.watching
    }

    /// Watch the parent directory once it exists
    ///
    /// Returns whether OS notifications are active. A missing directory is
    /// not an error; the caller keeps polling and asks again later. A failed
    /// registration is logged once.
    pub fn ensure_watching(&mut self) -> bool {
        if self.watching {
            return true;
        }
        let Some(dir) = self.path.parent() else {
            return false;
        };
        if !dir.is_dir() {
            return false;
        }

        match self.notifier.watch_dir(dir) {
            Ok(watching) => {
                if watching {
                    tracing::debug!(path = %self.path.display(), "registered filesystem interest");
                }
                self.watching = watching;
            }
            Err(e) => {
                if !self.failed {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "falling back to polling"
                    );
                    self.failed = true;
                }
            }
        }
        self.watching
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        {
            let mut routes = self.notifier.routes.lock();
            if routes.get(&self.path).is_some_and(|tx| tx.same_channel(&self.tx)) {
                routes.remove(&self.path);
            }
        }
        if self.watching {
            if let Some(dir) = self.path.parent() {
                self.notifier.unwatch_dir(dir);
            }
        }
    }
}

/// Map an OS event on the parent directory to an event for our file
fn classify(event: &Event, path: &Path) -> Option<FileEvent> {
    if !event.paths.iter().any(|p| p == path) {
        return None;
    }

    match event.kind {
        EventKind::Remove(_) => Some(FileEvent::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(FileEvent::Modified),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both))
            if event.paths.first().map(PathBuf::as_path) != Some(path) =>
        {
            Some(FileEvent::Modified)
        }
        EventKind::Modify(ModifyKind::Name(_)) => Some(FileEvent::Rotated),
        EventKind::Create(_) | EventKind::Modify(_) => Some(FileEvent::Modified),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::time::Duration;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn test_classify_events_for_our_file() {
        let path = Path::new("/logs/c1/c1-json.log");
        let modify = EventKind::Modify(ModifyKind::Data(DataChange::Content));

        assert_eq!(
            classify(&event(modify, &["/logs/c1/c1-json.log"]), path),
            Some(FileEvent::Modified)
        );
        assert_eq!(
            classify(&event(EventKind::Create(CreateKind::File), &["/logs/c1/c1-json.log"]), path),
            Some(FileEvent::Modified)
        );
        assert_eq!(
            classify(&event(EventKind::Remove(RemoveKind::File), &["/logs/c1/c1-json.log"]), path),
            Some(FileEvent::Deleted)
        );
    }

    #[test]
    fn test_classify_rotation() {
        let path = Path::new("/logs/c1/c1-json.log");
        let rename_from = EventKind::Modify(ModifyKind::Name(RenameMode::From));
        let rename_both = EventKind::Modify(ModifyKind::Name(RenameMode::Both));

        assert_eq!(
            classify(&event(rename_from, &["/logs/c1/c1-json.log"]), path),
            Some(FileEvent::Rotated)
        );
        assert_eq!(
            classify(
                &event(rename_both, &["/logs/c1/c1-json.log", "/logs/c1/c1-json.log.1"]),
                path
            ),
            Some(FileEvent::Rotated)
        );
        assert_eq!(
            classify(
                &event(rename_both, &["/logs/c1/tmp", "/logs/c1/c1-json.log"]),
                path
            ),
            Some(FileEvent::Modified)
        );
    }

    #[test]
    fn test_classify_ignores_other_files() {
        let path = Path::new("/logs/c1/c1-json.log");
        let modify = EventKind::Modify(ModifyKind::Data(DataChange::Content));
        assert_eq!(classify(&event(modify, &["/logs/c1/config.v2.json"]), path), None);
    }

    #[test]
    fn test_missing_directory_defers_registration() {
        let notifier = FileNotifier::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut registration =
            notifier.register(PathBuf::from("/nonexistent/podtail/c1/c1-json.log"), tx);
        assert!(!registration.ensure_watching());
        assert!(!registration.is_watching());
        assert_eq!(notifier.watched_dirs(), 0);
    }

    #[tokio::test]
    async fn test_events_are_routed_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = FileNotifier::new();
        let ours = dir.path().join("c1-json.log");
        let theirs = dir.path().join("c2-json.log");

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let mut first = notifier.register(ours.clone(), tx1);
        let mut second = notifier.register(theirs, tx2);
        assert!(first.ensure_watching());
        assert!(second.ensure_watching());
        assert_eq!(notifier.watched_dirs(), 1);

        std::fs::write(&ours, b"x\n").unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), rx1.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, FileEvent::Modified);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx2.try_recv().is_err());

        drop(first);
        assert_eq!(notifier.watched_dirs(), 1);
        drop(second);
        assert_eq!(notifier.watched_dirs(), 0);
    }
}
