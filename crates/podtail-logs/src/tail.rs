use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use podtail_types::{ContainerId, StartPosition, WatchSpec};

use crate::enrich::Enricher;
use crate::error::TailError;
use crate::parser::LogParser;
use crate::sink::LogSink;

const READ_CHUNK: usize = 64 * 1024;

/// Longest partial line kept while waiting for its newline
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Location of a container's json-file log
pub fn log_path(containers_dir: &Path, container: &ContainerId) -> PathBuf {
    containers_dir
        .join(container.as_str())
        .join(format!("{}-json.log", container))
}

/// Outcome of one read pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassStats {
    pub forwarded: usize,
    pub malformed: usize,
    pub undelivered: usize,
    /// Partial lines dropped for exceeding the line limit
    pub oversized: usize,
}

impl PassStats {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Incremental reader for one container log file
///
/// The file is opened lazily and the start position is applied exactly once,
/// on first open. Bytes after the last newline are kept until the line is
/// completed by a later write. After a rotation the replacement file is read
/// from its beginning.
pub struct ContainerTail {
    spec: WatchSpec,
    path: PathBuf,
    enricher: Arc<Enricher>,
    start: StartPosition,
    file: Option<File>,
    identity: Option<FileIdentity>,
    position: u64,
    pending: Vec<u8>,
    max_line: usize,
    discarding: bool,
}

impl ContainerTail {
    pub fn new(spec: WatchSpec, path: PathBuf, enricher: Arc<Enricher>) -> Self {
        Self {
            start: spec.start,
            spec,
            path,
            enricher,
            file: None,
            identity: None,
            position: 0,
            pending: Vec::new(),
            max_line: MAX_LINE_BYTES,
            discarding: false,
        }
    }

    pub fn with_max_line(mut self, bytes: usize) -> Self {
        self.max_line = bytes;
        self
    }

    pub fn spec(&self) -> &WatchSpec {
        &self.spec
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Byte offset of the next read
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Open the file and apply the start position; no-op once open
    pub async fn open(&mut self) -> Result<(), TailError> {
        if self.file.is_some() {
            return Ok(());
        }

        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TailError::FileNotFound(self.path.clone()));
            }
            Err(e) => return Err(TailError::io(&self.path, e)),
        };

        self.position = match self.start {
            StartPosition::Beginning => 0,
            StartPosition::End => file
                .seek(SeekFrom::End(0))
                .await
                .map_err(|e| TailError::io(&self.path, e))?,
        };
        self.identity = file
            .metadata()
            .await
            .map_err(|e| TailError::io(&self.path, e))
            .map(|meta| identity(&meta))?;

        tracing::debug!(
            container = %self.spec.container.short(),
            path = %self.path.display(),
            position = self.position,
            "opened log file"
        );
        self.file = Some(file);
        Ok(())
    }

    /// Handle a change notification: read what is available and forward
    /// every complete line
    ///
    /// Lines are forwarded chunk by chunk. Once `cancel` fires no further
    /// chunk is read and no further line is forwarded.
    pub async fn on_change(
        &mut self,
        sink: &dyn LogSink,
        cancel: &CancellationToken,
    ) -> Result<PassStats, TailError> {
        self.open().await?;
        self.rewind_if_truncated().await?;

        let mut stats = PassStats::default();
        let mut chunk = vec![0u8; READ_CHUNK];
        while !cancel.is_cancelled() {
            let Some(file) = self.file.as_mut() else {
                break;
            };
            let n = file
                .read(&mut chunk)
                .await
                .map_err(|e| TailError::io(&self.path, e))?;
            if n == 0 {
                break;
            }
            self.position += n as u64;
            self.buffer(&chunk[..n]);
            self.forward_complete_lines(sink, cancel, &mut stats);
            self.drop_oversized(&mut stats);
        }

        if stats.forwarded > 0 {
            sink.flush();
        }
        Ok(stats)
    }

    /// Whether the path no longer names the open file
    pub async fn is_replaced(&self) -> bool {
        if self.file.is_none() {
            return false;
        }
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => match (self.identity, identity(&meta)) {
                (Some(opened), Some(current)) => opened != current,
                _ => false,
            },
            Err(e) => e.kind() == io::ErrorKind::NotFound,
        }
    }

    /// Follow a rename-away rotation
    ///
    /// When the open file was replaced, whatever was written to it before
    /// the rename is forwarded, then the handle is dropped so the next pass
    /// opens the new file from its beginning. Returns whether a rotation
    /// was followed.
    pub async fn follow_rotation(
        &mut self,
        sink: &dyn LogSink,
        cancel: &CancellationToken,
    ) -> Result<bool, TailError> {
        if !self.is_replaced().await {
            return Ok(false);
        }

        let drained = self.on_change(sink, cancel).await;
        tracing::info!(
            container = %self.spec.container.short(),
            path = %self.path.display(),
            position = self.position,
            "log file rotated; reopening"
        );
        self.reset();
        drained.map(|_| true)
    }

    fn reset(&mut self) {
        self.file = None;
        self.identity = None;
        self.position = 0;
        self.pending.clear();
        self.discarding = false;
        self.start = StartPosition::Beginning;
    }

    /// Copy-truncate rotation leaves the file shorter than our position
    async fn rewind_if_truncated(&mut self) -> Result<(), TailError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let len = file
            .metadata()
            .await
            .map_err(|e| TailError::io(&self.path, e))?
            .len();
        if len >= self.position {
            return Ok(());
        }

        tracing::warn!(
            container = %self.spec.container.short(),
            path = %self.path.display(),
            position = self.position,
            len,
            "log file truncated; rewinding"
        );
        file.seek(SeekFrom::Start(0))
            .await
            .map_err(|e| TailError::io(&self.path, e))?;
        self.position = 0;
        self.pending.clear();
        self.discarding = false;
        Ok(())
    }

    fn buffer(&mut self, bytes: &[u8]) {
        let bytes = if self.discarding {
            // Skip the rest of a line that was already dropped
            match bytes.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    self.discarding = false;
                    &bytes[end + 1..]
                }
                None => return,
            }
        } else {
            bytes
        };
        self.pending.extend_from_slice(bytes);
    }

    fn drop_oversized(&mut self, stats: &mut PassStats) {
        if self.pending.len() <= self.max_line {
            return;
        }
        tracing::warn!(
            container = %self.spec.container.short(),
            pod = %self.spec.pod.name,
            len = self.pending.len(),
            limit = self.max_line,
            "dropping oversized log line"
        );
        self.pending.clear();
        self.discarding = true;
        stats.oversized += 1;
    }

    fn forward_complete_lines(
        &mut self,
        sink: &dyn LogSink,
        cancel: &CancellationToken,
        stats: &mut PassStats,
    ) {
        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return;
        };
        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();

        for line in complete.split(|b| *b == b'\n') {
            if cancel.is_cancelled() {
                return;
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let record = match LogParser::parse(line, &self.spec.pod.uid, &self.spec.container) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(
                        container = %self.spec.container.short(),
                        pod = %self.spec.pod.name,
                        error = %e,
                        "skipping malformed log line"
                    );
                    stats.malformed += 1;
                    continue;
                }
            };

            match sink.send(self.enricher.enrich(record, &self.spec)) {
                Ok(()) => stats.forwarded += 1,
                Err(e) => {
                    tracing::warn!(
                        container = %self.spec.container.short(),
                        pod = %self.spec.pod.name,
                        error = %e,
                        "failed to deliver log record"
                    );
                    stats.undelivered += 1;
                }
            }
        }
    }
}

type FileIdentity = (u64, u64);

#[cfg(unix)]
fn identity(meta: &std::fs::Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn identity(_meta: &std::fs::Metadata) -> Option<FileIdentity> {
    None
}
