use std::io::{self, BufWriter, Write};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use podtail_types::EnrichedRecord;

use crate::error::SinkError;

/// Destination for enriched records
///
/// Delivery is best-effort: failures are returned to the caller and never
/// retried here.
pub trait LogSink: Send + Sync {
    fn send(&self, record: EnrichedRecord) -> Result<(), SinkError>;

    /// Push out anything buffered; called after each read pass
    fn flush(&self) {}
}

/// Writes one JSON document per record
///
/// Output is buffered and written out on `flush`, once per read pass
/// rather than once per record.
pub struct JsonLinesSink<W: Write> {
    writer: Mutex<BufWriter<W>>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl JsonLinesSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> LogSink for JsonLinesSink<W> {
    fn send(&self, record: EnrichedRecord) -> Result<(), SinkError> {
        let line = serde_json::to_vec(&record)?;
        let mut writer = self.writer.lock();
        writer.write_all(&line)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&self) {
        if let Err(e) = self.writer.lock().flush() {
            tracing::warn!(error = %e, "failed to flush log output");
        }
    }
}

/// Forwards records into a channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EnrichedRecord>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EnrichedRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LogSink for ChannelSink {
    fn send(&self, record: EnrichedRecord) -> Result<(), SinkError> {
        self.tx.send(record).map_err(|_| SinkError::Closed)
    }
}
