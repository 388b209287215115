//! Container log tailing for podtail
//!
//! This crate provides the json-file log parser, metadata enrichment, sinks,
//! the per-container tail and the `Tailer` that owns one task per watched
//! container.

mod enrich;
mod error;
mod notifier;
mod parser;
mod sink;
mod tail;
mod tailer;

pub use enrich::Enricher;
pub use error::{MalformedRecord, SinkError, TailError};
pub use notifier::{FileEvent, FileNotifier, Registration};
pub use parser::LogParser;
pub use sink::{ChannelSink, JsonLinesSink, LogSink};
pub use tail::{ContainerTail, MAX_LINE_BYTES, PassStats, log_path};
pub use tailer::{DeadWatchPolicy, Tailer, TailerConfig, WatchControl, WatchState};

// Re-export types used in our public API
pub use podtail_types::{ContainerId, EnrichedRecord, LogLevel, LogRecord, WatchSpec};
