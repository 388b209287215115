use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use podtail_types::{ContainerId, LogLevel, LogRecord, PodId};

use crate::error::MalformedRecord;

/// One line of a docker json-file log
#[derive(Deserialize)]
struct JsonFileLine {
    log: String,
    #[serde(default)]
    stream: String,
    time: DateTime<Utc>,
}

/// Parser for container log lines
pub struct LogParser;

impl LogParser {
    /// Parse one complete json-file line (without its terminator) into a LogRecord
    pub fn parse(line: &[u8], pod: &PodId, container: &ContainerId) -> Result<LogRecord, MalformedRecord> {
        let parsed: JsonFileLine = serde_json::from_slice(line).map_err(|source| MalformedRecord {
            len: line.len(),
            source,
        })?;

        // The runtime keeps the application's own newline in `log`
        let message = parsed.log.strip_suffix('\n').unwrap_or(&parsed.log);
        let message = message.strip_suffix('\r').unwrap_or(message).to_string();

        Ok(LogRecord {
            message,
            stream: parsed.stream,
            timestamp: parsed.time,
            pod: pod.clone(),
            container: container.clone(),
        })
    }

    /// Detect the severity of a message, from JSON fields if the application
    /// logs JSON, otherwise from textual markers
    pub fn detect_level(message: &str) -> LogLevel {
        let trimmed = message.trim();
        if trimmed.starts_with('{') {
            if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(trimmed) {
                return Self::extract_level_from_json(&fields);
            }
        }
        Self::extract_level_from_text(trimmed)
    }

    /// Extract log level from JSON fields
    fn extract_level_from_json(fields: &Map<String, Value>) -> LogLevel {
        // Common field names for log level
        let level_fields = [
            "level",
            "lvl",
            "severity",
            "log.level",
            "loglevel",
            "log_level",
            "Level",
            "LEVEL",
        ];

        for field in level_fields {
            match fields.get(field) {
                Some(Value::String(s)) => return LogLevel::from_label(s),
                // Some loggers (pino, bunyan) use numeric levels
                Some(Value::Number(n)) => {
                    if let Some(num) = n.as_u64() {
                        return match num {
                            0..=10 => LogLevel::Trace,
                            11..=20 => LogLevel::Debug,
                            21..=30 => LogLevel::Info,
                            31..=40 => LogLevel::Warn,
                            41..=50 => LogLevel::Error,
                            _ => LogLevel::Fatal,
                        };
                    }
                }
                _ => {}
            }
        }

        LogLevel::Unknown
    }

    /// Extract log level from plain text patterns
    fn extract_level_from_text(content: &str) -> LogLevel {
        let upper = content.to_uppercase();

        let markers = [
            ("FATAL", LogLevel::Fatal),
            ("PANIC", LogLevel::Fatal),
            ("CRITICAL", LogLevel::Fatal),
            ("ERROR", LogLevel::Error),
            ("ERR", LogLevel::Error),
            ("WARNING", LogLevel::Warn),
            ("WARN", LogLevel::Warn),
            ("INFO", LogLevel::Info),
            ("DEBUG", LogLevel::Debug),
            ("TRACE", LogLevel::Trace),
        ];

        // Bracketed [ERROR], then ERROR:, then " ERROR "
        for (marker, level) in markers {
            if upper.contains(&format!("[{marker}]")) {
                return level;
            }
        }
        for (marker, level) in markers {
            if upper.contains(&format!("{marker}:")) {
                return level;
            }
        }
        for (marker, level) in markers {
            if upper.contains(&format!(" {marker} ")) {
                return level;
            }
        }

        // Level at start of line
        for (marker, level) in markers {
            if upper.starts_with(marker) {
                return level;
            }
        }

        LogLevel::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (PodId, ContainerId) {
        (PodId::new("u1"), ContainerId::normalize("docker://c1"))
    }

    #[test]
    fn test_parse_json_file_line() {
        let (pod, container) = ids();
        let line = br#"{"log":"hello world\n","stream":"stdout","time":"2024-01-15T10:30:00.123456789Z"}"#;
        let record = LogParser::parse(line, &pod, &container).unwrap();
        assert_eq!(record.message, "hello world");
        assert_eq!(record.stream, "stdout");
        assert_eq!(record.container, container);
        assert_eq!(
            record.timestamp,
            DateTime::parse_from_rfc3339("2024-01-15T10:30:00.123456789Z")
                .unwrap()
                .with_timezone(&Utc)
        );
    }

    #[test]
    fn test_parse_keeps_message_without_newline() {
        let (pod, container) = ids();
        let line = br#"{"log":"partial write","stream":"stderr","time":"2024-01-15T10:30:00Z"}"#;
        let record = LogParser::parse(line, &pod, &container).unwrap();
        assert_eq!(record.message, "partial write");
        assert_eq!(record.stream, "stderr");
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let (pod, container) = ids();
        let err = LogParser::parse(b"not json at all", &pod, &container).unwrap_err();
        assert_eq!(err.len, 15);
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let (pod, container) = ids();
        assert!(LogParser::parse(br#"{"stream":"stdout"}"#, &pod, &container).is_err());
    }

    #[test]
    fn test_detect_level_json() {
        assert_eq!(
            LogParser::detect_level(r#"{"level":"error","msg":"something failed"}"#),
            LogLevel::Error
        );
        assert_eq!(LogParser::detect_level(r#"{"level":40,"msg":"slow"}"#), LogLevel::Warn);
        assert_eq!(LogParser::detect_level(r#"{"msg":"no level"}"#), LogLevel::Unknown);
    }

    #[test]
    fn test_detect_level_text() {
        assert_eq!(LogParser::detect_level("[ERROR] something went wrong"), LogLevel::Error);
        assert_eq!(LogParser::detect_level("WARNING: disk almost full"), LogLevel::Warn);
        assert_eq!(LogParser::detect_level("2024-01-15 INFO started"), LogLevel::Info);
        assert_eq!(LogParser::detect_level("debug mode on"), LogLevel::Debug);
    }

    #[test]
    fn test_detect_level_multibyte_no_panic() {
        let line = "─────────────────────────────────────────";
        assert_eq!(LogParser::detect_level(line), LogLevel::Unknown);
    }
}
