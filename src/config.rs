//! Agent configuration.
//!
//! Settings come from an optional TOML file, then CLI flags (and their
//! environment fallbacks) override individual values. Every section has
//! defaults, so an empty file is valid.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use podtail_logs::{DeadWatchPolicy, TailerConfig};

use crate::cli::Cli;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    /// Only pods scheduled to this node are tailed
    pub name: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TailConfig {
    pub containers_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub dead_watch_policy: DeadWatchPolicy,
    /// Labels copied onto records; empty copies all
    pub label_allowlist: Vec<String>,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            containers_dir: PathBuf::from("/var/lib/docker/containers"),
            poll_interval_ms: 1000,
            dead_watch_policy: DeadWatchPolicy::Replace,
            label_allowlist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Size of the blocking pool (pod watch plus file I/O)
    pub blocking_workers: usize,
    pub shutdown_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            blocking_workers: 4,
            shutdown_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Console,
    Json,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Console,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// JSON lines on stdout
    #[default]
    Stdout,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub tail: TailConfig,
    pub runtime: RuntimeConfig,
    pub log: LogConfig,
    pub sink: SinkConfig,
}

impl Config {
    /// Build the effective configuration from the CLI
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::read(path)?,
            None => Self::default(),
        };
        config.apply(cli);
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn apply(&mut self, cli: &Cli) {
        if let Some(node) = &cli.node {
            self.node.name = Some(node.clone());
        }
        if let Some(context) = &cli.context {
            self.node.context = Some(context.clone());
        }
        if let Some(dir) = &cli.containers_dir {
            self.tail.containers_dir = dir.clone();
        }
        if let Some(level) = &cli.log_level {
            self.log.level = level.clone();
        }
        if let Some(format) = cli.log_format {
            self.log.format = format.into();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.node.name.as_deref() {
            None => {
                return Err(ConfigError::Invalid(
                    "node name is required (--node, NODE_NAME or node.name)".to_string(),
                ));
            }
            Some(name) if name.trim().is_empty() => {
                return Err(ConfigError::Invalid("node name cannot be empty".to_string()));
            }
            Some(_) => {}
        }

        if self.tail.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tail.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        // One worker is held by the pod watch for as long as it runs
        if self.runtime.blocking_workers < 2 {
            return Err(ConfigError::Invalid(
                "runtime.blocking_workers must be at least 2".to_string(),
            ));
        }

        Ok(())
    }

    pub fn node_name(&self) -> &str {
        self.node.name.as_deref().unwrap_or_default()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.shutdown_timeout_ms)
    }

    pub fn tailer_config(&self) -> TailerConfig {
        TailerConfig {
            containers_dir: self.tail.containers_dir.clone(),
            poll_interval: Duration::from_millis(self.tail.poll_interval_ms),
            dead_watch_policy: self.tail.dead_watch_policy,
            label_allowlist: self.tail.label_allowlist.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::LogFormatArg;
    use clap::Parser;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("podtail").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.tail.poll_interval_ms, 1000);
        assert_eq!(config.runtime.blocking_workers, 4);
        assert_eq!(config.sink.kind, SinkKind::Stdout);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [node]
            name = "worker-1"
            context = "kind-dev"

            [tail]
            containers_dir = "/logs"
            poll_interval_ms = 250
            dead_watch_policy = "reject"
            label_allowlist = ["app", "team"]

            [runtime]
            blocking_workers = 8
            shutdown_timeout_ms = 500

            [log]
            level = "debug"
            format = "json"

            [sink]
            kind = "stdout"
        "#;
        let config = Config::from_toml(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.node_name(), "worker-1");
        assert_eq!(config.node.context.as_deref(), Some("kind-dev"));
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.shutdown_timeout(), Duration::from_millis(500));

        let tailer = config.tailer_config();
        assert_eq!(tailer.containers_dir, PathBuf::from("/logs"));
        assert_eq!(tailer.poll_interval, Duration::from_millis(250));
        assert_eq!(tailer.dead_watch_policy, DeadWatchPolicy::Reject);
        assert_eq!(tailer.label_allowlist, vec!["app", "team"]);
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let err = Config::from_toml("[tail]\ndead_watch_policy = \"restart\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.node.name = Some("worker-1".into());
        config.validate().unwrap();

        config.runtime.blocking_workers = 1;
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "runtime.blocking_workers must be at least 2");

        config.runtime.blocking_workers = 2;
        config.tail.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[node]\nname = \"from-file\"\n[log]\nlevel = \"warn\"\n")
            .unwrap();
        let path = file.path().to_str().unwrap();

        let config = Config::load(&cli(&["--config", path, "--node", "from-cli"])).unwrap();
        assert_eq!(config.node_name(), "from-cli");
        assert_eq!(config.log.level, "warn");

        let config = Config::load(&cli(&["--config", path, "--node", "from-cli", "--log-format", "json"]))
            .unwrap();
        assert_eq!(config.log.level, "warn");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_file_node_name_used_without_flag() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[node]\nname = \"from-file\"\n").unwrap();

        // Built directly so an ambient NODE_NAME cannot stand in for the flag
        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            log_format: Some(LogFormatArg::Json),
            ..Cli::default()
        };
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.node_name(), "from-file");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(&cli(&["--config", "/nonexistent/podtail.toml", "--node", "n"]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
