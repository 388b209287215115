use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::LogFormat;

/// podtail - ship container logs from a Kubernetes node
#[derive(Parser, Debug, Default)]
#[command(name = "podtail")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Node whose pods are tailed
    #[arg(long, env = "NODE_NAME")]
    pub node: Option<String>,

    /// Kubeconfig context (in-cluster config or the current context if omitted)
    #[arg(long)]
    pub context: Option<String>,

    /// Directory holding the per-container json-file logs
    #[arg(long, value_name = "DIR")]
    pub containers_dir: Option<PathBuf>,

    /// Log filter for podtail's own diagnostics (e.g. "info", "podtail_logs=debug")
    #[arg(long)]
    pub log_level: Option<String>,

    /// Format of podtail's own diagnostics
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormatArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum LogFormatArg {
    Console,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(v: LogFormatArg) -> Self {
        match v {
            LogFormatArg::Console => LogFormat::Console,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}
