mod cli;
mod config;
mod logging;
mod shutdown;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use podtail_engine::Reconciler;
use podtail_k8s::{KubeClient, KubePodSource};
use podtail_logs::{JsonLinesSink, LogSink, Tailer};

use crate::cli::Cli;
use crate::config::{Config, SinkKind};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli)?;
    logging::init(&config.log)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.runtime.blocking_workers)
        .build()
        .context("Failed to build the async runtime")?;

    let result = runtime.block_on(run_agent(&config));

    // The pod watch may still be blocked on the API server
    runtime.shutdown_timeout(config.shutdown_timeout());

    if let Err(e) = &result {
        tracing::error!(error = %format!("{e:#}"), "podtail stopped");
    }
    result
}

async fn run_agent(config: &Config) -> Result<()> {
    let node = config.node_name().to_string();
    tracing::info!(
        node = %node,
        containers_dir = %config.tail.containers_dir.display(),
        "starting podtail"
    );

    let client = KubeClient::new(config.node.context.clone()).connect().await?;
    let source = Arc::new(KubePodSource::new(client, node));

    let sink: Arc<dyn LogSink> = match config.sink.kind {
        SinkKind::Stdout => Arc::new(JsonLinesSink::stdout()),
    };
    let mut reconciler = Reconciler::new(Tailer::new(config.tailer_config(), sink));

    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(shutdown::wait_for_signal(shutdown.clone()));

    let result = podtail_engine::run(source, &mut reconciler, shutdown.clone()).await;

    if signals.is_finished() {
        if let Ok(reason) = signals.await {
            tracing::info!(?reason, "shutdown requested");
        }
    } else {
        signals.abort();
    }
    shutdown.cancel();

    reconciler.watcher_mut().shutdown_all().await;
    result.context("Pod reconciliation failed")
}
