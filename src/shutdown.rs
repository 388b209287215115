use tokio_util::sync::CancellationToken;

/// Why we are shutting down
#[derive(Debug, Clone, Copy)]
pub enum ShutdownReason {
    CtrlC,
    Sigterm,
}

/// Wait for Ctrl+C or SIGTERM, then cancel the token
pub async fn wait_for_signal(token: CancellationToken) -> ShutdownReason {
    let reason = tokio::select! {
        reason = ctrl_c() => reason,
        reason = sigterm() => reason,
    };
    token.cancel();
    reason
}

async fn ctrl_c() -> ShutdownReason {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    ShutdownReason::CtrlC
}

#[cfg(unix)]
async fn sigterm() -> ShutdownReason {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
    ShutdownReason::Sigterm
}

#[cfg(not(unix))]
async fn sigterm() -> ShutdownReason {
    std::future::pending::<()>().await;
    ShutdownReason::Sigterm
}
