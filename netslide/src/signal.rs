use std::fmt;

use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Why the relay stopped accepting connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownReason {
    Interrupt,
    Terminate,
    Cancelled,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownReason::Interrupt => "Ctrl+C",
            ShutdownReason::Terminate => "SIGTERM",
            ShutdownReason::Cancelled => "cancellation",
        })
    }
}

/// Resolves with the first of Ctrl+C, SIGTERM or `cancel_token` firing.
///
/// A handler that fails to install never fires; the other sources still do.
pub(crate) async fn wait_for_shutdown(cancel_token: CancellationToken) -> ShutdownReason {
    tokio::select! {
        _ = interrupt() => ShutdownReason::Interrupt,
        _ = terminate() => ShutdownReason::Terminate,
        _ = cancel_token.cancelled() => ShutdownReason::Cancelled,
    }
}

async fn interrupt() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
