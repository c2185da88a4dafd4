//! Termination signal handling.
//!
//! On Unix, SIGINT, SIGTERM and SIGQUIT all request a graceful shutdown;
//! elsewhere only Ctrl-C does. The caller decides what shutdown means.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;

/// Complete when the process receives a termination signal.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = tokio::signal::ctrl_c() => "ctrl-c",
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    tracing::info!(signal = name, "Received termination signal");
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!(signal = "ctrl-c", "Received termination signal");
    Ok(())
}

/// Spawn a task that requests dispatcher shutdown on the first signal.
///
/// The task also ends, without shutting anything down, when `stop` is
/// cancelled.
pub fn spawn_shutdown_listener(
    dispatcher: Arc<Dispatcher>,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = stop.cancelled() => {}
            result = wait_for_shutdown_signal() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to install signal handlers, shutting down");
                }
                dispatcher.request_shutdown();
            }
        }
    })
}
