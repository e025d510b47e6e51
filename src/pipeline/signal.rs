//! Signal handling for interrupting an export.

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::cancel::Cancellation;

/// Wait for a shutdown signal (SIGINT, SIGTERM, or SIGQUIT on Unix).
#[cfg(unix)]
pub async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!(message = "Signal received.", signal = "SIGINT");
        }
        _ = sigterm.recv() => {
            info!(message = "Signal received.", signal = "SIGTERM");
        }
        _ = sigquit.recv() => {
            info!(message = "Signal received.", signal = "SIGQUIT");
        }
    }
    Ok(())
}

/// Wait for Ctrl-C.
#[cfg(not(unix))]
pub async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!(message = "Signal received.", signal = "ctrl-c");
    Ok(())
}

/// Interrupt `cancel` when a shutdown signal arrives.
///
/// The task ends on its own once the export is cancelled for another
/// reason; otherwise abort the returned handle when the export is done.
pub fn spawn_signal_handler(cancel: Cancellation) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = shutdown_signal() => match result {
                Ok(()) => {
                    cancel.interrupt();
                }
                Err(e) => warn!(error = %e, "Failed to install signal handlers"),
            },
            _ = cancel.cancelled() => {}
        }
    })
}
