//! Interrupt handling

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancel `token` on SIGINT or SIGTERM.
///
/// Handlers are installed before this returns, so an interrupt arriving
/// while the scheduler is still starting is not lost.
pub fn cancel_on_signals(token: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Interrupt received, stopping"),
            _ = terminate.recv() => info!("Termination requested, stopping"),
            _ = token.cancelled() => return,
        }
        token.cancel();
    }))
}
