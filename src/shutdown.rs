use std::future::{Future, pending};
use std::io;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Waits for `signal`. A listener that fails to install never resolves, so it
/// cannot trigger a shutdown on its own.
pub async fn signal_or_pending<F>(name: &str, signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(err) = signal.await {
        error!(signal = name, error = %err, "failed to listen for signal");
        pending::<()>().await;
    }
}

/// Cancels `shutdown` on ctrl-c or SIGTERM.
pub async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = signal_or_pending("ctrl-c", tokio::signal::ctrl_c());

    #[cfg(unix)]
    let terminate = signal_or_pending("SIGTERM", async {
        let mut signal =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        signal.recv().await;
        Ok::<(), io::Error>(())
    });
    #[cfg(not(unix))]
    let terminate = pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
    shutdown.cancel();
}
