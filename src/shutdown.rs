use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel `kill` when SIGTERM or SIGINT arrives.
///
/// The stage driver watches the token: the running stage is interrupted, the
/// cleanup finalizer runs, and the job ends as killed.
pub fn install_kill_handler(kill: CancellationToken) {
    tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!(error = %e, "Failed to install signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, killing job");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, killing job");
            }
            _ = kill.cancelled() => return,
        }

        kill.cancel();
    });
}
