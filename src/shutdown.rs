use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a handler that cancels the returned token on SIGTERM or SIGINT.
///
/// The CLI races this token against batch completion and, when it fires,
/// hands control to [`Orchestrator::shutdown`](crate::Orchestrator::shutdown)
/// so queued jobs fail as cancelled and running actions get their grace period.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!(error = %e, "Failed to install signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, cancelling run");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, cancelling run");
            }
        }

        token_clone.cancel();
    });

    token
}
