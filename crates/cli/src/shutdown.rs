use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Maps SIGINT/SIGTERM onto the engine's cancellation token so an
/// interrupted run flushes, checkpoints and releases its lease.
pub fn register_handlers(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install SIGINT handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, canceling extraction"),
            _ = terminate => info!("received SIGTERM, canceling extraction"),
        }

        cancel.cancel();
    });
}
