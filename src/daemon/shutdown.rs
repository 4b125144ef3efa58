use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Waits for ctrl-c or SIGTERM and cancels the token. Returns early if the token is cancelled by
/// someone else.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        _ = cancelation.cancelled() => {},
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt, shutting down");
            cancelation.cancel();
        },
        _ = terminate() => {
            info!("Received terminate, shutting down");
            cancelation.cancel();
        },
    };
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::error;

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to listen for SIGTERM {e:?}");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}
