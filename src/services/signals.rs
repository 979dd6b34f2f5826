use crate::services::ServiceResult;
use crate::services::manager::ServiceManager;
use crate::utils::fmt_duration;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

/// Run until a service exits or SIGINT/SIGTERM arrives, then shut everything
/// down within `shutdown_timeout`.
pub async fn handle_shutdown_signals(
    mut service_manager: ServiceManager,
    shutdown_timeout: Duration,
) -> ExitCode {
    let exit_code = tokio::select! {
        (name, result) = service_manager.run() => match result {
            ServiceResult::GracefulShutdown | ServiceResult::NormalCompletion => {
                warn!(service = %name, "service exited, shutting down");
                ExitCode::SUCCESS
            }
            ServiceResult::Error(e) => {
                error!(service = %name, error = ?e, "service failed, shutting down");
                ExitCode::FAILURE
            }
        },
        signal = shutdown_signal() => {
            info!(signal, "received shutdown signal");
            ExitCode::SUCCESS
        }
    };

    match service_manager.shutdown(shutdown_timeout).await {
        Ok(elapsed) => {
            info!(elapsed = fmt_duration(elapsed), "graceful shutdown complete");
            exit_code
        }
        Err(pending) => {
            warn!(pending = ?pending, "graceful shutdown timed out");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
