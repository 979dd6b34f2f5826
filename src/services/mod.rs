//! Long-running services and their lifecycle.

pub mod cache;
pub mod manager;
pub mod signals;
pub mod web;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// A component that runs until the process shuts down.
#[async_trait]
pub trait Service: Send {
    fn name(&self) -> &'static str;

    /// Run until finished or until the future is dropped.
    async fn run(&mut self) -> Result<(), anyhow::Error>;

    /// Release resources after a shutdown signal. `run` has already been dropped.
    async fn shutdown(&mut self) -> Result<(), anyhow::Error>;
}

#[derive(Debug)]
pub enum ServiceResult {
    GracefulShutdown,
    NormalCompletion,
    Error(anyhow::Error),
}

/// Drive `service` until it finishes or a shutdown signal arrives.
pub async fn run_service(
    mut service: Box<dyn Service>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> ServiceResult {
    let name = service.name();
    info!(service = name, "service started");

    tokio::select! {
        result = service.run() => match result {
            Ok(()) => {
                warn!(service = name, "service completed unexpectedly");
                ServiceResult::NormalCompletion
            }
            Err(e) => {
                error!(service = name, error = ?e, "service failed");
                ServiceResult::Error(e)
            }
        },
        _ = shutdown_rx.recv() => {
            info!(service = name, "shutting down service");
            match service.shutdown().await {
                Ok(()) => {
                    info!(service = name, "service shut down gracefully");
                    ServiceResult::GracefulShutdown
                }
                Err(e) => {
                    error!(service = name, error = ?e, "service shutdown failed");
                    ServiceResult::Error(e)
                }
            }
        }
    }
}
