use crate::services::Service;
use crate::state::{AppState, ServiceStatus};
use crate::web::create_router;
use anyhow::Context;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

/// HTTP API server.
pub struct WebService {
    port: u16,
    app_state: AppState,
}

impl WebService {
    pub fn new(port: u16, app_state: AppState) -> Self {
        Self { port, app_state }
    }
}

#[async_trait]
impl Service for WebService {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        let router = create_router(self.app_state.clone());
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        self.app_state
            .service_statuses
            .set("web", ServiceStatus::Active);
        info!(address = %addr, link = format!("http://localhost:{}", self.port), "web server listening");

        axum::serve(listener, router)
            .await
            .context("web server exited")?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.app_state
            .service_statuses
            .set("web", ServiceStatus::Disabled);
        Ok(())
    }
}
