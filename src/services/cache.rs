use crate::cache::{CacheRegistry, Identity};
use crate::services::Service;
use crate::state::{ServiceStatus, ServiceStatusRegistry};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Materializes the global cache instance at startup and stops every refresh
/// loop on shutdown.
pub struct CacheService {
    caches: CacheRegistry,
    service_statuses: ServiceStatusRegistry,
    shutdown_timeout: Duration,
}

impl CacheService {
    pub fn new(
        caches: CacheRegistry,
        service_statuses: ServiceStatusRegistry,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            caches,
            service_statuses,
            shutdown_timeout,
        }
    }
}

#[async_trait]
impl Service for CacheService {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        self.service_statuses.set("cache", ServiceStatus::Starting);
        let global = match self.caches.get_or_create(&Identity::global()).await {
            Ok(global) => global,
            Err(e) => {
                self.service_statuses.set("cache", ServiceStatus::Error);
                return Err(e.into());
            }
        };
        info!(
            movies = global.len(),
            needs_build = global.needs_build(),
            "Global cache ready"
        );
        self.service_statuses.set("cache", ServiceStatus::Active);

        // Refresh loops run on their own tasks; this service only owns their lifetime.
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.caches.shutdown(self.shutdown_timeout).await;
        self.service_statuses.set("cache", ServiceStatus::Disabled);
        Ok(())
    }
}
