//! Application state shared across services and HTTP handlers.

use crate::cache::CacheRegistry;
use crate::config::Config;
use crate::provider::LibraryProvider;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Health status of a service.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Starting,
    Active,
    Disabled,
    Error,
}

/// A timestamped status entry for a service.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub status: ServiceStatus,
    pub updated_at: Instant,
}

/// Thread-safe registry for services to self-report their health status.
#[derive(Debug, Clone, Default)]
pub struct ServiceStatusRegistry {
    inner: Arc<DashMap<String, StatusEntry>>,
}

impl ServiceStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates the status for a named service.
    pub fn set(&self, name: &str, status: ServiceStatus) {
        self.inner.insert(
            name.to_owned(),
            StatusEntry {
                status,
                updated_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<ServiceStatus> {
        self.inner.get(name).map(|entry| entry.status)
    }

    /// Snapshot of every service with seconds since its last report.
    pub fn all(&self) -> Vec<(String, ServiceStatus, u64)> {
        self.inner
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().status,
                    entry.value().updated_at.elapsed().as_secs(),
                )
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub caches: CacheRegistry,
    pub service_statuses: ServiceStatusRegistry,
}

impl AppState {
    pub fn new(config: Arc<Config>, caches: CacheRegistry) -> Self {
        Self {
            config,
            caches,
            service_statuses: ServiceStatusRegistry::new(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn LibraryProvider> {
        self.caches.provider()
    }
}
