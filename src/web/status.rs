//! Health and status handlers.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::trace;

use crate::cache::CacheSummary;
use crate::state::{AppState, ServiceStatus};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    status: ServiceStatus,
    updated_secs_ago: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    status: ServiceStatus,
    version: &'static str,
    commit: &'static str,
    backend: &'static str,
    services: BTreeMap<String, ServiceInfo>,
    caches: Vec<CacheSummary>,
}

/// Health check endpoint
pub(super) async fn health() -> Json<Value> {
    trace!("health check requested");
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Services plus a summary of every live cache instance.
pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let services: BTreeMap<String, ServiceInfo> = state
        .service_statuses
        .all()
        .into_iter()
        .map(|(name, status, updated_secs_ago)| {
            (
                name,
                ServiceInfo {
                    status,
                    updated_secs_ago,
                },
            )
        })
        .collect();

    let overall_status = overall(services.values().map(|s| s.status));

    let mut caches: Vec<CacheSummary> = state
        .caches
        .instances()
        .iter()
        .map(|cache| cache.summary())
        .collect();
    caches.sort_by_key(|summary| summary.identity.to_string());

    Json(StatusResponse {
        status: overall_status,
        version: env!("CARGO_PKG_VERSION"),
        commit: env!("GIT_COMMIT_SHORT"),
        backend: state.provider().backend().as_str(),
        services,
        caches,
    })
}

fn overall(statuses: impl Iterator<Item = ServiceStatus>) -> ServiceStatus {
    let statuses: Vec<ServiceStatus> = statuses.collect();
    if statuses.is_empty() {
        ServiceStatus::Disabled
    } else if statuses.contains(&ServiceStatus::Error) {
        ServiceStatus::Error
    } else if statuses.contains(&ServiceStatus::Starting) {
        ServiceStatus::Starting
    } else {
        ServiceStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_error_wins() {
        let statuses = [ServiceStatus::Active, ServiceStatus::Error, ServiceStatus::Starting];
        assert_eq!(overall(statuses.into_iter()), ServiceStatus::Error);
        assert_eq!(
            overall([ServiceStatus::Active, ServiceStatus::Disabled].into_iter()),
            ServiceStatus::Active
        );
        assert_eq!(overall(std::iter::empty()), ServiceStatus::Disabled);
    }
}
