//! Operator endpoints that drive a user's cache directly.

use crate::cache::{BuildEvent, BuildOutcome, CacheInstance, CatalogMode, ReconcileOutcome};
use crate::state::AppState;
use crate::web::error::{ApiError, ApiErrorCode};
use crate::web::user::UserQuery;
use axum::extract::{Query, State};
use axum::response::Json;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error};

#[derive(Debug, Default, Deserialize)]
pub struct RebuildParams {
    /// Also rebuild the all-movies snapshot before responding.
    #[serde(default)]
    pub sync_catalog: bool,
}

#[derive(Serialize)]
pub struct RebuildResponse {
    pub movies: usize,
    pub catalog_synced: bool,
}

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshResponse {
    Skipped,
    Unchanged,
    Changed { removed: usize, added: usize },
    /// Nothing was cached yet, so a full build ran instead.
    Rebuilt { movies: usize },
}

impl From<ReconcileOutcome> for RefreshResponse {
    fn from(outcome: ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::Skipped | ReconcileOutcome::NeedsBuild => RefreshResponse::Skipped,
            ReconcileOutcome::Unchanged => RefreshResponse::Unchanged,
            ReconcileOutcome::Changed { removed, added } => {
                RefreshResponse::Changed { removed, added }
            }
        }
    }
}

#[derive(Serialize)]
pub struct InvalidateResponse {
    pub existed: bool,
}

/// Run a full build on its own task so a client disconnect or request
/// timeout cannot abandon it halfway.
async fn run_build(cache: &Arc<CacheInstance>, mode: CatalogMode) -> Result<BuildOutcome, ApiError> {
    let task = {
        let cache = Arc::clone(cache);
        tokio::spawn(async move { cache.start_cache_build(mode).await })
    };
    let outcome = task.await.map_err(|e| {
        error!(error = ?e, "cache build task panicked");
        ApiError::new(ApiErrorCode::Internal, "cache build task failed")
    })??;
    Ok(outcome)
}

/// `POST /api/cache/rebuild[?sync_catalog=true]`
pub(super) async fn rebuild(
    State(state): State<AppState>,
    Query(user): Query<UserQuery>,
    Query(params): Query<RebuildParams>,
) -> Result<Json<RebuildResponse>, ApiError> {
    let cache = state.caches.get_or_create(&user.identity()?).await?;
    let mode = if params.sync_catalog {
        CatalogMode::Blocking
    } else {
        CatalogMode::Detached
    };

    match run_build(&cache, mode).await? {
        BuildOutcome::Built {
            movies,
            catalog_synced,
        } => Ok(Json(RebuildResponse {
            movies,
            catalog_synced,
        })),
        BuildOutcome::AlreadyRunning => Err(ApiError::new(
            ApiErrorCode::BuildInProgress,
            "a build or refresh is already running for this user",
        )),
    }
}

/// `POST /api/cache/refresh`
///
/// An instance with nothing cached gets a full build; reconciling against an
/// empty list would fetch every upstream item's detail one by one.
pub(super) async fn refresh(
    State(state): State<AppState>,
    Query(user): Query<UserQuery>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let cache = state.caches.get_or_create(&user.identity()?).await?;
    let outcome = cache.check_for_changes().await?;
    if outcome != ReconcileOutcome::NeedsBuild {
        return Ok(Json(outcome.into()));
    }

    match run_build(&cache, CatalogMode::Detached).await? {
        BuildOutcome::Built { movies, .. } => Ok(Json(RefreshResponse::Rebuilt { movies })),
        BuildOutcome::AlreadyRunning => Ok(Json(RefreshResponse::Skipped)),
    }
}

/// `DELETE /api/cache`
pub(super) async fn invalidate(
    State(state): State<AppState>,
    Query(user): Query<UserQuery>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let existed = state.caches.invalidate(&user.identity()?).await?;
    Ok(Json(InvalidateResponse { existed }))
}

/// `GET /api/cache/events`
///
/// Streams build progress as Server-Sent Events. Slow clients skip missed
/// events rather than disconnecting.
pub(super) async fn events(
    State(state): State<AppState>,
    Query(user): Query<UserQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let cache = state.caches.get_or_create(&user.identity()?).await?;
    let rx = cache.subscribe();

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = Event::default().event(event_name(&event)).json_data(&event);
                    return Some((sse, rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "progress subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn event_name(event: &BuildEvent) -> &'static str {
    match event {
        BuildEvent::Progress { .. } => "progress",
        BuildEvent::LoadingComplete { .. } => "loading_complete",
        BuildEvent::Error { .. } => "error",
    }
}
