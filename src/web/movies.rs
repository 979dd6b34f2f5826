//! Read endpoints over a user's cached movies.

use crate::cache::{FilterOptions, FilterQuery, MovieRecord};
use crate::state::AppState;
use crate::web::error::ApiError;
use crate::web::user::UserQuery;
use axum::extract::{Path, Query, State};
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoviesResponse {
    pub movies: Vec<MovieRecord>,
    pub count: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub needs_build: bool,
}

#[derive(Serialize)]
pub struct CountResponse {
    pub count: usize,
}

#[derive(Serialize)]
pub struct RemoveResponse {
    pub removed: bool,
}

/// `GET /api/movies`
pub(super) async fn list_movies(
    State(state): State<AppState>,
    Query(user): Query<UserQuery>,
) -> Result<Json<MoviesResponse>, ApiError> {
    let cache = state.caches.get_or_create(&user.identity()?).await?;
    let movies = cache.get_cached_movies();
    Ok(Json(MoviesResponse {
        count: movies.len(),
        movies,
        last_update: cache.last_update(),
        needs_build: cache.needs_build(),
    }))
}

/// `POST /api/movies/count`
pub(super) async fn count_movies(
    State(state): State<AppState>,
    Query(user): Query<UserQuery>,
    Json(filters): Json<FilterQuery>,
) -> Result<Json<CountResponse>, ApiError> {
    let cache = state.caches.get_or_create(&user.identity()?).await?;
    let count = cache.get_filtered_movie_count(&filters).await;
    Ok(Json(CountResponse { count }))
}

/// `POST /api/movies/random`
pub(super) async fn random_movie(
    State(state): State<AppState>,
    Query(user): Query<UserQuery>,
    Json(filters): Json<FilterQuery>,
) -> Result<Json<MovieRecord>, ApiError> {
    let cache = state.caches.get_or_create(&user.identity()?).await?;
    cache
        .random_movie(&filters)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("no movie matches the filters"))
}

/// `GET /api/movies/filters`
pub(super) async fn filter_options(
    State(state): State<AppState>,
    Query(user): Query<UserQuery>,
) -> Result<Json<FilterOptions>, ApiError> {
    let cache = state.caches.get_or_create(&user.identity()?).await?;
    Ok(Json(cache.filter_options()))
}

/// `DELETE /api/movies/{id}`
pub(super) async fn remove_movie(
    State(state): State<AppState>,
    Query(user): Query<UserQuery>,
    Path(id): Path<String>,
) -> Result<Json<RemoveResponse>, ApiError> {
    let cache = state.caches.get_or_create(&user.identity()?).await?;
    let removed = cache.remove_movie(&id).await?;
    Ok(Json(RemoveResponse { removed }))
}
