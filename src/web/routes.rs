//! Web API router construction.

use axum::{
    Router,
    http::{HeaderValue, StatusCode},
    response::Response,
    routing::{delete, get, post},
};
use std::time::Duration;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer};

use crate::state::AppState;
use crate::web::middleware::request_id::request_id;
use crate::web::{cache, movies, status};

/// Cache state changes under clients' feet; never let intermediaries store it.
const NO_STORE: &str = "private, no-store, must-revalidate";

/// Creates the web server router
pub fn create_router(app_state: AppState) -> Router {
    let api_router = Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/movies", get(movies::list_movies))
        .route("/movies/count", post(movies::count_movies))
        .route("/movies/random", post(movies::random_movie))
        .route("/movies/filters", get(movies::filter_options))
        .route("/movies/{id}", delete(movies::remove_movie))
        .route("/cache", delete(cache::invalidate))
        .route("/cache/rebuild", post(cache::rebuild))
        .route("/cache/refresh", post(cache::refresh))
        .route("/cache/events", get(cache::events))
        .layer(axum::middleware::map_response(
            |mut resp: Response| async move {
                resp.headers_mut().insert(
                    axum::http::header::CACHE_CONTROL,
                    HeaderValue::from_static(NO_STORE),
                );
                resp
            },
        ))
        .with_state(app_state);

    Router::new().nest("/api", api_router).layer((
        // Outermost: per-request ID span + response logging.
        axum::middleware::from_fn(request_id),
        CorsLayer::permissive(),
        CompressionLayer::new()
            .zstd(true)
            .br(true)
            .gzip(true)
            .quality(tower_http::CompressionLevel::Fastest),
        // Bounds time to response headers only; SSE bodies stream past it.
        TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(120)),
    ))
}
