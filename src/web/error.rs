//! JSON error responses for the HTTP API.

use crate::cache::{CacheError, StoreError};
use crate::provider::ProviderError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    InvalidUser,
    NotFound,
    BuildInProgress,
    UpstreamUnavailable,
    StorageFailed,
    Internal,
}

impl ApiErrorCode {
    fn status(self) -> StatusCode {
        match self {
            ApiErrorCode::InvalidUser => StatusCode::BAD_REQUEST,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::BuildInProgress => StatusCode::CONFLICT,
            ApiErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ApiErrorCode::StorageFailed | ApiErrorCode::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::NotFound, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code.status(), Json(self)).into_response()
    }
}

impl From<CacheError> for ApiError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Upstream(inner) => inner.into(),
            CacheError::Store(inner) => inner.into(),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::UnknownUser(user) => {
                ApiError::not_found(format!("unknown user '{user}'"))
            }
            ProviderError::PerspectiveUnsupported { .. } => {
                ApiError::new(ApiErrorCode::InvalidUser, e.to_string())
            }
            inner => {
                warn!(error = ?inner, "upstream request failed");
                ApiError::new(
                    ApiErrorCode::UpstreamUnavailable,
                    format!("media server request failed: {inner}"),
                )
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        error!(error = ?e, "snapshot store failure");
        ApiError::new(ApiErrorCode::StorageFailed, e.to_string())
    }
}
