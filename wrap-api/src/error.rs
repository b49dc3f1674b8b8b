//! Error types for wrap-api
//!
//! Stage-level failures (fetch, archive, analysis) surface as HTTP errors
//! with a JSON body `{"error": {"code", "message"}}`. Per-track generation
//! failures never reach this type; they travel inside the progress stream.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::auth::AuthError;
use crate::services::analysis_client::AnalysisError;
use crate::services::history_fetcher::HistoryError;
use crate::services::spotify_client::FetchError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or expired session (401)
    #[error("Not authenticated: {0}")]
    Unauthorized(String),

    /// History retrieval failed upstream (502)
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Writing or reading an archive envelope failed (500)
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Analysis service failed (502)
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// Authentication failed (401)
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// wrap-common error
    #[error("Common error: {0}")]
    Common(#[from] wrap_common::Error),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Fetch(FetchError::Unauthorized) => {
                (StatusCode::UNAUTHORIZED, "UPSTREAM_UNAUTHORIZED")
            }
            ApiError::Fetch(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_FETCH_ERROR"),
            ApiError::Archive(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ARCHIVE_PERSIST_ERROR"),
            ApiError::Analysis(AnalysisError::NoHistory) => (StatusCode::CONFLICT, "NO_HISTORY"),
            ApiError::Analysis(_) => (StatusCode::BAD_GATEWAY, "ANALYSIS_ERROR"),
            ApiError::Auth(_) => (StatusCode::UNAUTHORIZED, "AUTH_ERROR"),
            ApiError::Common(wrap_common::Error::InvalidInput(_)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST")
            }
            ApiError::Common(_) => (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR"),
        }
    }

    /// Whether this failure belongs in the health endpoint's `last_error`
    pub fn is_server_side(&self) -> bool {
        self.parts().0.is_server_error()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.parts();
        let message = match &self {
            ApiError::BadRequest(msg) | ApiError::Unauthorized(msg) => msg.clone(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<HistoryError> for ApiError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::Fetch(e) => ApiError::Fetch(e),
            HistoryError::Archive(e) => ApiError::Archive(e),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
