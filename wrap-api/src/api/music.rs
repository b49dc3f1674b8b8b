//! Streaming generation endpoints
//!
//! Both routes validate their input before the stream opens; once the
//! response has started, every outcome travels as a progress record.

use axum::{
    extract::State,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use tracing::info;
use wrap_common::sse::progress_sse;
use wrap_common::TasteProfile;

use crate::services::MAX_DURATION_SECONDS;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub analysis: TasteProfile,
    /// Seconds per track; the configured preview length when omitted
    pub duration: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandRequest {
    pub prompt: String,
    pub track_index: usize,
}

/// POST /music/generate-from-analysis
pub async fn generate_from_analysis(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<impl IntoResponse> {
    let duration = request
        .duration
        .unwrap_or(state.config.generation.preview_seconds);
    if !(1..=MAX_DURATION_SECONDS).contains(&duration) {
        return Err(ApiError::BadRequest(format!(
            "duration must be between 1 and {} seconds, got {}",
            MAX_DURATION_SECONDS, duration
        )));
    }
    request
        .analysis
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    info!(
        tracks = request.analysis.track_count(),
        duration,
        "Opening generation channel"
    );
    let events = state
        .orchestrator
        .generate_from_analysis(request.analysis, duration);
    Ok(progress_sse("generate", events))
}

/// POST /music/expand-track
pub async fn expand_track(
    State(state): State<AppState>,
    Json(request): Json<ExpandRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".to_string()));
    }

    info!(track_index = request.track_index, "Opening expansion channel");
    let events = state
        .orchestrator
        .expand_track(request.track_index, request.prompt);
    Ok(progress_sse("expand", events))
}

pub fn music_routes() -> Router<AppState> {
    Router::new()
        .route("/music/generate-from-analysis", post(generate_from_analysis))
        .route("/music/expand-track", post(expand_track))
}
