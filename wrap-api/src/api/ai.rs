//! Taste analysis endpoint

use axum::{extract::State, routing::post, Json, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use tracing::info;
use wrap_common::{HistoryKind, TasteProfile};

use super::session_id;
use crate::services::HistorySnapshot;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub analysis: TasteProfile,
}

/// Newest archived dataset of each kind
async fn load_snapshot(state: &AppState) -> ApiResult<HistorySnapshot> {
    let mut snapshot = HistorySnapshot::default();
    for kind in HistoryKind::ALL {
        let data = state
            .archive
            .latest(kind.archive_type())
            .await?
            .map(|envelope| envelope.data);
        match kind {
            HistoryKind::TopArtists => snapshot.top_artists = data,
            HistoryKind::TopTracks => snapshot.top_tracks = data,
            HistoryKind::RecentlyPlayed => snapshot.recently_played = data,
        }
    }
    Ok(snapshot)
}

/// POST /ai/guess-music-age
pub async fn guess_music_age(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<Json<AnalysisResponse>> {
    let session = session_id(&jar);
    if !state.sessions.is_authenticated(session.as_deref()).await {
        return Err(ApiError::Unauthorized("Log in before requesting an analysis".to_string()));
    }

    let snapshot = state.record_failure(load_snapshot(&state).await).await?;
    let result = state.analysis.analyze(&snapshot).await;
    let analysis = state.record_failure(result.map_err(Into::into)).await?;

    info!(
        estimated_age = analysis.estimated_age,
        tracks = analysis.track_count(),
        "Analysis delivered"
    );
    Ok(Json(AnalysisResponse { analysis }))
}

pub fn ai_routes() -> Router<AppState> {
    Router::new().route("/ai/guess-music-age", post(guess_music_age))
}
