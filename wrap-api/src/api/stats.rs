//! Listening-history endpoints
//!
//! GET routes proxy one upstream dataset; POST `save-*` routes archive a
//! dataset the caller already holds; `archive-all` runs the fetch-and-archive
//! stage server-side.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::Value;
use wrap_common::{HistoryDataset, HistoryKind, TimeRange};

use super::access_token;
use crate::archive::ArchiveReceipt;
use crate::services::{HistoryQuery, MAX_LIMIT};
use crate::{ApiResult, AppState};

/// `?time_range=&limit=` on history routes
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub time_range: Option<String>,
    pub limit: Option<u32>,
}

impl HistoryParams {
    fn query(&self, kind: HistoryKind) -> ApiResult<HistoryQuery> {
        let time_range = self
            .time_range
            .as_deref()
            .map(str::parse::<TimeRange>)
            .transpose()?;
        Ok(HistoryQuery::new(
            kind,
            time_range,
            self.limit.unwrap_or(MAX_LIMIT),
        )?)
    }
}

/// Body of the `save-*` routes
#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    pub data: Value,
}

async fn fetch_history(
    state: AppState,
    jar: CookieJar,
    params: HistoryParams,
    kind: HistoryKind,
) -> ApiResult<Json<HistoryDataset>> {
    let query = params.query(kind)?;
    let token = access_token(&state, &jar).await?;
    let result = state.history.fetch(&token, &query).await;
    let dataset = state.record_failure(result.map_err(Into::into)).await?;
    Ok(Json(dataset))
}

async fn save_history(
    state: AppState,
    params: HistoryParams,
    body: SaveRequest,
    kind: HistoryKind,
) -> ApiResult<Json<ArchiveReceipt>> {
    let query = params.query(kind)?;
    let result = state
        .archive
        .archive_history(kind, query.time_range, query.limit, &body.data)
        .await;
    let record = state.record_failure(result.map_err(Into::into)).await?;
    Ok(Json(record.receipt()))
}

/// GET /stats/top-artists
pub async fn top_artists(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<HistoryDataset>> {
    fetch_history(state, jar, params, HistoryKind::TopArtists).await
}

/// GET /stats/top-tracks
pub async fn top_tracks(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<HistoryDataset>> {
    fetch_history(state, jar, params, HistoryKind::TopTracks).await
}

/// GET /stats/recently-played
pub async fn recently_played(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<HistoryDataset>> {
    fetch_history(state, jar, params, HistoryKind::RecentlyPlayed).await
}

pub async fn save_top_artists(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
    Json(body): Json<SaveRequest>,
) -> ApiResult<Json<ArchiveReceipt>> {
    save_history(state, params, body, HistoryKind::TopArtists).await
}

pub async fn save_top_tracks(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
    Json(body): Json<SaveRequest>,
) -> ApiResult<Json<ArchiveReceipt>> {
    save_history(state, params, body, HistoryKind::TopTracks).await
}

pub async fn save_recently_played(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
    Json(body): Json<SaveRequest>,
) -> ApiResult<Json<ArchiveReceipt>> {
    save_history(state, params, body, HistoryKind::RecentlyPlayed).await
}

/// POST /stats/archive-all
///
/// Fetches and archives all three datasets concurrently. Succeeds only if
/// every dataset was archived.
pub async fn archive_all(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Vec<ArchiveReceipt>>> {
    let time_range = params
        .time_range
        .as_deref()
        .map(str::parse::<TimeRange>)
        .transpose()?
        .unwrap_or_default();
    let queries = HistoryQuery::default_flow(time_range, params.limit.unwrap_or(MAX_LIMIT))?;
    let token = access_token(&state, &jar).await?;

    let result = state.history.fetch_all(&token, &queries).await;
    let records = state.record_failure(result.map_err(Into::into)).await?;
    Ok(Json(records.iter().map(|r| r.receipt()).collect()))
}

pub fn stats_routes() -> Router<AppState> {
    Router::new()
        .route("/stats/top-artists", get(top_artists))
        .route("/stats/top-tracks", get(top_tracks))
        .route("/stats/recently-played", get(recently_played))
        .route("/stats/save-top-artists", post(save_top_artists))
        .route("/stats/save-top-tracks", post(save_top_tracks))
        .route("/stats/save-recently-played", post(save_recently_played))
        .route("/stats/archive-all", post(archive_all))
}
