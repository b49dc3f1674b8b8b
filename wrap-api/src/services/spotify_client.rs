//! Listening-history client
//!
//! Reads top artists, top tracks and recently played tracks from the Spotify
//! Web API on behalf of an authenticated user.

use async_trait::async_trait;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use serde_json::Value;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use wrap_common::{HistoryDataset, HistoryKind, TimeRange};

const USER_AGENT: &str = concat!("wrap-api/", env!("CARGO_PKG_VERSION"));

/// Requests per second across all sessions; also the burst size
const REQUESTS_PER_SECOND: NonZeroU32 = match NonZeroU32::new(10) {
    Some(n) => n,
    None => unreachable!(),
};

/// Upstream maximum page size for history endpoints
pub const MAX_LIMIT: u32 = 50;

/// History retrieval errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Upstream rejected the access token")]
    Unauthorized,

    #[error("Rate limited by upstream (retry after {0:?}s)")]
    RateLimited(Option<u64>),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Which dataset to fetch, and how much of it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub kind: HistoryKind,
    /// Always `None` for recently played
    pub time_range: Option<TimeRange>,
    pub limit: u32,
}

impl HistoryQuery {
    /// Build a query; ranged kinds default to medium term
    pub fn new(
        kind: HistoryKind,
        time_range: Option<TimeRange>,
        limit: u32,
    ) -> Result<Self, wrap_common::Error> {
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(wrap_common::Error::InvalidInput(format!(
                "limit must be between 1 and {}, got {}",
                MAX_LIMIT, limit
            )));
        }
        let time_range = if kind.is_ranged() {
            Some(time_range.unwrap_or_default())
        } else {
            None
        };
        Ok(Self {
            kind,
            time_range,
            limit,
        })
    }

    /// The three queries of the default flow
    pub fn default_flow(time_range: TimeRange, limit: u32) -> Result<[Self; 3], wrap_common::Error> {
        Ok([
            Self::new(HistoryKind::TopArtists, Some(time_range), limit)?,
            Self::new(HistoryKind::TopTracks, Some(time_range), limit)?,
            Self::new(HistoryKind::RecentlyPlayed, None, limit)?,
        ])
    }

    /// Path and query string relative to the API base URL
    pub fn path(&self) -> String {
        match (self.kind, self.time_range) {
            (HistoryKind::TopArtists, range) => format!(
                "/me/top/artists?time_range={}&limit={}",
                range.unwrap_or_default(),
                self.limit
            ),
            (HistoryKind::TopTracks, range) => format!(
                "/me/top/tracks?time_range={}&limit={}",
                range.unwrap_or_default(),
                self.limit
            ),
            (HistoryKind::RecentlyPlayed, _) => {
                format!("/me/player/recently-played?limit={}", self.limit)
            }
        }
    }
}

/// Source of listening-history datasets
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch(
        &self,
        access_token: &str,
        query: &HistoryQuery,
    ) -> Result<HistoryDataset, FetchError>;
}

type HistoryRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn history_rate_limiter() -> HistoryRateLimiter {
    RateLimiter::direct(Quota::per_second(REQUESTS_PER_SECOND))
}

/// Spotify Web API client
pub struct SpotifyClient {
    http_client: reqwest::Client,
    api_url: String,
    rate_limiter: HistoryRateLimiter,
}

impl SpotifyClient {
    pub fn new(api_url: impl Into<String>) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            rate_limiter: history_rate_limiter(),
        })
    }
}

#[async_trait]
impl HistorySource for SpotifyClient {
    async fn fetch(
        &self,
        access_token: &str,
        query: &HistoryQuery,
    ) -> Result<HistoryDataset, FetchError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.api_url, query.path());
        tracing::debug!(kind = %query.kind, url = %url, "Querying history endpoint");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FetchError::Unauthorized);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(FetchError::RateLimited(retry_after));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(FetchError::Api(status.as_u16(), error_text));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))?;

        let dataset = dataset_from_page(query, body)?;

        tracing::info!(
            kind = %query.kind,
            items = dataset.items.len(),
            "Retrieved listening history"
        );

        Ok(dataset)
    }
}

/// Extract the `items` of an upstream paging object
pub fn dataset_from_page(query: &HistoryQuery, page: Value) -> Result<HistoryDataset, FetchError> {
    let items = match page {
        Value::Object(mut fields) => match fields.remove("items") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(FetchError::Parse(format!(
                    "{} response has no items array",
                    query.kind
                )))
            }
        },
        _ => {
            return Err(FetchError::Parse(format!(
                "{} response is not an object",
                query.kind
            )))
        }
    };
    Ok(HistoryDataset::new(query.kind, query.time_range, items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_paths() {
        let [artists, tracks, recent] = HistoryQuery::default_flow(TimeRange::MediumTerm, 50).unwrap();
        assert_eq!(artists.path(), "/me/top/artists?time_range=medium_term&limit=50");
        assert_eq!(tracks.path(), "/me/top/tracks?time_range=medium_term&limit=50");
        assert_eq!(recent.path(), "/me/player/recently-played?limit=50");
        assert_eq!(recent.time_range, None);
    }

    #[test]
    fn test_query_limit_bounds() {
        assert!(HistoryQuery::new(HistoryKind::TopArtists, None, 0).is_err());
        assert!(HistoryQuery::new(HistoryKind::TopArtists, None, 51).is_err());
        let query = HistoryQuery::new(HistoryKind::TopArtists, None, 1).unwrap();
        assert_eq!(query.time_range, Some(TimeRange::MediumTerm));
    }

    #[test]
    fn test_dataset_from_page() {
        let query = HistoryQuery::new(HistoryKind::TopTracks, Some(TimeRange::LongTerm), 2).unwrap();
        let dataset =
            dataset_from_page(&query, json!({"items": [{"name": "a"}, {"name": "b"}], "total": 2}))
                .unwrap();
        assert_eq!(dataset.items.len(), 2);
        assert_eq!(dataset.time_range, Some(TimeRange::LongTerm));

        assert!(dataset_from_page(&query, json!({"total": 0})).is_err());
        assert!(dataset_from_page(&query, json!([1, 2])).is_err());
    }

    #[test]
    fn test_rate_limiter_allows_one_second_burst() {
        let limiter = history_rate_limiter();
        for _ in 0..REQUESTS_PER_SECOND.get() {
            assert!(limiter.check().is_ok());
        }
        assert!(limiter.check().is_err());
    }
}
