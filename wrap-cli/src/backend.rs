//! Access to a running wrap-api
//!
//! [`WrapBackend`] is the seam the pipeline and generation job depend on.
//! [`HttpBackend`] implements it over HTTP, sending the session cookie with
//! every request and decoding streamed responses as progress channels.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::COOKIE;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use wrap_common::progress::decode_stream;
use wrap_common::{HistoryKind, ProgressEvent, TasteProfile, TimeRange};

use crate::error::ClientError;

/// Session cookie name set by wrap-api on login
pub const SESSION_COOKIE: &str = "wrap_session";

/// Page size requested for every history dataset
pub const HISTORY_LIMIT: u32 = 50;

/// Decoded progress channel
pub type ProgressStream = BoxStream<'static, wrap_common::Result<ProgressEvent>>;

/// Receipt of one archived dataset
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedArchive {
    pub filename: String,
    pub item_count: usize,
}

/// Operations the client performs against wrap-api
#[async_trait]
pub trait WrapBackend: Send + Sync {
    /// Fetch one history dataset and archive it
    async fn fetch_and_archive(&self, kind: HistoryKind) -> Result<SavedArchive, ClientError>;

    /// Run taste analysis over the archived history
    async fn analyze(&self) -> Result<TasteProfile, ClientError>;

    /// Open the batch generation channel
    async fn generate(
        &self,
        profile: &TasteProfile,
        duration_seconds: u32,
    ) -> Result<ProgressStream, ClientError>;

    /// Open the expansion channel for one track
    async fn expand(&self, track_index: usize, prompt: &str) -> Result<ProgressStream, ClientError>;
}

#[derive(Debug, Deserialize)]
struct AnalysisBody {
    analysis: TasteProfile,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    authenticated: bool,
}

/// HTTP client for wrap-api
pub struct HttpBackend {
    http_client: reqwest::Client,
    base_url: String,
    session: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, session: Option<String>) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        })
    }

    /// URL a browser opens to log in
    pub fn login_url(&self) -> String {
        format!("{}/auth/login", self.base_url)
    }

    pub async fn is_authenticated(&self) -> Result<bool, ClientError> {
        let response = self.request(reqwest::Method::GET, "/auth/status").send().await?;
        let body: StatusBody = checked(response).await?.json().await?;
        Ok(body.authenticated)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http_client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.session {
            Some(session) => builder.header(COOKIE, format!("{}={}", SESSION_COOKIE, session)),
            None => builder,
        }
    }

    async fn open_channel(&self, path: &str, body: Value) -> Result<ProgressStream, ClientError> {
        let response = self
            .request(reqwest::Method::POST, path)
            .json(&body)
            .send()
            .await?;
        let response = checked(response).await?;
        debug!(path, "Progress channel opened");
        Ok(decode_stream(response.bytes_stream()).boxed())
    }
}

/// Map non-success statuses to errors, keeping the server's message
async fn checked(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ClientError::NotAuthenticated);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| body["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(text);
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

fn history_query(kind: HistoryKind) -> String {
    if kind.is_ranged() {
        format!("time_range={}&limit={}", TimeRange::MediumTerm, HISTORY_LIMIT)
    } else {
        format!("limit={}", HISTORY_LIMIT)
    }
}

#[async_trait]
impl WrapBackend for HttpBackend {
    async fn fetch_and_archive(&self, kind: HistoryKind) -> Result<SavedArchive, ClientError> {
        let query = history_query(kind);

        let response = self
            .request(reqwest::Method::GET, &format!("/stats/{}?{}", kind.archive_type(), query))
            .send()
            .await?;
        let data: Value = checked(response).await?.json().await?;

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/stats/save-{}?{}", kind.archive_type(), query),
            )
            .json(&json!({ "data": data }))
            .send()
            .await?;
        let saved: SavedArchive = checked(response).await?.json().await?;
        debug!(kind = %kind, filename = %saved.filename, "Dataset archived");
        Ok(saved)
    }

    async fn analyze(&self) -> Result<TasteProfile, ClientError> {
        let response = self
            .request(reqwest::Method::POST, "/ai/guess-music-age")
            .send()
            .await?;
        let body: AnalysisBody = checked(response).await?.json().await?;
        Ok(body.analysis)
    }

    async fn generate(
        &self,
        profile: &TasteProfile,
        duration_seconds: u32,
    ) -> Result<ProgressStream, ClientError> {
        self.open_channel(
            "/music/generate-from-analysis",
            json!({ "analysis": profile, "duration": duration_seconds }),
        )
        .await
    }

    async fn expand(&self, track_index: usize, prompt: &str) -> Result<ProgressStream, ClientError> {
        self.open_channel(
            "/music/expand-track",
            json!({ "prompt": prompt, "trackIndex": track_index }),
        )
        .await
    }
}
