//! wrap-api library interface
//!
//! Exposes the router and its state so integration tests can drive the
//! service with in-process capabilities.

pub mod api;
pub mod archive;
pub mod auth;
pub mod config;
pub mod error;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::archive::ArchiveStore;
use crate::auth::{AuthProvider, SessionStore, SpotifyAuth};
use crate::config::ServiceConfig;
use crate::services::{
    AnalysisClient, ChatAnalysisClient, ElevenLabsClient, FetchError, GenerationOrchestrator,
    HistoryFetcher, HistorySource, MusicGenerator, SpotifyClient,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub archive: Arc<ArchiveStore>,
    pub sessions: Arc<SessionStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub history: HistoryFetcher,
    pub analysis: Arc<dyn AnalysisClient>,
    pub orchestrator: GenerationOrchestrator,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last server-side failure, reported by `/health`
    pub last_error: Arc<RwLock<Option<String>>>,
}

/// Errors building the production capabilities
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Auth(#[from] auth::AuthError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl AppState {
    /// Assemble state from explicit capabilities
    pub fn new(
        config: ServiceConfig,
        auth: Arc<dyn AuthProvider>,
        history_source: Arc<dyn HistorySource>,
        analysis: Arc<dyn AnalysisClient>,
        generator: Arc<dyn MusicGenerator>,
    ) -> Self {
        let archive = Arc::new(ArchiveStore::new(config.data_dir.clone()));
        let orchestrator = GenerationOrchestrator::new(
            generator,
            config.generation.concurrency,
            config.generation.full_seconds,
        );
        Self {
            history: HistoryFetcher::new(history_source, Arc::clone(&archive)),
            archive,
            sessions: Arc::new(SessionStore::new()),
            auth,
            analysis,
            orchestrator,
            config: Arc::new(config),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Wire the upstream clients named in `config`
    pub fn from_config(config: ServiceConfig) -> Result<Self, StartupError> {
        let auth = Arc::new(SpotifyAuth::new(&config.spotify)?);
        let history_source = Arc::new(SpotifyClient::new(config.spotify.api_url.clone())?);
        let analysis = Arc::new(ChatAnalysisClient::new(&config.analysis));
        let generator = Arc::new(ElevenLabsClient::new(
            &config.generation,
            config.output_dir.clone(),
        ));
        Ok(Self::new(config, auth, history_source, analysis, generator))
    }

    /// Pass `result` through, remembering server-side failures for `/health`
    pub async fn record_failure<T>(&self, result: ApiResult<T>) -> ApiResult<T> {
        if let Err(e) = &result {
            if e.is_server_side() {
                error!(error = %e, "Request failed");
                *self.last_error.write().await = Some(e.to_string());
            } else {
                warn!(error = %e, "Request rejected");
            }
        }
        result
    }
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);
    match HeaderValue::from_str(frontend_url.trim_end_matches('/')) {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            warn!(frontend_url, "Frontend URL is not a valid origin; CORS disabled");
            layer
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.frontend_url);

    Router::new()
        .merge(api::auth_routes())
        .merge(api::stats_routes())
        .merge(api::ai_routes())
        .merge(api::music_routes())
        .merge(api::health_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
