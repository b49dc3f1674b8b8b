//! HTTP server and routing integration tests
//!
//! The router runs in-process with scripted upstream capabilities; no
//! network access is needed.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wrap_api::auth::{AccessGrant, AuthError, AuthProvider, UserSession};
use wrap_api::config::ServiceConfig;
use wrap_api::services::{
    AnalysisClient, AnalysisError, ComposeRequest, ComposedTrack, FetchError, GenerationError,
    HistoryQuery, HistorySnapshot, HistorySource, MusicGenerator,
};
use wrap_api::{build_router, AppState};
use wrap_common::progress::ProgressDecoder;
use wrap_common::{
    Completion, HistoryDataset, HistoryKind, MusicPrompt, ProgressEvent, TasteProfile,
};

const SESSION: &str = "test-session";

struct FakeAuth;

#[async_trait]
impl AuthProvider for FakeAuth {
    fn authorization_url(&self, state: &str) -> String {
        format!("https://accounts.test/authorize?state={}", state)
    }

    async fn exchange_code(&self, code: &str) -> Result<AccessGrant, AuthError> {
        if code == "rejected" {
            return Err(AuthError::Exchange("invalid_grant".to_string()));
        }
        Ok(AccessGrant {
            access_token: format!("token-{}", code),
            refresh_token: Some("refresh".to_string()),
            expires_in: 3600,
            scope: None,
        })
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<AccessGrant, AuthError> {
        Err(AuthError::Exchange("refresh not scripted".to_string()))
    }
}

struct FakeHistory {
    fail: bool,
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn fetch(
        &self,
        _access_token: &str,
        query: &HistoryQuery,
    ) -> Result<HistoryDataset, FetchError> {
        if self.fail {
            return Err(FetchError::Api(503, "service unavailable".to_string()));
        }
        let items = (0..query.limit)
            .map(|i| json!({"name": format!("{} {}", query.kind, i), "genres": ["indie"]}))
            .collect();
        Ok(HistoryDataset::new(query.kind, query.time_range, items))
    }
}

struct FakeAnalysis;

#[async_trait]
impl AnalysisClient for FakeAnalysis {
    async fn analyze(&self, history: &HistorySnapshot) -> Result<TasteProfile, AnalysisError> {
        if history.is_empty() {
            return Err(AnalysisError::NoHistory);
        }
        Ok(profile(8))
    }
}

/// Fails every attempt for track index 3
struct FakeGenerator;

#[async_trait]
impl MusicGenerator for FakeGenerator {
    async fn compose(&self, request: &ComposeRequest) -> Result<ComposedTrack, GenerationError> {
        if request.track_index == 3 {
            return Err(GenerationError::Api {
                status: 500,
                message: "renderer crashed".to_string(),
            });
        }
        Ok(ComposedTrack {
            filename: format!("track-{}-{}s.mp3", request.track_index + 1, request.duration_seconds),
            duration_seconds: request.duration_seconds,
        })
    }
}

fn profile(n: usize) -> TasteProfile {
    TasteProfile {
        estimated_age: 33,
        age_range: "30-36".to_string(),
        confidence: 0.72,
        reasoning: vec!["2000s indie".to_string()],
        music_generation_directive: "Millennial".to_string(),
        insights: "Loyal to a few artists".to_string(),
        top_genres: vec!["indie".to_string()],
        music_prompts: (0..n)
            .map(|i| MusicPrompt {
                title: format!("Track {}", i + 1),
                prompt: format!("warm indie instrumental number {}", i + 1),
            })
            .collect(),
    }
}

struct TestApp {
    state: AppState,
    _data_dir: tempfile::TempDir,
}

impl TestApp {
    async fn new(history_fails: bool) -> Self {
        let data_dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            data_dir: data_dir.path().to_path_buf(),
            ..Default::default()
        };
        let state = AppState::new(
            config,
            Arc::new(FakeAuth),
            Arc::new(FakeHistory {
                fail: history_fails,
            }),
            Arc::new(FakeAnalysis),
            Arc::new(FakeGenerator),
        );
        state
            .sessions
            .insert(
                SESSION,
                UserSession {
                    access_token: "token".to_string(),
                    refresh_token: None,
                    expires_at: Utc::now() + Duration::hours(1),
                },
            )
            .await;
        Self {
            state,
            _data_dir: data_dir,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        build_router(self.state.clone())
            .oneshot(request)
            .await
            .unwrap()
    }
}

fn get(uri: &str, session: bool) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if session {
        builder = builder.header(header::COOKIE, format!("wrap_session={}", SESSION));
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value, session: bool) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if session {
        builder = builder.header(header::COOKIE, format!("wrap_session={}", SESSION));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn progress_events(response: Response) -> Vec<ProgressEvent> {
    let bytes = body_bytes(response).await;
    let mut decoder = ProgressDecoder::new();
    let events = decoder.push(&bytes).unwrap();
    decoder.finish().unwrap();
    events
}

fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_health_reports_module_and_version() {
    let app = TestApp::new(false).await;
    let response = app.send(get("/health", false)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "wrap-api");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body.get("last_error").is_none());
}

#[tokio::test]
async fn test_status_reflects_session_cookie() {
    let app = TestApp::new(false).await;

    let body = body_json(app.send(get("/auth/status", false)).await).await;
    assert_eq!(body, json!({"authenticated": false}));

    let body = body_json(app.send(get("/auth/status", true)).await).await;
    assert_eq!(body, json!({"authenticated": true}));
}

#[tokio::test]
async fn test_login_redirects_with_state_cookie() {
    let app = TestApp::new(false).await;
    let response = app.send(get("/auth/login", false)).await;
    assert!(response.status().is_redirection());

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("wrap_oauth_state="));
    let state = cookie
        .trim_start_matches("wrap_oauth_state=")
        .split(';')
        .next()
        .unwrap();
    assert_eq!(
        location(&response),
        format!("https://accounts.test/authorize?state={}", state)
    );
}

#[tokio::test]
async fn test_callback_outcomes() {
    let app = TestApp::new(false).await;

    let response = app.send(get("/auth/callback", false)).await;
    assert_eq!(location(&response), "http://127.0.0.1:5173/?error=no_code");

    let request = Request::builder()
        .uri("/auth/callback?code=abc&state=forged")
        .header(header::COOKIE, "wrap_oauth_state=expected")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(location(&response), "http://127.0.0.1:5173/?error=state_mismatch");

    let request = Request::builder()
        .uri("/auth/callback?code=rejected&state=expected")
        .header(header::COOKIE, "wrap_oauth_state=expected")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(location(&response), "http://127.0.0.1:5173/?error=auth_failed");

    let request = Request::builder()
        .uri("/auth/callback?code=abc&state=expected")
        .header(header::COOKIE, "wrap_oauth_state=expected")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(location(&response), "http://127.0.0.1:5173/?success=true");
    let issued_session = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.starts_with("wrap_session=") && !v.starts_with("wrap_session=;"));
    assert!(issued_session);
}

#[tokio::test]
async fn test_logout_is_idempotent() {
    let app = TestApp::new(false).await;

    let request = Request::builder()
        .method("POST")
        .uri("/auth/logout")
        .header(header::COOKIE, format!("wrap_session={}", SESSION))
        .body(Body::empty())
        .unwrap();
    let body = body_json(app.send(request).await).await;
    assert_eq!(body["success"], true);
    assert!(!app.state.sessions.is_authenticated(Some(SESSION)).await);

    let request = Request::builder()
        .method("POST")
        .uri("/auth/logout")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(request).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_history_requires_session() {
    let app = TestApp::new(false).await;
    let response = app.send(get("/stats/top-artists", false)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "AUTH_ERROR");
}

#[tokio::test]
async fn test_history_proxy_and_limit_validation() {
    let app = TestApp::new(false).await;

    let response = app
        .send(get("/stats/top-tracks?time_range=short_term&limit=5", true))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "topTracks");
    assert_eq!(body["timeRange"], "short_term");
    assert_eq!(body["items"].as_array().unwrap().len(), 5);

    let response = app.send(get("/stats/recently-played?limit=51", true)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.send(get("/stats/top-artists?time_range=forever", true)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_save_route_writes_envelope() {
    let app = TestApp::new(false).await;
    let response = app
        .send(post_json(
            "/stats/save-top-artists?time_range=long_term&limit=50",
            json!({"data": {"items": [{"name": "a"}, {"name": "b"}]}}),
            true,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let receipt = body_json(response).await;
    assert_eq!(receipt["success"], true);
    assert_eq!(receipt["itemCount"], 2);
    assert!(receipt["filename"].as_str().unwrap().starts_with("top-artists-"));

    let envelope = app.state.archive.latest("top-artists").await.unwrap().unwrap();
    assert_eq!(envelope.metadata.extra["timeRange"], "long_term");
    assert_eq!(envelope.metadata.extra["description"], "All time");
}

#[tokio::test]
async fn test_archive_all_then_analyze() {
    let app = TestApp::new(false).await;

    let response = app
        .send(post_json("/ai/guess-music-age", json!({}), true))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .send(post_json("/stats/archive-all?limit=10", json!({}), true))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let receipts = body_json(response).await;
    assert_eq!(receipts.as_array().unwrap().len(), 3);
    for kind in HistoryKind::ALL {
        assert!(app.state.archive.latest(kind.archive_type()).await.unwrap().is_some());
    }

    let response = app
        .send(post_json("/ai/guess-music-age", json!({}), true))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["analysis"]["musicPrompts"].as_array().unwrap().len(), 8);
    assert_eq!(body["analysis"]["musicGeneration"], "Millennial");
}

#[tokio::test]
async fn test_failed_history_stage_is_recorded_for_health() {
    let app = TestApp::new(true).await;

    let response = app
        .send(post_json("/stats/archive-all", json!({}), true))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["error"]["code"], "UPSTREAM_FETCH_ERROR");

    let health = body_json(app.send(get("/health", false)).await).await;
    assert_eq!(health["status"], "degraded");
    assert!(health["last_error"].as_str().unwrap().contains("503"));
}

#[tokio::test]
async fn test_generation_stream_tolerates_failed_track() {
    let app = TestApp::new(false).await;
    let response = app
        .send(post_json(
            "/music/generate-from-analysis",
            json!({"analysis": profile(8), "duration": 20}),
            false,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let events = progress_events(response).await;
    assert_eq!(events.len(), 9);
    let mut last = 0;
    for event in &events[..8] {
        match event {
            ProgressEvent::Progress { current, total } => {
                assert_eq!(*total, 8);
                assert!(*current > last);
                last = *current;
            }
            other => panic!("expected progress, got {:?}", other),
        }
    }
    assert_eq!(last, 8);

    match &events[8] {
        ProgressEvent::Complete(Completion::Batch { tracks }) => {
            assert_eq!(tracks.len(), 8);
            assert!(!tracks[3].success);
            assert!(tracks[3].error.as_deref().unwrap().contains("renderer crashed"));
            assert_eq!(tracks.iter().filter(|t| t.success).count(), 7);
            assert!(tracks
                .iter()
                .enumerate()
                .all(|(i, t)| t.track_index == i));
        }
        other => panic!("expected batch completion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_generation_input_is_validated_before_streaming() {
    let app = TestApp::new(false).await;

    let response = app
        .send(post_json(
            "/music/generate-from-analysis",
            json!({"analysis": profile(8), "duration": 0}),
            false,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(post_json(
            "/music/generate-from-analysis",
            json!({"analysis": profile(0)}),
            false,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(post_json(
            "/music/expand-track",
            json!({"prompt": "  ", "trackIndex": 1}),
            false,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_expand_track_stream() {
    let app = TestApp::new(false).await;

    let response = app
        .send(post_json(
            "/music/expand-track",
            json!({"prompt": "warm indie instrumental number 3", "trackIndex": 2}),
            false,
        ))
        .await;
    let events = progress_events(response).await;
    assert_eq!(
        &events[..2],
        &[ProgressEvent::progress(0, 1), ProgressEvent::progress(1, 1)]
    );
    match &events[2] {
        ProgressEvent::Complete(Completion::Single { result }) => {
            assert_eq!(result.duration_seconds, Some(120));
            assert_eq!(result.filename.as_deref(), Some("track-3-120s.mp3"));
        }
        other => panic!("expected single completion, got {:?}", other),
    }

    let response = app
        .send(post_json(
            "/music/expand-track",
            json!({"prompt": "anything", "trackIndex": 3}),
            false,
        ))
        .await;
    let events = progress_events(response).await;
    assert!(matches!(events.last(), Some(ProgressEvent::Error { .. })));
}
