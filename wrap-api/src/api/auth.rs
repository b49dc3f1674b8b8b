//! OAuth login flow
//!
//! Login redirects to the provider with a random `state` kept in a cookie;
//! the callback checks it, binds the tokens to a new session and sends the
//! browser back to the frontend with `?success=true` or `?error=<reason>`.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::session_id;
use crate::auth::{AuthError, SESSION_COOKIE, STATE_COOKIE};
use crate::AppState;

/// Query string of the provider's redirect back to us
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user denies consent
    pub error: Option<String>,
}

fn cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

fn frontend_redirect(state: &AppState, query: &str) -> Redirect {
    let base = state.config.frontend_url.trim_end_matches('/');
    Redirect::to(&format!("{}/?{}", base, query))
}

/// GET /auth/login
pub async fn login(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    let oauth_state = Uuid::new_v4().simple().to_string();
    let url = state.auth.authorization_url(&oauth_state);
    (
        jar.add(cookie(STATE_COOKIE, oauth_state)),
        Redirect::to(&url),
    )
}

/// GET /auth/callback
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> (CookieJar, Redirect) {
    let expected_state = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.remove(Cookie::build(STATE_COOKIE).path("/"));

    let outcome = async {
        if let Some(denied) = &params.error {
            return Err(AuthError::Exchange(format!("provider returned {}", denied)));
        }
        let code = params.code.as_deref().ok_or(AuthError::MissingCode)?;
        if expected_state.is_none() || params.state != expected_state {
            return Err(AuthError::StateMismatch);
        }
        let previous = session_id(&jar);
        state
            .sessions
            .authenticate(state.auth.as_ref(), code, previous.as_deref())
            .await
    }
    .await;

    match outcome {
        Ok(session) => {
            info!("OAuth callback completed");
            (
                jar.add(cookie(SESSION_COOKIE, session)),
                frontend_redirect(&state, "success=true"),
            )
        }
        Err(e) => {
            warn!(reason = e.reason(), error = %e, "OAuth callback failed");
            (
                jar,
                frontend_redirect(&state, &format!("error={}", e.reason())),
            )
        }
    }
}

/// POST /auth/logout
///
/// Idempotent: logging out an unknown or missing session also succeeds.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let session = session_id(&jar);
    state.sessions.logout(session.as_deref()).await;
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Json(json!({ "success": true, "message": "Logged out successfully" })),
    )
}

/// GET /auth/status
pub async fn status(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let session = session_id(&jar);
    let authenticated = state.sessions.is_authenticated(session.as_deref()).await;
    Json(json!({ "authenticated": authenticated }))
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", get(login))
        .route("/auth/callback", get(callback))
        .route("/auth/logout", post(logout))
        .route("/auth/status", get(status))
}
