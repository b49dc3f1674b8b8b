//! HTTP API handlers for wrap-api

pub mod ai;
pub mod auth;
pub mod health;
pub mod music;
pub mod stats;

pub use ai::ai_routes;
pub use auth::auth_routes;
pub use health::health_routes;
pub use music::music_routes;
pub use stats::stats_routes;

use axum_extra::extract::cookie::CookieJar;

use crate::auth::SESSION_COOKIE;
use crate::{ApiResult, AppState};

/// Session id carried by the request's session cookie
pub(crate) fn session_id(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE).map(|cookie| cookie.value().to_string())
}

/// Access token for the request's session, refreshed if near expiry
pub(crate) async fn access_token(state: &AppState, jar: &CookieJar) -> ApiResult<String> {
    let session = session_id(jar);
    let token = state
        .sessions
        .access_token(state.auth.as_ref(), session.as_deref())
        .await?;
    Ok(token)
}
