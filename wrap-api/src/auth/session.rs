//! Session-bound authentication state
//!
//! Sessions live in memory for the process lifetime and are keyed by the
//! `wrap_session` cookie. A new session id is issued on every successful login.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use super::{AccessGrant, AuthError, AuthProvider};

/// Cookie carrying the session id
pub const SESSION_COOKIE: &str = "wrap_session";

/// Cookie carrying the OAuth `state` between login and callback
pub const STATE_COOKIE: &str = "wrap_oauth_state";

/// Tokens are refreshed once they are this close to expiry
const REFRESH_MARGIN_SECS: i64 = 60;

/// Tokens held for one browser session
#[derive(Debug, Clone)]
pub struct UserSession {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl UserSession {
    pub fn from_grant(grant: AccessGrant, previous_refresh: Option<String>) -> Self {
        Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.or(previous_refresh),
            expires_at: Utc::now() + Duration::seconds(grant.expires_in as i64),
        }
    }

    fn needs_refresh(&self) -> bool {
        self.expires_at - Utc::now() < Duration::seconds(REFRESH_MARGIN_SECS)
    }

    fn is_usable(&self) -> bool {
        !self.needs_refresh() || self.refresh_token.is_some()
    }
}

/// In-memory session table
///
/// The table lock is only held for lookups and writes. Token refreshes run
/// outside it, serialized per session by `refresh_locks`.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, UserSession>>,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exchange `code` and bind the tokens to a fresh session id
    pub async fn authenticate(
        &self,
        provider: &dyn AuthProvider,
        code: &str,
        previous_session: Option<&str>,
    ) -> Result<String, AuthError> {
        let grant = provider.exchange_code(code).await?;
        let session_id = Uuid::new_v4().to_string();

        let mut sessions = self.sessions.write().await;
        if let Some(previous) = previous_session {
            sessions.remove(previous);
        }
        sessions.insert(session_id.clone(), UserSession::from_grant(grant, None));
        info!(active_sessions = sessions.len(), "User authenticated");

        Ok(session_id)
    }

    /// Bind an already obtained session (used when restoring or testing)
    pub async fn insert(&self, session_id: impl Into<String>, session: UserSession) {
        self.sessions.write().await.insert(session_id.into(), session);
    }

    pub async fn is_authenticated(&self, session_id: Option<&str>) -> bool {
        let Some(session_id) = session_id else {
            return false;
        };
        self.sessions
            .read()
            .await
            .get(session_id)
            .is_some_and(UserSession::is_usable)
    }

    /// Forget a session; returns whether it existed
    pub async fn logout(&self, session_id: Option<&str>) -> bool {
        let Some(session_id) = session_id else {
            return false;
        };
        let removed = self.sessions.write().await.remove(session_id).is_some();
        self.refresh_locks.lock().await.remove(session_id);
        if removed {
            info!("User logged out");
        }
        removed
    }

    /// Current access token for the session, refreshed when near expiry
    pub async fn access_token(
        &self,
        provider: &dyn AuthProvider,
        session_id: Option<&str>,
    ) -> Result<String, AuthError> {
        let session_id = session_id.ok_or(AuthError::NotAuthenticated)?;

        {
            let sessions = self.sessions.read().await;
            let session = sessions.get(session_id).ok_or(AuthError::NotAuthenticated)?;
            if !session.needs_refresh() {
                return Ok(session.access_token.clone());
            }
        }

        // Concurrent callers of one session serialize here; only the first refreshes.
        let refresh_lock = self.refresh_lock(session_id).await;
        let _refreshing = refresh_lock.lock().await;

        let refresh_token = {
            let sessions = self.sessions.read().await;
            let session = sessions.get(session_id).ok_or(AuthError::NotAuthenticated)?;
            if !session.needs_refresh() {
                return Ok(session.access_token.clone());
            }
            session
                .refresh_token
                .clone()
                .ok_or(AuthError::NotAuthenticated)?
        };

        let grant = provider.refresh(&refresh_token).await?;

        let mut sessions = self.sessions.write().await;
        // Logged out while the refresh was in flight
        let session = sessions
            .get_mut(session_id)
            .ok_or(AuthError::NotAuthenticated)?;
        *session = UserSession::from_grant(grant, Some(refresh_token));
        debug!(expires_at = %session.expires_at, "Access token refreshed");

        Ok(session.access_token.clone())
    }

    async fn refresh_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }
}
