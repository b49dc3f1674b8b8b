//! OAuth authentication against the music-history provider
//!
//! [`AuthProvider`] is the capability the routes depend on: building the
//! authorization URL and exchanging or refreshing codes for tokens.
//! [`SpotifyAuth`] implements it over the provider's accounts service;
//! [`SessionStore`] binds the resulting tokens to browser sessions.

mod session;

pub use session::{SessionStore, UserSession, SESSION_COOKIE, STATE_COOKIE};

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::SpotifyConfig;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authorization callback carried no code")]
    MissingCode,

    #[error("OAuth state did not match the login request")]
    StateMismatch,

    #[error("Token exchange failed: {0}")]
    Exchange(String),

    #[error("No authenticated session")]
    NotAuthenticated,

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl AuthError {
    /// Value of the `error` query parameter on the frontend redirect
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingCode => "no_code",
            AuthError::StateMismatch => "state_mismatch",
            _ => "auth_failed",
        }
    }
}

/// Tokens returned by a code exchange or refresh
#[derive(Debug, Clone, Deserialize)]
pub struct AccessGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds
    pub expires_in: u64,
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth capability consumed by the auth routes and the session store
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// URL the browser is redirected to for consent
    fn authorization_url(&self, state: &str) -> String;

    /// Exchange an authorization code for tokens
    async fn exchange_code(&self, code: &str) -> Result<AccessGrant, AuthError>;

    /// Obtain a fresh access token
    async fn refresh(&self, refresh_token: &str) -> Result<AccessGrant, AuthError>;
}

/// Authorization-code flow against the Spotify accounts service
pub struct SpotifyAuth {
    http_client: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    accounts_url: String,
    scopes: Vec<String>,
}

impl SpotifyAuth {
    pub fn new(config: &SpotifyConfig) -> Result<Self, AuthError> {
        let client_id = config
            .client_id
            .clone()
            .ok_or_else(|| AuthError::NotConfigured("client_id".to_string()))?;
        let client_secret = config
            .client_secret
            .clone()
            .ok_or_else(|| AuthError::NotConfigured("client_secret".to_string()))?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        Ok(Self {
            http_client,
            client_id,
            client_secret,
            redirect_uri: config.redirect_uri.clone(),
            accounts_url: config.accounts_url.trim_end_matches('/').to_string(),
            scopes: config.scopes.clone(),
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<AccessGrant, AuthError> {
        let url = format!("{}/api/token", self.accounts_url);
        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Exchange(format!("status {}: {}", status.as_u16(), body)));
        }

        response
            .json::<AccessGrant>()
            .await
            .map_err(|e| AuthError::Exchange(format!("invalid token response: {}", e)))
    }
}

#[async_trait]
impl AuthProvider for SpotifyAuth {
    fn authorization_url(&self, state: &str) -> String {
        format!(
            "{}/authorize?response_type=code&client_id={}&scope={}&redirect_uri={}&state={}",
            self.accounts_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.scopes.join(" ")),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<AccessGrant, AuthError> {
        debug!("Exchanging authorization code");
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.redirect_uri),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AccessGrant, AuthError> {
        debug!("Refreshing access token");
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SpotifyConfig {
        SpotifyConfig {
            client_id: Some("client id".to_string()),
            client_secret: Some("secret".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_authorization_url_encodes_parameters() {
        let auth = SpotifyAuth::new(&config()).unwrap();
        let url = auth.authorization_url("abc123");
        assert!(url.starts_with("https://accounts.spotify.com/authorize?response_type=code"));
        assert!(url.contains("client_id=client%20id"));
        assert!(url.contains("scope=user-top-read%20user-read-recently-played"));
        assert!(url.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A3001%2Fauth%2Fcallback"));
        assert!(url.ends_with("state=abc123"));
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let err = SpotifyAuth::new(&SpotifyConfig::default()).err().unwrap();
        assert!(matches!(err, AuthError::NotConfigured(_)));
    }

    #[test]
    fn test_error_reasons() {
        assert_eq!(AuthError::MissingCode.reason(), "no_code");
        assert_eq!(AuthError::StateMismatch.reason(), "state_mismatch");
        assert_eq!(AuthError::Exchange("x".to_string()).reason(), "auth_failed");
    }
}
