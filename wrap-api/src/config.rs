//! Configuration for wrap-api
//!
//! Bootstrap settings come from a TOML file (missing file → defaults).
//! Credentials resolve ENV → TOML; see [`ServiceConfig::load`].

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;
use wrap_common::config::{load_toml_or_default, resolve_config_path, resolve_secret, LoggingConfig};
use wrap_common::{Error, Result, FULL_DURATION_SECONDS, PREVIEW_DURATION_SECONDS};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "WRAP_CONFIG";

/// Complete service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Bind address
    pub host: String,
    /// HTTP port
    pub port: u16,
    /// Directory holding archived history envelopes
    pub data_dir: PathBuf,
    /// Directory receiving generated audio
    pub output_dir: PathBuf,
    /// Browser frontend; OAuth callbacks redirect here and CORS allows it
    pub frontend_url: String,
    pub spotify: SpotifyConfig,
    pub analysis: AnalysisConfig,
    pub generation: GenerationConfig,
    pub logging: LoggingConfig,
}

/// Music-history provider (OAuth + Web API)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub accounts_url: String,
    pub api_url: String,
    pub scopes: Vec<String>,
}

/// Chat-completions endpoint used for taste analysis
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Number of music prompts requested from the model
    pub prompt_count: usize,
    pub timeout_secs: u64,
}

/// Music-generation endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub output_format: String,
    /// Track attempts in flight at once during batch generation
    pub concurrency: usize,
    pub preview_seconds: u32,
    pub full_seconds: u32,
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
            frontend_url: "http://127.0.0.1:5173".to_string(),
            spotify: SpotifyConfig::default(),
            analysis: AnalysisConfig::default(),
            generation: GenerationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: "http://127.0.0.1:3001/auth/callback".to_string(),
            accounts_url: "https://accounts.spotify.com".to_string(),
            api_url: "https://api.spotify.com/v1".to_string(),
            scopes: vec![
                "user-top-read".to_string(),
                "user-read-recently-played".to_string(),
            ],
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            prompt_count: 8,
            timeout_secs: 120,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.elevenlabs.io".to_string(),
            api_key: None,
            output_format: "mp3_44100_128".to_string(),
            concurrency: 2,
            preview_seconds: PREVIEW_DURATION_SECONDS,
            full_seconds: FULL_DURATION_SECONDS,
            timeout_secs: 300,
        }
    }
}

impl ServiceConfig {
    /// Load TOML (CLI path → `WRAP_CONFIG` → `<config_dir>/wrap/wrap-api.toml`)
    /// and resolve credentials from the environment
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(cli_path, CONFIG_ENV_VAR, "wrap-api");
        let mut config: ServiceConfig = load_toml_or_default(path.as_deref())?;
        config.resolve_credentials();
        config.validate()?;
        Ok(config)
    }

    fn resolve_credentials(&mut self) {
        self.spotify.client_id =
            resolve_secret("SPOTIFY_CLIENT_ID", self.spotify.client_id.as_deref());
        self.spotify.client_secret =
            resolve_secret("SPOTIFY_CLIENT_SECRET", self.spotify.client_secret.as_deref());
        self.analysis.api_key =
            resolve_secret("ANALYSIS_API_KEY", self.analysis.api_key.as_deref());
        self.generation.api_key =
            resolve_secret("ELEVENLABS_API_KEY", self.generation.api_key.as_deref());
    }

    /// Check values that would otherwise fail on first use
    pub fn validate(&self) -> Result<()> {
        if self.spotify.client_id.is_none() || self.spotify.client_secret.is_none() {
            return Err(Error::Config(
                "Spotify credentials not configured. Set SPOTIFY_CLIENT_ID and \
                 SPOTIFY_CLIENT_SECRET, or add client_id / client_secret under [spotify] \
                 in wrap-api.toml"
                    .to_string(),
            ));
        }
        if self.analysis.api_key.is_none() {
            warn!("ANALYSIS_API_KEY not configured: analysis requests will be rejected upstream");
        }
        if self.generation.api_key.is_none() {
            warn!("ELEVENLABS_API_KEY not configured: generation requests will be rejected upstream");
        }
        if self.analysis.prompt_count == 0 {
            return Err(Error::Config("analysis.prompt_count must be at least 1".to_string()));
        }
        if self.generation.concurrency == 0 {
            return Err(Error::Config("generation.concurrency must be at least 1".to_string()));
        }
        if self.generation.preview_seconds >= self.generation.full_seconds {
            return Err(Error::Config(format!(
                "generation.preview_seconds ({}) must be shorter than full_seconds ({})",
                self.generation.preview_seconds, self.generation.full_seconds
            )));
        }
        Ok(())
    }

    /// Socket address string for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
