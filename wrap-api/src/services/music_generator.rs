//! Music generation client
//!
//! Renders one prompt into an audio file in the output directory. Each call
//! is a single attempt; the orchestrator decides what a failure means for the
//! surrounding run.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::GenerationConfig;

/// Longest track a single request may ask for
pub const MAX_DURATION_SECONDS: u32 = 300;

/// Failure of one generation attempt
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Generation request timed out")]
    Timeout,

    #[error("Generation API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Generation API returned no audio")]
    EmptyAudio,

    #[error("Failed to store audio at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One track to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeRequest {
    pub track_index: usize,
    pub prompt: String,
    pub duration_seconds: u32,
}

/// A rendered track on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedTrack {
    pub filename: String,
    pub duration_seconds: u32,
}

/// Music generation capability
#[async_trait]
pub trait MusicGenerator: Send + Sync {
    async fn compose(&self, request: &ComposeRequest) -> Result<ComposedTrack, GenerationError>;
}

/// Output filename: `track-<index+1>-<seconds>s-<timestamp>.mp3`
pub fn track_filename(track_index: usize, duration_seconds: u32) -> String {
    let stamp = Utc::now()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("track-{}-{}s-{}.mp3", track_index + 1, duration_seconds, stamp)
}

#[derive(Debug, Serialize)]
struct MusicRequest<'a> {
    prompt: &'a str,
    music_length_ms: u64,
}

/// ElevenLabs music API client
pub struct ElevenLabsClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    output_format: String,
    output_dir: PathBuf,
    timeout: Duration,
}

impl ElevenLabsClient {
    pub fn new(config: &GenerationConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            output_format: config.output_format.clone(),
            output_dir: output_dir.into(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn store(&self, filename: &str, audio: &[u8]) -> Result<(), GenerationError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| GenerationError::Storage {
                path: self.output_dir.clone(),
                source,
            })?;
        let path = self.output_dir.join(filename);
        tokio::fs::write(&path, audio)
            .await
            .map_err(|source| GenerationError::Storage { path, source })
    }
}

#[async_trait]
impl MusicGenerator for ElevenLabsClient {
    async fn compose(&self, request: &ComposeRequest) -> Result<ComposedTrack, GenerationError> {
        let url = format!(
            "{}/v1/music?output_format={}",
            self.base_url, self.output_format
        );
        let body = MusicRequest {
            prompt: &request.prompt,
            music_length_ms: u64::from(request.duration_seconds) * 1000,
        };

        debug!(
            track_index = request.track_index,
            duration = request.duration_seconds,
            "Requesting track"
        );

        let mut builder = self
            .http_client
            .post(&url)
            .json(&body)
            .timeout(self.timeout);
        if let Some(key) = &self.api_key {
            builder = builder.header("xi-api-key", key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout
            } else {
                GenerationError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;
        if audio.is_empty() {
            return Err(GenerationError::EmptyAudio);
        }

        let filename = track_filename(request.track_index, request.duration_seconds);
        self.store(&filename, &audio).await?;

        info!(
            track_index = request.track_index,
            filename = %filename,
            bytes = audio.len(),
            "Track stored"
        );

        Ok(ComposedTrack {
            filename,
            duration_seconds: request.duration_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_filename_shape() {
        let name = track_filename(2, 120);
        assert!(name.starts_with("track-3-120s-"));
        assert!(name.ends_with("Z.mp3"));
        assert!(!name.contains(':'));
    }

    #[test]
    fn test_request_body_uses_milliseconds() {
        let body = MusicRequest {
            prompt: "ambient piano",
            music_length_ms: u64::from(20u32) * 1000,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"prompt": "ambient piano", "music_length_ms": 20000})
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = ElevenLabsClient::new(
            &GenerationConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                timeout_secs: 5,
                ..Default::default()
            },
            dir.path(),
        );
        let result = client
            .compose(&ComposeRequest {
                track_index: 0,
                prompt: "lofi".to_string(),
                duration_seconds: 20,
            })
            .await;
        assert!(matches!(
            result,
            Err(GenerationError::Network(_)) | Err(GenerationError::Timeout)
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
