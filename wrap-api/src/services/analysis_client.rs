//! Taste analysis client
//!
//! Submits a summary of the user's archived listening history to a
//! chat-completions model and parses the taste profile it returns. No retry:
//! a failed analysis aborts the pipeline run that requested it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use wrap_common::TasteProfile;

use crate::config::AnalysisConfig;

/// Artists, tracks and plays included in the prompt, per list
const SUMMARY_ITEMS: usize = 25;

/// Analysis errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("No listening history archived yet")]
    NoHistory,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Analysis request timed out")]
    Timeout,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid taste profile: {0}")]
    InvalidProfile(String),
}

/// Aggregated listening history submitted for analysis
///
/// Each field holds the `data` of the newest archive envelope of that kind.
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    pub top_artists: Option<Value>,
    pub top_tracks: Option<Value>,
    pub recently_played: Option<Value>,
}

impl HistorySnapshot {
    pub fn is_empty(&self) -> bool {
        self.top_artists.is_none() && self.top_tracks.is_none() && self.recently_played.is_none()
    }

    /// Plain-text digest of the history for the prompt
    pub fn summarize(&self) -> String {
        let artists: Vec<String> = items(&self.top_artists)
            .iter()
            .take(SUMMARY_ITEMS)
            .filter_map(|artist| {
                let name = artist.get("name")?.as_str()?;
                let genres = string_list(artist.get("genres"));
                Some(if genres.is_empty() {
                    name.to_string()
                } else {
                    format!("{} ({})", name, genres.join(", "))
                })
            })
            .collect();

        let tracks: Vec<String> = items(&self.top_tracks)
            .iter()
            .take(SUMMARY_ITEMS)
            .filter_map(describe_track)
            .collect();

        let recent: Vec<String> = items(&self.recently_played)
            .iter()
            .take(SUMMARY_ITEMS)
            .filter_map(|play| describe_track(play.get("track")?))
            .collect();

        let mut summary = String::new();
        for (heading, lines) in [
            ("Top artists", artists),
            ("Top tracks", tracks),
            ("Recently played", recent),
        ] {
            summary.push_str(heading);
            summary.push_str(":\n");
            if lines.is_empty() {
                summary.push_str("- (none)\n");
            }
            for line in lines {
                summary.push_str("- ");
                summary.push_str(&line);
                summary.push('\n');
            }
        }
        summary
    }
}

fn items(dataset: &Option<Value>) -> &[Value] {
    dataset
        .as_ref()
        .and_then(|d| d.get("items"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn string_list(value: Option<&Value>) -> Vec<&str> {
    value
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn describe_track(track: &Value) -> Option<String> {
    let name = track.get("name")?.as_str()?;
    let artists: Vec<&str> = track
        .get("artists")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|a| a.get("name").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    Some(if artists.is_empty() {
        name.to_string()
    } else {
        format!("{} by {}", name, artists.join(", "))
    })
}

/// Analysis capability
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, history: &HistorySnapshot) -> Result<TasteProfile, AnalysisError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Chat-completions backed analysis client
pub struct ChatAnalysisClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    prompt_count: usize,
    timeout: Duration,
}

impl ChatAnalysisClient {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            prompt_count: config.prompt_count,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn instructions(&self) -> String {
        format!(
            "Estimate the listener's age from their listening history and design music for them. \
             Respond with a single JSON object with these fields: \
             estimatedAge (integer), ageRange (string such as \"25-30\"), \
             confidence (number between 0 and 1), reasoning (array of short strings), \
             musicGeneration (string naming the generation whose music they favor), \
             insights (string), topGenres (array of strings), \
             musicPrompts (array of exactly {} objects with title and prompt, where prompt is a \
             detailed instrumental music-generation prompt matched to their taste).",
            self.prompt_count
        )
    }
}

#[async_trait]
impl AnalysisClient for ChatAnalysisClient {
    async fn analyze(&self, history: &HistorySnapshot) -> Result<TasteProfile, AnalysisError> {
        if history.is_empty() {
            return Err(AnalysisError::NoHistory);
        }

        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "You are a music analyst. Reply with JSON only.".to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format!("{}\n\n{}", self.instructions(), history.summarize()),
                },
            ],
            temperature: 0.7,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        debug!(model = %self.model, "Sending analysis request");

        let mut builder = self.client.post(&url).json(&request).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AnalysisError::Timeout
            } else {
                AnalysisError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            AnalysisError::InvalidResponse(format!("Failed to parse completion: {}", e))
        })?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AnalysisError::InvalidResponse("completion has no choices".to_string()))?;

        let profile = parse_profile(&content)?;
        if profile.track_count() != self.prompt_count {
            warn!(
                requested = self.prompt_count,
                returned = profile.track_count(),
                "Model returned a different number of music prompts"
            );
        }

        info!(
            estimated_age = profile.estimated_age,
            prompts = profile.track_count(),
            "Taste analysis complete"
        );
        Ok(profile)
    }
}

/// Parse and validate a profile from model output, tolerating code fences
pub fn parse_profile(content: &str) -> Result<TasteProfile, AnalysisError> {
    let trimmed = content.trim();
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    let profile: TasteProfile = serde_json::from_str(json.trim())
        .map_err(|e| AnalysisError::InvalidResponse(format!("Profile is not valid JSON: {}", e)))?;
    profile
        .validate()
        .map_err(|e| AnalysisError::InvalidProfile(e.to_string()))?;
    Ok(profile)
}
