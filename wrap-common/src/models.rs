//! Shared data model
//!
//! Listening-history datasets, the taste profile produced by analysis, and
//! per-track generation results. Wire names are camelCase.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Duration of the preview tracks generated upfront
pub const PREVIEW_DURATION_SECONDS: u32 = 20;

/// Duration of a track after expansion
pub const FULL_DURATION_SECONDS: u32 = 120;

/// Kind of listening-history dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HistoryKind {
    TopArtists,
    TopTracks,
    RecentlyPlayed,
}

impl HistoryKind {
    /// All kinds, in the order the default flow fetches them
    pub const ALL: [HistoryKind; 3] = [
        HistoryKind::TopArtists,
        HistoryKind::TopTracks,
        HistoryKind::RecentlyPlayed,
    ];

    /// Archive `type` tag, also the archive filename prefix
    pub fn archive_type(&self) -> &'static str {
        match self {
            HistoryKind::TopArtists => "top-artists",
            HistoryKind::TopTracks => "top-tracks",
            HistoryKind::RecentlyPlayed => "recently-played",
        }
    }

    /// Whether the upstream endpoint for this kind accepts a time range
    pub fn is_ranged(&self) -> bool {
        !matches!(self, HistoryKind::RecentlyPlayed)
    }
}

impl fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.archive_type())
    }
}

/// Upstream time window for top-item queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    ShortTerm,
    #[default]
    MediumTerm,
    LongTerm,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::ShortTerm => "short_term",
            TimeRange::MediumTerm => "medium_term",
            TimeRange::LongTerm => "long_term",
        }
    }

    /// Human-readable description stored in archive metadata
    pub fn description(&self) -> &'static str {
        match self {
            TimeRange::ShortTerm => "Last 4 weeks",
            TimeRange::MediumTerm => "Last 6 months",
            TimeRange::LongTerm => "All time",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "short_term" => Ok(TimeRange::ShortTerm),
            "medium_term" => Ok(TimeRange::MediumTerm),
            "long_term" => Ok(TimeRange::LongTerm),
            other => Err(Error::InvalidInput(format!("Unknown time range: {}", other))),
        }
    }
}

/// One fetched listening-history dataset
///
/// Immutable once fetched. `items` keeps the upstream objects untouched and in
/// upstream order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryDataset {
    pub kind: HistoryKind,
    pub time_range: Option<TimeRange>,
    pub items: Vec<Value>,
}

impl HistoryDataset {
    pub fn new(kind: HistoryKind, time_range: Option<TimeRange>, items: Vec<Value>) -> Self {
        Self {
            kind,
            time_range,
            items,
        }
    }
}

/// Title and generation prompt for one track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicPrompt {
    pub title: String,
    pub prompt: String,
}

/// Taste profile produced by the analysis service
///
/// The number of entries in `music_prompts` is the number of tracks a
/// generation run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasteProfile {
    pub estimated_age: i64,
    pub age_range: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Vec<String>,
    #[serde(rename = "musicGeneration", alias = "musicGenerationDirective")]
    pub music_generation_directive: String,
    #[serde(default)]
    pub insights: String,
    #[serde(default)]
    pub top_genres: Vec<String>,
    pub music_prompts: Vec<MusicPrompt>,
}

impl TasteProfile {
    /// Number of tracks a generation run for this profile produces
    pub fn track_count(&self) -> usize {
        self.music_prompts.len()
    }

    /// Check the invariants a profile must hold before it drives generation
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::InvalidInput(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        if self.music_prompts.is_empty() {
            return Err(Error::InvalidInput("profile has no music prompts".to_string()));
        }
        if let Some(index) = self.music_prompts.iter().position(|p| p.prompt.trim().is_empty()) {
            return Err(Error::InvalidInput(format!(
                "music prompt {} is empty",
                index
            )));
        }
        Ok(())
    }
}

/// Outcome of one track's generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackResult {
    pub track_index: usize,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(
        default,
        rename = "duration",
        alias = "durationSeconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrackResult {
    /// Slot for a track whose generation has started but not resolved
    pub fn placeholder(track_index: usize, prompt: &MusicPrompt) -> Self {
        Self {
            track_index,
            success: false,
            title: Some(prompt.title.clone()),
            filename: None,
            duration_seconds: None,
            prompt: Some(prompt.prompt.clone()),
            error: None,
        }
    }

    /// Finalize a placeholder as generated
    pub fn succeed(mut self, filename: String, duration_seconds: u32) -> Self {
        self.success = true;
        self.filename = Some(filename);
        self.duration_seconds = Some(duration_seconds);
        self.error = None;
        self
    }

    /// Finalize a placeholder as failed with the upstream message
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    pub fn is_preview(&self) -> bool {
        self.success && self.duration_seconds == Some(PREVIEW_DURATION_SECONDS)
    }

    /// Merge the fields present in `patch`, leaving the others untouched
    pub fn apply(&mut self, patch: &TrackPatch) {
        if let Some(success) = patch.success {
            self.success = success;
        }
        if let Some(title) = &patch.title {
            self.title = Some(title.clone());
        }
        if let Some(filename) = &patch.filename {
            self.filename = Some(filename.clone());
        }
        if let Some(duration) = patch.duration_seconds {
            self.duration_seconds = Some(duration);
        }
        if let Some(prompt) = &patch.prompt {
            self.prompt = Some(prompt.clone());
        }
        if patch.error.is_some() {
            self.error = patch.error.clone();
        }
    }
}

/// Partial `TrackResult` delivered by a single-track expansion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(
        default,
        rename = "duration",
        alias = "durationSeconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
