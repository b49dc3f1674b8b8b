//! # Wrap Common Library
//!
//! Shared code for the wrap service and its client:
//! - Listening-history, taste-profile and track models
//! - Progress events exchanged over streamed responses
//! - Line-framing decoder for progress channels
//! - Configuration loading helpers
//! - SSE encoding (feature `axum`)

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod progress;
#[cfg(feature = "axum")]
pub mod sse;

pub use error::{Error, Result};
pub use events::{Completion, ProgressEvent};
pub use models::{
    HistoryDataset, HistoryKind, MusicPrompt, TasteProfile, TimeRange, TrackPatch, TrackResult,
    FULL_DURATION_SECONDS, PREVIEW_DURATION_SECONDS,
};
