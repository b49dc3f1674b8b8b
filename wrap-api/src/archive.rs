//! Archive store
//!
//! Persists structured payloads as JSON files wrapped in a metadata envelope:
//!
//! ```json
//! { "metadata": { "timestamp": "...", "type": "top-artists", "itemCount": 50, ... },
//!   "data": { ... } }
//! ```
//!
//! One file per archive call, named `<type>-<timestamp>.json` with `:` and `.`
//! of the ISO-8601 timestamp replaced by `-`. The store is constructed once at
//! startup and shared; it owns nothing but its directory path, and the
//! directory is created on first use.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;
use wrap_common::{HistoryKind, TimeRange};

/// Archive persistence errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to create archive directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("Failed to write archive {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Failed to read archive {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to encode archive payload: {0}")]
    Encode(serde_json::Error),

    #[error("Corrupt archive {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Envelope metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMetadata {
    /// ISO-8601 UTC timestamp with milliseconds
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub item_count: usize,
    /// Caller-supplied fields (e.g. `timeRange`, `description`)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Persisted payload with its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEnvelope {
    pub metadata: ArchiveMetadata,
    pub data: Value,
}

/// A written envelope and where it went
#[derive(Debug, Clone)]
pub struct ArchiveRecord {
    pub filename: String,
    pub filepath: PathBuf,
    pub envelope: ArchiveEnvelope,
}

/// Response body of archive operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveReceipt {
    pub success: bool,
    pub filename: String,
    pub filepath: String,
    pub item_count: usize,
}

impl ArchiveRecord {
    pub fn receipt(&self) -> ArchiveReceipt {
        ArchiveReceipt {
            success: true,
            filename: self.filename.clone(),
            filepath: self.filepath.display().to_string(),
            item_count: self.envelope.metadata.item_count,
        }
    }
}

/// Item count of an archived payload
///
/// Length of `data` when it is an array, of `data.items` when that is an
/// array, otherwise 0.
pub fn item_count(data: &Value) -> usize {
    match data {
        Value::Array(items) => items.len(),
        Value::Object(fields) => match fields.get("items") {
            Some(Value::Array(items)) => items.len(),
            _ => 0,
        },
        _ => 0,
    }
}

/// Filesystem-safe timestamp part of archive filenames
pub fn file_name(kind: &str, timestamp: &DateTime<Utc>) -> String {
    let stamp = iso_timestamp(timestamp).replace([':', '.'], "-");
    format!("{}-{}.json", kind, stamp)
}

fn iso_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Directory-backed archive store
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    data_dir: PathBuf,
}

impl ArchiveStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    async fn ensure_data_dir(&self) -> Result<(), ArchiveError> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|source| ArchiveError::CreateDir {
                path: self.data_dir.clone(),
                source,
            })
    }

    /// Write `data` in a new envelope of type `kind`
    pub async fn archive<T: Serialize>(
        &self,
        data: &T,
        kind: &str,
        extra: Map<String, Value>,
    ) -> Result<ArchiveRecord, ArchiveError> {
        self.ensure_data_dir().await?;

        let data = serde_json::to_value(data).map_err(ArchiveError::Encode)?;
        let now = Utc::now();
        let filename = file_name(kind, &now);
        let filepath = self.data_dir.join(&filename);

        let envelope = ArchiveEnvelope {
            metadata: ArchiveMetadata {
                timestamp: iso_timestamp(&now),
                kind: kind.to_string(),
                item_count: item_count(&data),
                extra,
            },
            data,
        };

        let bytes = serde_json::to_vec_pretty(&envelope).map_err(ArchiveError::Encode)?;

        // Readers only consider `.json`, so a partially written file is never picked up.
        // Staging names are per call: same-millisecond writes of one kind each
        // rename their own file and the last rename wins.
        let staging = self
            .data_dir
            .join(format!("{}.{}.tmp", filename, Uuid::new_v4().simple()));
        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|source| ArchiveError::Write {
                path: staging.clone(),
                source,
            })?;
        tokio::fs::rename(&staging, &filepath)
            .await
            .map_err(|source| ArchiveError::Write {
                path: filepath.clone(),
                source,
            })?;

        info!(
            kind = %kind,
            filename = %filename,
            item_count = envelope.metadata.item_count,
            "Archived payload"
        );

        Ok(ArchiveRecord {
            filename,
            filepath,
            envelope,
        })
    }

    /// Archive a listening-history payload with the metadata for its kind
    pub async fn archive_history(
        &self,
        kind: HistoryKind,
        time_range: Option<TimeRange>,
        limit: u32,
        data: &Value,
    ) -> Result<ArchiveRecord, ArchiveError> {
        self.archive(data, kind.archive_type(), history_metadata(kind, time_range, limit))
            .await
    }

    /// Newest envelope of type `kind`, if any
    ///
    /// Filenames embed a fixed-width UTC timestamp, so lexicographic order is
    /// chronological order.
    pub async fn latest(&self, kind: &str) -> Result<Option<ArchiveEnvelope>, ArchiveError> {
        let mut entries = match tokio::fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ArchiveError::Read {
                    path: self.data_dir.clone(),
                    source,
                })
            }
        };

        let prefix = format!("{}-", kind);
        let mut newest: Option<String> = None;
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|source| ArchiveError::Read {
                    path: self.data_dir.clone(),
                    source,
                })?;
            let Some(entry) = entry else { break };
            let name = entry.file_name().to_string_lossy().into_owned();
            let stamped = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
                .is_some_and(|stamp| stamp.starts_with(|c: char| c.is_ascii_digit()));
            if stamped && newest.as_ref().map_or(true, |current| name > *current) {
                newest = Some(name);
            }
        }

        let Some(name) = newest else {
            debug!(kind = %kind, "No archive found");
            return Ok(None);
        };

        let path = self.data_dir.join(&name);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| ArchiveError::Read {
                path: path.clone(),
                source,
            })?;
        let envelope = serde_json::from_slice(&bytes)
            .map_err(|source| ArchiveError::Decode { path, source })?;
        Ok(Some(envelope))
    }
}

fn history_metadata(kind: HistoryKind, time_range: Option<TimeRange>, limit: u32) -> Map<String, Value> {
    let mut extra = Map::new();
    match (kind, time_range) {
        (HistoryKind::RecentlyPlayed, _) => {
            extra.insert(
                "description".to_string(),
                Value::String(format!("Last {} played tracks", limit)),
            );
        }
        (_, range) => {
            let range = range.unwrap_or_default();
            extra.insert("timeRange".to_string(), Value::String(range.to_string()));
            extra.insert(
                "description".to_string(),
                Value::String(range.description().to_string()),
            );
        }
    }
    extra
}
