//! Generation job
//!
//! Holds the tracks of one generation run and applies expansion results to
//! them. Each track index has its own lock, so expansions of different
//! tracks run in parallel while a second expansion of the same track waits
//! for the first and then sees its outcome.

use futures::StreamExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use wrap_common::{Completion, Error, ProgressEvent, TasteProfile, TrackPatch, TrackResult};

use crate::backend::WrapBackend;
use crate::error::{ClientError, ExpansionError};

/// Expansion status of one track
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExpansionState {
    #[default]
    Idle,
    Expanding,
    Expanded,
    Failed(String),
}

/// Tracks produced by one generation run
#[derive(Debug)]
pub struct GenerationJob {
    profile: TasteProfile,
    requested_duration_seconds: u32,
    full_duration_seconds: u32,
    tracks: RwLock<Vec<TrackResult>>,
    expansions: Vec<Mutex<ExpansionState>>,
}

impl GenerationJob {
    /// Build a job from the terminal event of a generation channel
    ///
    /// The batch must hold exactly one result per prompt, in prompt order.
    pub fn from_tracks(
        profile: TasteProfile,
        requested_duration_seconds: u32,
        full_duration_seconds: u32,
        tracks: Vec<TrackResult>,
    ) -> Result<Self, Error> {
        let expected = profile.track_count();
        if tracks.len() != expected {
            return Err(Error::Protocol(format!(
                "generation returned {} tracks for {} prompts",
                tracks.len(),
                expected
            )));
        }
        if let Some((position, track)) = tracks
            .iter()
            .enumerate()
            .find(|(i, t)| t.track_index != *i)
        {
            return Err(Error::Protocol(format!(
                "track at position {} carries index {}",
                position, track.track_index
            )));
        }

        Ok(Self {
            expansions: tracks.iter().map(|_| Mutex::new(ExpansionState::Idle)).collect(),
            tracks: RwLock::new(tracks),
            profile,
            requested_duration_seconds,
            full_duration_seconds,
        })
    }

    /// Consume a generation channel to its terminal event
    ///
    /// `on_progress` is called with `(current, total)` for every progress
    /// event, in arrival order.
    pub async fn run<F>(
        backend: &dyn WrapBackend,
        profile: TasteProfile,
        duration_seconds: u32,
        full_duration_seconds: u32,
        mut on_progress: F,
    ) -> Result<Self, ClientError>
    where
        F: FnMut(usize, usize) + Send,
    {
        let mut events = backend.generate(&profile, duration_seconds).await?;

        while let Some(event) = events.next().await {
            match event? {
                ProgressEvent::Progress { current, total } => {
                    debug!(current, total, "Generation progress");
                    on_progress(current, total);
                }
                ProgressEvent::Complete(Completion::Batch { tracks }) => {
                    let job = Self::from_tracks(
                        profile,
                        duration_seconds,
                        full_duration_seconds,
                        tracks,
                    )?;
                    let failed = job.snapshot().await.iter().filter(|t| !t.success).count();
                    info!(tracks = job.len(), failed, "Generation complete");
                    return Ok(job);
                }
                ProgressEvent::Complete(Completion::Single { .. }) => {
                    return Err(Error::Protocol(
                        "generation channel completed with a single-track result".to_string(),
                    )
                    .into());
                }
                ProgressEvent::Error { error } => return Err(ClientError::Upstream(error)),
            }
        }

        Err(Error::Protocol("generation channel closed without completing".to_string()).into())
    }

    pub fn profile(&self) -> &TasteProfile {
        &self.profile
    }

    pub fn requested_duration_seconds(&self) -> u32 {
        self.requested_duration_seconds
    }

    pub fn len(&self) -> usize {
        self.expansions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expansions.is_empty()
    }

    /// Copy of every track, in index order
    pub async fn snapshot(&self) -> Vec<TrackResult> {
        self.tracks.read().await.clone()
    }

    pub async fn track(&self, index: usize) -> Option<TrackResult> {
        self.tracks.read().await.get(index).cloned()
    }

    /// Current expansion state; waits while an expansion of `index` runs
    pub async fn expansion_state(&self, index: usize) -> Option<ExpansionState> {
        Some(self.expansions.get(index)?.lock().await.clone())
    }

    /// Expand track `index` to full length
    ///
    /// Expanding an already expanded track returns it unchanged. On failure
    /// the entry keeps its previous contents.
    pub async fn expand(
        &self,
        backend: &dyn WrapBackend,
        index: usize,
    ) -> Result<TrackResult, ExpansionError> {
        let slot = self.expansions.get(index).ok_or(ExpansionError::OutOfRange {
            index,
            total: self.len(),
        })?;
        let mut state = slot.lock().await;

        let current = self
            .track(index)
            .await
            .ok_or(ExpansionError::OutOfRange {
                index,
                total: self.len(),
            })?;
        if *state == ExpansionState::Expanded {
            debug!(track_index = index, "Track already expanded");
            return Ok(current);
        }
        let prompt = match (&current.prompt, current.success) {
            (Some(prompt), true) => prompt.clone(),
            _ => return Err(ExpansionError::TrackNotGenerated(index)),
        };

        *state = ExpansionState::Expanding;
        info!(track_index = index, "Expanding track");

        match self.receive_patch(backend, index, &prompt).await {
            Ok(patch) => {
                let mut tracks = self.tracks.write().await;
                let track = &mut tracks[index];
                track.apply(&patch);
                track.duration_seconds = Some(self.full_duration_seconds);
                *state = ExpansionState::Expanded;
                info!(
                    track_index = index,
                    duration = self.full_duration_seconds,
                    "Track expanded"
                );
                Ok(track.clone())
            }
            Err(e) => {
                warn!(track_index = index, error = %e, "Track expansion failed");
                *state = ExpansionState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn receive_patch(
        &self,
        backend: &dyn WrapBackend,
        index: usize,
        prompt: &str,
    ) -> Result<TrackPatch, ExpansionError> {
        let mut events = backend.expand(index, prompt).await?;

        while let Some(event) = events.next().await {
            match event? {
                ProgressEvent::Progress { current, total } => {
                    debug!(track_index = index, current, total, "Expansion progress");
                }
                ProgressEvent::Complete(Completion::Single { result }) => {
                    if !result.success.unwrap_or(true) {
                        return Err(ExpansionError::Upstream(
                            result
                                .error
                                .unwrap_or_else(|| "expansion reported failure".to_string()),
                        ));
                    }
                    return Ok(result);
                }
                ProgressEvent::Complete(Completion::Batch { .. }) => {
                    return Err(Error::Protocol(
                        "expansion channel completed with a batch result".to_string(),
                    )
                    .into());
                }
                ProgressEvent::Error { error } => return Err(ExpansionError::Upstream(error)),
            }
        }

        Err(Error::Protocol("expansion channel closed without completing".to_string()).into())
    }
}
