//! Automated pipeline state machine
//!
//! `Idle → Fetching → Analyzing → Generating → Complete`, with
//! `Failed { stage }` reachable from every running state. Both `Complete`
//! and `Failed` are terminal for a run; [`Pipeline::reset`] returns the
//! pipeline to `Idle` for the next one.
//!
//! Every transition is published on a watch channel so a display can follow
//! the run without polling.

use futures::future::try_join_all;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use wrap_common::{HistoryKind, TasteProfile, FULL_DURATION_SECONDS};

use crate::backend::WrapBackend;
use crate::error::{ClientError, PipelineError};
use crate::job::GenerationJob;

/// Stage of a pipeline run that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Analyzing,
    Generating,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Fetching => "fetching",
            Stage::Analyzing => "analyzing",
            Stage::Generating => "generating",
        })
    }
}

/// Observable pipeline state
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Fetching,
    Analyzing,
    Generating {
        current: usize,
        total: usize,
    },
    Complete {
        tracks: usize,
        failed: usize,
    },
    Failed {
        stage: Stage,
        message: String,
    },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Complete { .. } | PipelineState::Failed { .. })
    }

    /// Stage a running pipeline is in
    fn running_stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Fetching => Some(Stage::Fetching),
            PipelineState::Analyzing => Some(Stage::Analyzing),
            PipelineState::Generating { .. } => Some(Stage::Generating),
            _ => None,
        }
    }
}

/// Marks the pipeline failed if a run is dropped before reaching a terminal state
struct CancelGuard<'a> {
    state_tx: &'a watch::Sender<PipelineState>,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        self.state_tx.send_if_modified(|state| match state.running_stage() {
            Some(stage) => {
                warn!(stage = %stage, "Pipeline run cancelled");
                *state = PipelineState::Failed {
                    stage,
                    message: "run cancelled".to_string(),
                };
                true
            }
            None => false,
        });
    }
}

/// Result of a completed run
#[derive(Debug)]
pub struct PipelineOutcome {
    pub profile: TasteProfile,
    pub job: Arc<GenerationJob>,
}

/// Drives one automated flow at a time against a backend
pub struct Pipeline {
    backend: Arc<dyn WrapBackend>,
    state_tx: watch::Sender<PipelineState>,
    full_duration_seconds: u32,
}

impl Pipeline {
    pub fn new(backend: Arc<dyn WrapBackend>) -> Self {
        let (state_tx, _) = watch::channel(PipelineState::Idle);
        Self {
            backend,
            state_tx,
            full_duration_seconds: FULL_DURATION_SECONDS,
        }
    }

    pub fn backend(&self) -> &dyn WrapBackend {
        self.backend.as_ref()
    }

    pub fn state(&self) -> PipelineState {
        self.state_tx.borrow().clone()
    }

    /// Receiver observing every subsequent transition
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state_tx.subscribe()
    }

    fn transition_to(&self, new_state: PipelineState) {
        let old_state = self.state_tx.send_replace(new_state.clone());
        if std::mem::discriminant(&old_state) != std::mem::discriminant(&new_state) {
            info!(from = ?old_state, to = ?new_state, "Pipeline state transition");
        }
    }

    fn fail(&self, stage: Stage, source: ClientError) -> PipelineError {
        error!(stage = %stage, error = %source, "Pipeline stage failed");
        self.transition_to(PipelineState::Failed {
            stage,
            message: source.to_string(),
        });
        PipelineError::Stage { stage, source }
    }

    /// Return a finished pipeline to `Idle`; running pipelines are left alone
    pub fn reset(&self) -> bool {
        let reset = self.state_tx.send_if_modified(|state| {
            if state.is_terminal() {
                *state = PipelineState::Idle;
                true
            } else {
                false
            }
        });
        if reset {
            info!("Pipeline reset");
        }
        reset
    }

    /// Run fetch, analysis and generation in sequence
    ///
    /// Generation produces `duration_seconds` previews, one per prompt of the
    /// analyzed profile. Per-track failures are part of a complete run.
    /// Dropping the future mid-run leaves the pipeline `Failed` at the stage
    /// it was in, so it can be reset.
    pub async fn run(&self, duration_seconds: u32) -> Result<PipelineOutcome, PipelineError> {
        let mut started = false;
        self.state_tx.send_if_modified(|state| {
            if *state == PipelineState::Idle {
                *state = PipelineState::Fetching;
                started = true;
            }
            started
        });
        if !started {
            return Err(PipelineError::NotIdle(self.state()));
        }
        let _cancel_guard = CancelGuard {
            state_tx: &self.state_tx,
        };
        info!("Pipeline started: fetching listening history");

        // All three datasets or none: analysis never sees partial history.
        let fetches = HistoryKind::ALL
            .iter()
            .map(|kind| self.backend.fetch_and_archive(*kind));
        let archives = try_join_all(fetches)
            .await
            .map_err(|e| self.fail(Stage::Fetching, e))?;
        info!(archives = archives.len(), "History archived");

        self.transition_to(PipelineState::Analyzing);
        let profile = self
            .backend
            .analyze()
            .await
            .map_err(|e| self.fail(Stage::Analyzing, e))?;

        let total = profile.track_count();
        self.transition_to(PipelineState::Generating { current: 0, total });
        let job = GenerationJob::run(
            self.backend.as_ref(),
            profile.clone(),
            duration_seconds,
            self.full_duration_seconds,
            |current, total| {
                self.state_tx
                    .send_replace(PipelineState::Generating { current, total });
            },
        )
        .await
        .map_err(|e| self.fail(Stage::Generating, e))?;

        let tracks = job.snapshot().await;
        self.transition_to(PipelineState::Complete {
            tracks: tracks.len(),
            failed: tracks.iter().filter(|t| !t.success).count(),
        });

        Ok(PipelineOutcome {
            profile,
            job: Arc::new(job),
        })
    }
}
