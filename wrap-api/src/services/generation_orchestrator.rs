//! Generation orchestrator
//!
//! Turns a taste profile into a stream of progress events while the tracks
//! are rendered, and expands single tracks to full length on request.
//!
//! **Batch contract:**
//! - One attempt per music prompt, `len(music_prompts)` attempts in total
//! - A failed attempt is recorded as `success = false` with the upstream
//!   message; the remaining attempts continue
//! - `progress {current, total}` after every resolved attempt
//! - Exactly one terminal `complete {tracks}` in prompt order
//!
//! Producers run in their own task and feed a bounded channel. A consumer
//! that goes away stops receiving events but never cancels rendering.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use wrap_common::{ProgressEvent, TasteProfile, TrackPatch, TrackResult};

use crate::services::music_generator::{ComposeRequest, MusicGenerator};

const CHANNEL_CAPACITY: usize = 32;

/// Drives a [`MusicGenerator`] and reports progress
#[derive(Clone)]
pub struct GenerationOrchestrator {
    generator: Arc<dyn MusicGenerator>,
    concurrency: usize,
    full_seconds: u32,
}

impl GenerationOrchestrator {
    pub fn new(generator: Arc<dyn MusicGenerator>, concurrency: usize, full_seconds: u32) -> Self {
        Self {
            generator,
            concurrency: concurrency.max(1),
            full_seconds,
        }
    }

    /// Duration an expanded track is rendered at
    pub fn full_seconds(&self) -> u32 {
        self.full_seconds
    }

    /// Render every prompt of `profile` at `duration_seconds`
    pub fn generate_from_analysis(
        &self,
        profile: TasteProfile,
        duration_seconds: u32,
    ) -> ReceiverStream<ProgressEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let generator = Arc::clone(&self.generator);
        let concurrency = self.concurrency;

        tokio::spawn(async move {
            let total = profile.track_count();
            info!(total, duration = duration_seconds, "Starting track generation");

            let mut tracks: Vec<TrackResult> = profile
                .music_prompts
                .iter()
                .enumerate()
                .map(|(index, prompt)| TrackResult::placeholder(index, prompt))
                .collect();

            let mut attempts = stream::iter(tracks.clone().into_iter())
                .map(|slot| {
                    let generator = Arc::clone(&generator);
                    async move {
                        let request = ComposeRequest {
                            track_index: slot.track_index,
                            prompt: slot.prompt.clone().unwrap_or_default(),
                            duration_seconds,
                        };
                        match generator.compose(&request).await {
                            Ok(track) => slot.succeed(track.filename, track.duration_seconds),
                            Err(e) => {
                                warn!(
                                    track_index = request.track_index,
                                    error = %e,
                                    "Track generation failed"
                                );
                                slot.fail(e.to_string())
                            }
                        }
                    }
                })
                .buffer_unordered(concurrency);

            let mut current = 0;
            while let Some(result) = attempts.next().await {
                current += 1;
                let index = result.track_index;
                tracks[index] = result;
                debug!(current, total, track_index = index, "Track attempt resolved");
                // Send errors mean the consumer is gone; keep rendering.
                let _ = tx.send(ProgressEvent::progress(current, total)).await;
            }

            let succeeded = tracks.iter().filter(|t| t.success).count();
            info!(total, succeeded, failed = total - succeeded, "Track generation finished");
            let _ = tx.send(ProgressEvent::batch_complete(tracks)).await;
        });

        ReceiverStream::new(rx)
    }

    /// Re-render one track at full length
    ///
    /// Emits `progress {0,1}`, then `progress {1,1}` and `complete {result}` on
    /// success, or a terminal `error` event on failure.
    pub fn expand_track(&self, track_index: usize, prompt: String) -> ReceiverStream<ProgressEvent> {
        let (tx, rx) = mpsc::channel(4);
        let generator = Arc::clone(&self.generator);
        let duration_seconds = self.full_seconds;

        tokio::spawn(async move {
            info!(track_index, duration = duration_seconds, "Expanding track");
            let _ = tx.send(ProgressEvent::progress(0, 1)).await;

            let request = ComposeRequest {
                track_index,
                prompt: prompt.clone(),
                duration_seconds,
            };
            match generator.compose(&request).await {
                Ok(track) => {
                    let patch = TrackPatch {
                        track_index: Some(track_index),
                        success: Some(true),
                        filename: Some(track.filename),
                        duration_seconds: Some(track.duration_seconds),
                        prompt: Some(prompt),
                        ..Default::default()
                    };
                    let _ = tx.send(ProgressEvent::progress(1, 1)).await;
                    let _ = tx.send(ProgressEvent::single_complete(patch)).await;
                    info!(track_index, "Track expanded");
                }
                Err(e) => {
                    warn!(track_index, error = %e, "Track expansion failed");
                    let _ = tx.send(ProgressEvent::error(e.to_string())).await;
                }
            }
        });

        ReceiverStream::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::music_generator::{ComposedTrack, GenerationError};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wrap_common::{Completion, MusicPrompt};

    struct ScriptedGenerator {
        failing: HashSet<usize>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedGenerator {
        fn new(failing: &[usize]) -> Self {
            Self {
                failing: failing.iter().copied().collect(),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl MusicGenerator for ScriptedGenerator {
        async fn compose(&self, request: &ComposeRequest) -> Result<ComposedTrack, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Later indices finish first to exercise out-of-order resolution.
            let lag = self.delay * (10 - request.track_index.min(9)) as u32;
            tokio::time::sleep(lag).await;
            if self.failing.contains(&request.track_index) {
                return Err(GenerationError::Api {
                    status: 422,
                    message: "prompt rejected".to_string(),
                });
            }
            Ok(ComposedTrack {
                filename: format!("track-{}-{}s.mp3", request.track_index + 1, request.duration_seconds),
                duration_seconds: request.duration_seconds,
            })
        }
    }

    fn profile(n: usize) -> TasteProfile {
        TasteProfile {
            estimated_age: 27,
            age_range: "24-30".to_string(),
            confidence: 0.8,
            reasoning: vec![],
            music_generation_directive: "Gen Z".to_string(),
            insights: String::new(),
            top_genres: vec![],
            music_prompts: (0..n)
                .map(|i| MusicPrompt {
                    title: format!("Song {}", i),
                    prompt: format!("prompt {}", i),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_partial_failure_still_completes_every_track() {
        let mut generator = ScriptedGenerator::new(&[3]);
        generator.delay = Duration::from_millis(2);
        let orchestrator = GenerationOrchestrator::new(Arc::new(generator), 3, 120);

        let events: Vec<ProgressEvent> = orchestrator
            .generate_from_analysis(profile(8), 20)
            .collect()
            .await;

        assert_eq!(events.len(), 9);
        for (i, event) in events[..8].iter().enumerate() {
            assert_eq!(event, &ProgressEvent::progress(i + 1, 8));
        }
        match &events[8] {
            ProgressEvent::Complete(Completion::Batch { tracks }) => {
                assert_eq!(tracks.len(), 8);
                for (i, track) in tracks.iter().enumerate() {
                    assert_eq!(track.track_index, i);
                    if i == 3 {
                        assert!(!track.success);
                        assert!(track.error.as_deref().unwrap().contains("prompt rejected"));
                    } else {
                        assert!(track.success);
                        assert_eq!(track.duration_seconds, Some(20));
                    }
                }
            }
            other => panic!("expected batch completion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_abandoned_consumer_does_not_cancel_generation() {
        let generator = Arc::new(ScriptedGenerator::new(&[]));
        let orchestrator = GenerationOrchestrator::new(generator.clone(), 2, 120);

        let mut stream = orchestrator.generate_from_analysis(profile(4), 20);
        let first = stream.next().await;
        assert_eq!(first, Some(ProgressEvent::progress(1, 4)));
        drop(stream);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(generator.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_expand_track_emits_patch_at_full_length() {
        let orchestrator = GenerationOrchestrator::new(Arc::new(ScriptedGenerator::new(&[])), 2, 120);

        let events: Vec<ProgressEvent> = orchestrator
            .expand_track(2, "prompt 2".to_string())
            .collect()
            .await;

        assert_eq!(events[0], ProgressEvent::progress(0, 1));
        assert_eq!(events[1], ProgressEvent::progress(1, 1));
        match &events[2] {
            ProgressEvent::Complete(Completion::Single { result }) => {
                assert_eq!(result.track_index, Some(2));
                assert_eq!(result.duration_seconds, Some(120));
                assert_eq!(result.filename.as_deref(), Some("track-3-120s.mp3"));
            }
            other => panic!("expected single completion, got {:?}", other),
        }
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_expansion_ends_with_error_event() {
        let orchestrator = GenerationOrchestrator::new(Arc::new(ScriptedGenerator::new(&[5])), 2, 120);

        let events: Vec<ProgressEvent> = orchestrator
            .expand_track(5, "prompt 5".to_string())
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ProgressEvent::progress(0, 1));
        assert!(matches!(&events[1], ProgressEvent::Error { error } if error.contains("422")));
    }
}
