//! Server-Sent Events (SSE) utilities
//!
//! Encodes progress channels as SSE responses. Every event becomes one
//! `data: <json>` record, which is the framing [`crate::progress`] decodes.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, warn};

use crate::events::ProgressEvent;

/// Keep-alive comment interval for long-running channels
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Create an SSE response streaming `events` until the terminal event
///
/// # Example
/// ```rust,ignore
/// pub async fn generate(State(state): State<AppState>) -> impl IntoResponse {
///     let events = state.orchestrator.generate_from_analysis(profile, 20);
///     wrap_common::sse::progress_sse("generate", events)
/// }
/// ```
pub fn progress_sse<S>(
    channel: &'static str,
    events: S,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = ProgressEvent> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut events = Box::pin(events);
        while let Some(event) = events.next().await {
            let terminal = event.is_terminal();
            match Event::default().json_data(&event) {
                Ok(record) => {
                    debug!(channel, event_type = event.event_type(), "SSE: sending progress record");
                    yield Ok(record);
                }
                Err(e) => {
                    warn!(channel, "SSE: failed to serialize {} event: {}", event.event_type(), e);
                }
            }
            if terminal {
                break;
            }
        }
        debug!(channel, "SSE: progress channel closed");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("heartbeat"),
    )
}
