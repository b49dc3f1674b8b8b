//! Upstream clients and the services built on them

pub mod analysis_client;
pub mod generation_orchestrator;
pub mod history_fetcher;
pub mod music_generator;
pub mod spotify_client;

pub use analysis_client::{AnalysisClient, AnalysisError, ChatAnalysisClient, HistorySnapshot};
pub use generation_orchestrator::GenerationOrchestrator;
pub use history_fetcher::{HistoryError, HistoryFetcher};
pub use music_generator::{
    ComposeRequest, ComposedTrack, ElevenLabsClient, GenerationError, MusicGenerator,
    MAX_DURATION_SECONDS,
};
pub use spotify_client::{FetchError, HistoryQuery, HistorySource, SpotifyClient, MAX_LIMIT};
