//! Error types for wrap-cli

use thiserror::Error;

use crate::pipeline::{PipelineState, Stage};

/// Failure talking to wrap-api
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Http(String),

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Not logged in; run `wrap-cli login` and pass the session cookie")]
    NotAuthenticated,

    /// The server reported a failure inside a progress channel
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// Decoding a response body or progress channel failed
    #[error(transparent)]
    Channel(#[from] wrap_common::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Http(err.to_string())
    }
}

/// Failure of a single-track expansion
///
/// The track entry is never modified when one of these is returned.
#[derive(Debug, Error)]
pub enum ExpansionError {
    #[error("Track index {index} out of range ({total} tracks)")]
    OutOfRange { index: usize, total: usize },

    #[error("Track {0} was never generated and cannot be expanded")]
    TrackNotGenerated(usize),

    #[error("Expansion failed upstream: {0}")]
    Upstream(String),

    #[error("Expansion channel failed: {0}")]
    Channel(#[from] ClientError),
}

impl From<wrap_common::Error> for ExpansionError {
    fn from(err: wrap_common::Error) -> Self {
        ExpansionError::Channel(ClientError::Channel(err))
    }
}

/// Failure of a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline is {0:?}; reset it before starting another run")]
    NotIdle(PipelineState),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: ClientError,
    },
}
