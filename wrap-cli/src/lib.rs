//! wrap-cli library interface
//!
//! Client side of the wrap service: the automated pipeline, the generation
//! job with per-track expansion, and the HTTP backend they run against.

pub mod backend;
pub mod error;
pub mod job;
pub mod pipeline;

pub use backend::{HttpBackend, ProgressStream, SavedArchive, WrapBackend};
pub use error::{ClientError, ExpansionError, PipelineError};
pub use job::{ExpansionState, GenerationJob};
pub use pipeline::{Pipeline, PipelineOutcome, PipelineState, Stage};
