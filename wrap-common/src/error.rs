//! Common error types for wrap

use thiserror::Error;

/// Common result type for wrap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the service and the client
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Byte stream of a progress channel failed mid-read
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed record or broken framing on a progress channel
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
