//! Error types for the playback core.

use thiserror::Error;

/// Errors raised by the session, the queue and their collaborators.
///
/// Source and engine failures never escape the session API: they are turned
/// into [`SessionState::Failed`](crate::SessionState::Failed). Persistence
/// failures are reported but never roll back in-memory state.
#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Cannot resolve audio source: {0}")]
    SourceResolution(String),
    #[error("Playback engine error: {0}")]
    Engine(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("No Tokio runtime available to drive the playback session")]
    NoRuntime,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PlayerError {
    pub fn source_resolution(message: impl Into<String>) -> Self {
        PlayerError::SourceResolution(message.into())
    }

    pub fn engine(message: impl Into<String>) -> Self {
        PlayerError::Engine(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        PlayerError::Persistence(message.into())
    }
}

/// Result type specialised for `podplayer`.
pub type Result<T> = std::result::Result<T, PlayerError>;
