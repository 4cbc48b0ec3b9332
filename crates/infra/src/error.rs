//! Error types for the engine plumbing and file export

use thiserror::Error;
use timbre_core::domain::AudioError;

/// Errors raised between the control side and the audio thread
#[derive(Debug, Error)]
pub enum EngineError {
    /// The audio thread has not drained earlier patches yet
    #[error("Patch queue is full, the update was not applied")]
    QueueFull,

    /// Building or validating the graph failed
    #[error("Graph build failed: {0}")]
    Build(#[from] AudioError),

    /// A block did not match the engine's channel layout
    #[error("Invalid block: {0}")]
    InvalidBlock(&'static str),
}

impl EngineError {
    /// Map a processing error without allocating on the audio thread
    pub(crate) fn from_process(err: AudioError) -> Self {
        match err {
            AudioError::InvalidBlock(reason) => EngineError::InvalidBlock(reason),
            other => EngineError::Build(other),
        }
    }
}

/// Errors raised while exporting rendered audio
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}
