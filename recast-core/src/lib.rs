//! Recast Core - hardware transcoding pipeline
//!
//! Decodes a video and/or audio track from a source container, re-encodes
//! each track to the format a [`FormatStrategy`] asks for (or copies it
//! unchanged), and muxes the result into a new container. Codecs, containers
//! and the GPU are reached through the traits in [`backend`].

pub mod audio;
pub mod backend;
pub mod coder;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod media;
pub mod muxer;
pub mod strategy;
pub mod surface;
pub mod tracing_setup;
pub mod validation;

// Re-export main types for convenient access
pub use backend::{ContainerFormat, MediaBackend};
pub use config::RecastConfig;
pub use engine::{
    CancellationFlag, ProgressListener, RunOutcome, TranscodeEngine, TranscodeJob,
    TranscodeReport,
};
pub use error::{ErrorCategory, TranscodeError};
pub use jobs::{JobHandle, JobId, PoolError, WorkerPool};
pub use media::{MediaFormat, MediaKind};
pub use strategy::{
    AudioTarget, FitStrategy, FormatStrategy, PassThroughStrategy, Preset, ScaleStrategy,
};

/// Errors that can bubble up from any Recast subsystem.
#[derive(Debug, thiserror::Error)]
pub enum RecastError {
    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Job pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecastError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            RecastError::Transcode(e) | RecastError::Pool(PoolError::Transcode(e)) => {
                match e.category() {
                    ErrorCategory::Configuration => format!("Cannot transcode this input: {e}"),
                    ErrorCategory::Negotiation => {
                        format!("The encoder produced an unsupported output: {e}")
                    }
                    ErrorCategory::Pipeline => "Transcoding failed while processing".to_string(),
                }
            }
            RecastError::Pool(PoolError::QueueFull { .. }) => {
                "Too many jobs are waiting, try again later".to_string()
            }
            RecastError::Pool(_) => "Job could not be run".to_string(),
            RecastError::Configuration { reason } => format!("Invalid settings: {reason}"),
            RecastError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        match self {
            RecastError::Configuration { .. } => true,
            RecastError::Transcode(e) | RecastError::Pool(PoolError::Transcode(e)) => {
                e.category() == ErrorCategory::Configuration
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RecastError>;
