//! Error taxonomy for transcode jobs

use crate::backend::{CodecError, ContainerError, GpuError};
use crate::media::MediaKind;

/// Broad class of a transcode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Input or settings rejected before the pipeline starts
    Configuration,
    /// A negotiated output format violated the output policy
    Negotiation,
    /// Failure while samples were flowing
    Pipeline,
}

/// Errors that abort a transcode job.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("{kind} output format rejected: {reason}")]
    Negotiation { kind: MediaKind, reason: String },

    #[error("Pipeline error on {kind} track: {reason}")]
    Pipeline { kind: MediaKind, reason: String },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("Container error: {0}")]
    Container(#[from] ContainerError),
}

impl TranscodeError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        TranscodeError::Configuration {
            reason: reason.into(),
        }
    }

    /// Maps the error onto the configuration / negotiation / pipeline classes.
    pub fn category(&self) -> ErrorCategory {
        match self {
            TranscodeError::Configuration { .. } => ErrorCategory::Configuration,
            TranscodeError::Negotiation { .. } => ErrorCategory::Negotiation,
            TranscodeError::Codec(CodecError::Unsupported { .. }) => ErrorCategory::Configuration,
            TranscodeError::Container(
                ContainerError::Open { .. } | ContainerError::InvalidSource { .. },
            ) => ErrorCategory::Configuration,
            TranscodeError::Pipeline { .. }
            | TranscodeError::Codec(_)
            | TranscodeError::Gpu(_)
            | TranscodeError::Container(_) => ErrorCategory::Pipeline,
        }
    }
}

pub type Result<T> = std::result::Result<T, TranscodeError>;

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            TranscodeError::configuration("no tracks").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            TranscodeError::Negotiation {
                kind: MediaKind::Video,
                reason: "profile 100".to_string(),
            }
            .category(),
            ErrorCategory::Negotiation
        );
        assert_eq!(
            TranscodeError::from(GpuError::FrameTimeout { waited_ms: 1000 }).category(),
            ErrorCategory::Pipeline
        );
        assert_eq!(
            TranscodeError::from(ContainerError::Open {
                path: PathBuf::from("missing.mp4"),
                reason: "not found".to_string(),
            })
            .category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            TranscodeError::from(CodecError::InvalidBufferIndex { index: 9 }).category(),
            ErrorCategory::Pipeline
        );
    }
}
