//! Post-negotiation checks on encoder output formats

use crate::backend::ContainerFormat;
use crate::error::{Result, TranscodeError};
use crate::media::{MediaFormat, MediaKind, avc, mime};

/// Codec and profile requirements for one output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputPolicy {
    container: ContainerFormat,
}

impl OutputPolicy {
    pub fn for_container(container: ContainerFormat) -> Self {
        Self { container }
    }

    pub fn container(&self) -> ContainerFormat {
        self.container
    }

    /// Checks one negotiated format against the container's requirements.
    ///
    /// MP4 output must be Baseline AVC with AAC audio, WebM output must be
    /// VP8 with Vorbis audio.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Negotiation` - Codec or profile not accepted by the container
    pub fn validate(&self, kind: MediaKind, format: &MediaFormat) -> Result<()> {
        match (self.container, kind) {
            (ContainerFormat::Mp4, MediaKind::Video) => validate_avc_baseline(format),
            (ContainerFormat::Mp4, MediaKind::Audio) => require_mime(kind, format, mime::AUDIO_AAC),
            (ContainerFormat::WebM, MediaKind::Video) => require_mime(kind, format, mime::VIDEO_VP8),
            (ContainerFormat::WebM, MediaKind::Audio) => {
                require_mime(kind, format, mime::AUDIO_VORBIS)
            }
        }
    }
}

fn require_mime(kind: MediaKind, format: &MediaFormat, expected: &str) -> Result<()> {
    match format.mime() {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(TranscodeError::Negotiation {
            kind,
            reason: format!(
                "codec must be {expected}, encoder produced {}",
                actual.unwrap_or("no mime type")
            ),
        }),
    }
}

fn validate_avc_baseline(format: &MediaFormat) -> Result<()> {
    require_mime(MediaKind::Video, format, mime::VIDEO_AVC)?;

    let csd0 = format.csd0.as_deref().ok_or_else(|| TranscodeError::Negotiation {
        kind: MediaKind::Video,
        reason: "AVC output has no SPS (csd-0)".to_string(),
    })?;

    let profile = avc::profile_idc(csd0).map_err(|e| TranscodeError::Negotiation {
        kind: MediaKind::Video,
        reason: format!("cannot read AVC profile: {e}"),
    })?;

    if profile != avc::PROFILE_IDC_BASELINE {
        return Err(TranscodeError::Negotiation {
            kind: MediaKind::Video,
            reason: format!("AVC profile must be Baseline (66), got {profile}"),
        });
    }
    Ok(())
}
