//! Media model shared by every pipeline stage
//!
//! Formats describe one elementary stream, buffer metadata travels with every
//! sample handed between extractor, codecs and the container writer.

pub mod avc;

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// Well-known mime types produced or consumed by the pipeline.
pub mod mime {
    pub const VIDEO_AVC: &str = "video/avc";
    pub const VIDEO_VP8: &str = "video/x-vnd.on2.vp8";
    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
    pub const AUDIO_VORBIS: &str = "audio/vorbis";
    /// Raw interleaved 16-bit PCM as produced by audio decoders
    pub const AUDIO_RAW: &str = "audio/raw";

    pub(crate) const VIDEO_PREFIX: &str = "video/";
    pub(crate) const AUDIO_PREFIX: &str = "audio/";
}

/// AAC Low Complexity object type.
pub const AAC_PROFILE_LC: u32 = 2;

/// Kind of elementary stream carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Classifies a mime type by its `video/` or `audio/` prefix.
    pub fn from_mime(mime: &str) -> Option<Self> {
        if mime.starts_with(mime::VIDEO_PREFIX) {
            Some(MediaKind::Video)
        } else if mime.starts_with(mime::AUDIO_PREFIX) {
            Some(MediaKind::Audio)
        } else {
            None
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Description of one elementary stream.
///
/// Every field is optional because extractors and encoders report only what
/// they know. Consumers that need a field must check for it and fail with a
/// configuration error when it is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFormat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<u32>,
    /// Seconds between key frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i_frame_interval: Option<u32>,
    /// Largest sample the track may contain, in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_input_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_us: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_degrees: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aac_profile: Option<u32>,
    /// First codec-specific data blob (SPS for AVC, AudioSpecificConfig for AAC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csd0: Option<Vec<u8>>,
    /// Second codec-specific data blob (PPS for AVC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csd1: Option<Vec<u8>>,
}

impl MediaFormat {
    /// Creates a video format with the given codec and frame size.
    pub fn video(mime: &str, width: u32, height: u32) -> Self {
        Self {
            mime: Some(mime.to_string()),
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    /// Creates an audio format with the given codec, rate and channel layout.
    pub fn audio(mime: &str, sample_rate: u32, channel_count: u32) -> Self {
        Self {
            mime: Some(mime.to_string()),
            sample_rate: Some(sample_rate),
            channel_count: Some(channel_count),
            ..Default::default()
        }
    }

    pub fn with_bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    pub fn with_i_frame_interval(mut self, seconds: u32) -> Self {
        self.i_frame_interval = Some(seconds);
        self
    }

    pub fn with_max_input_size(mut self, bytes: usize) -> Self {
        self.max_input_size = Some(bytes);
        self
    }

    pub fn with_duration_us(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }

    pub fn with_rotation(mut self, degrees: u32) -> Self {
        self.rotation_degrees = Some(degrees);
        self
    }

    pub fn with_aac_profile(mut self, profile: u32) -> Self {
        self.aac_profile = Some(profile);
        self
    }

    pub fn with_csd(mut self, csd0: Vec<u8>, csd1: Option<Vec<u8>>) -> Self {
        self.csd0 = Some(csd0);
        self.csd1 = csd1;
        self
    }

    /// Returns the mime type as a string slice, if present.
    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    /// Returns the stream kind implied by the mime type.
    pub fn kind(&self) -> Option<MediaKind> {
        self.mime().and_then(MediaKind::from_mime)
    }

    /// Checks whether this format carries the given mime type.
    pub fn has_mime(&self, mime: &str) -> bool {
        self.mime() == Some(mime)
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime().unwrap_or("<no mime>"))?;
        if let (Some(w), Some(h)) = (self.width, self.height) {
            write!(f, " {w}x{h}")?;
        }
        if let (Some(rate), Some(channels)) = (self.sample_rate, self.channel_count) {
            write!(f, " {rate}Hz/{channels}ch")?;
        }
        if let Some(bit_rate) = self.bit_rate {
            write!(f, " {bit_rate}bps")?;
        }
        Ok(())
    }
}

/// Flags attached to a buffer moving through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    pub const KEY_FRAME: BufferFlags = BufferFlags(1);
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(2);
    pub const END_OF_STREAM: BufferFlags = BufferFlags(4);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_key_frame(self) -> bool {
        self.contains(Self::KEY_FRAME)
    }

    pub fn is_codec_config(self) -> bool {
        self.contains(Self::CODEC_CONFIG)
    }

    pub fn is_end_of_stream(self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }
}

impl BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

/// Size, timestamp and flags of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

impl BufferInfo {
    pub fn new(offset: usize, size: usize, presentation_time_us: i64, flags: BufferFlags) -> Self {
        Self {
            offset,
            size,
            presentation_time_us,
            flags,
        }
    }

    /// Zero-length buffer carrying only the end-of-stream marker.
    pub fn end_of_stream(presentation_time_us: i64) -> Self {
        Self::new(0, 0, presentation_time_us, BufferFlags::END_OF_STREAM)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.is_end_of_stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_mime_prefix() {
        assert_eq!(MediaKind::from_mime(mime::VIDEO_AVC), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_mime(mime::AUDIO_AAC), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_mime("text/vtt"), None);

        let format = MediaFormat::audio(mime::AUDIO_AAC, 44100, 2);
        assert_eq!(format.kind(), Some(MediaKind::Audio));
        assert_eq!(MediaFormat::default().kind(), None);
    }

    #[test]
    fn test_buffer_flags() {
        let flags = BufferFlags::KEY_FRAME | BufferFlags::END_OF_STREAM;
        assert!(flags.is_key_frame());
        assert!(flags.is_end_of_stream());
        assert!(!flags.is_codec_config());
        assert!(!BufferFlags::NONE.contains(BufferFlags::NONE));
        assert!(BufferInfo::end_of_stream(42).is_end_of_stream());
    }

    #[test]
    fn test_format_display() {
        let format = MediaFormat::video(mime::VIDEO_AVC, 1280, 720).with_bit_rate(4_194_304);
        assert_eq!(format.to_string(), "video/avc 1280x720 4194304bps");
    }

    #[test]
    fn test_format_json_skips_missing_fields() {
        let format = MediaFormat::audio(mime::AUDIO_AAC, 48000, 1);
        let json = serde_json::to_string(&format).unwrap();
        assert!(!json.contains("width"));

        let parsed: MediaFormat = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, format);
    }
}
