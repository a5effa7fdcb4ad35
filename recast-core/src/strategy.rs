//! Output format selection per track
//!
//! A strategy maps each input track format to the format the encoder should
//! produce. `None` means the track is copied unchanged.

use std::fmt;

use crate::backend::ContainerFormat;
use crate::error::{Result, TranscodeError};
use crate::media::{AAC_PROFILE_LC, MediaFormat, mime};

pub const VIDEO_BITRATE_1080P: u32 = 8192 * 1024;
pub const VIDEO_BITRATE_720P: u32 = 4096 * 1024;
pub const VIDEO_BITRATE_540P: u32 = 3072 * 1024;
pub const VIDEO_BITRATE_480P: u32 = 2048 * 1024;
pub const VIDEO_BITRATE_360P: u32 = 1024 * 1024;

pub const FRAME_RATE_24: u32 = 24;
pub const FRAME_RATE_25: u32 = 25;
pub const FRAME_RATE_30: u32 = 30;

pub const I_FRAME_INTERVAL_HD: u32 = 3;
pub const I_FRAME_INTERVAL_SD: u32 = 1;

/// Decides the output format of every track in a job.
pub trait FormatStrategy: Send + Sync {
    /// Output format for the video track, `None` to pass it through.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Configuration` - Input lacks a field the strategy needs
    fn video_output_format(&self, input: &MediaFormat) -> Result<Option<MediaFormat>>;

    /// Output format for the audio track, `None` to pass it through.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Configuration` - Input lacks a field the strategy needs
    fn audio_output_format(&self, input: &MediaFormat) -> Result<Option<MediaFormat>>;

    /// Container the produced codecs belong in.
    fn container(&self) -> ContainerFormat;

    /// Returns whether this strategy produces the given video codec.
    fn is_supported(&self, video_mime: &str) -> bool;
}

/// Video codec family a strategy encodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Avc,
    Vp8,
}

impl VideoCodec {
    pub fn mime(self) -> &'static str {
        match self {
            VideoCodec::Avc => mime::VIDEO_AVC,
            VideoCodec::Vp8 => mime::VIDEO_VP8,
        }
    }

    /// Audio codec paired with this video codec.
    pub fn audio_mime(self) -> &'static str {
        match self {
            VideoCodec::Avc => mime::AUDIO_AAC,
            VideoCodec::Vp8 => mime::AUDIO_VORBIS,
        }
    }

    pub fn container(self) -> ContainerFormat {
        match self {
            VideoCodec::Avc => ContainerFormat::Mp4,
            VideoCodec::Vp8 => ContainerFormat::WebM,
        }
    }
}

/// Requested audio re-encode. Leaving either field unset keeps the audio as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioTarget {
    pub bitrate: Option<u32>,
    pub channels: Option<u32>,
}

impl AudioTarget {
    pub fn new(bitrate: u32, channels: u32) -> Self {
        Self {
            bitrate: Some(bitrate),
            channels: Some(channels),
        }
    }

    /// Target that copies the audio track unchanged.
    pub fn pass_through() -> Self {
        Self::default()
    }

    fn output_format(&self, codec: VideoCodec, input: &MediaFormat) -> Option<MediaFormat> {
        let (Some(bitrate), Some(channels)) = (self.bitrate, self.channels) else {
            return None;
        };
        // Without a known input rate there is nothing to resample against
        let sample_rate = input.sample_rate?;

        let format = MediaFormat::audio(codec.audio_mime(), sample_rate, channels)
            .with_bit_rate(bitrate);
        Some(match codec {
            VideoCodec::Avc => format.with_aac_profile(AAC_PROFILE_LC),
            VideoCodec::Vp8 => format,
        })
    }
}

/// Encoder settings shared by the resizing strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoTarget {
    pub codec: VideoCodec,
    pub bit_rate: u32,
    pub frame_rate: u32,
    pub i_frame_interval: Option<u32>,
}

impl VideoTarget {
    fn output_format(&self, width: u32, height: u32) -> MediaFormat {
        let format = MediaFormat::video(self.codec.mime(), width, height)
            .with_bit_rate(self.bit_rate)
            .with_frame_rate(self.frame_rate);
        match self.i_frame_interval {
            Some(interval) => format.with_i_frame_interval(interval),
            None => format,
        }
    }
}

/// Named output sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Hd1080,
    Hd720,
    Sd480,
    Sd360,
    Vp8Qhd540,
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::Hd1080 => write!(f, "1080p"),
            Preset::Hd720 => write!(f, "720p"),
            Preset::Sd480 => write!(f, "480p"),
            Preset::Sd360 => write!(f, "360p"),
            Preset::Vp8Qhd540 => write!(f, "vp8-540p"),
        }
    }
}

/// Fits the frame into a fixed long edge and short edge, keeping orientation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitStrategy {
    long_edge: u32,
    short_edge: u32,
    video: VideoTarget,
    audio: AudioTarget,
}

impl FitStrategy {
    pub fn new(long_edge: u32, short_edge: u32, video: VideoTarget) -> Self {
        Self {
            long_edge,
            short_edge,
            video,
            audio: AudioTarget::pass_through(),
        }
    }

    pub fn preset(preset: Preset) -> Self {
        let avc = |bit_rate, frame_rate, interval| VideoTarget {
            codec: VideoCodec::Avc,
            bit_rate,
            frame_rate,
            i_frame_interval: Some(interval),
        };

        match preset {
            Preset::Hd1080 => Self::new(
                1920,
                1080,
                avc(VIDEO_BITRATE_1080P, FRAME_RATE_30, I_FRAME_INTERVAL_HD),
            ),
            Preset::Hd720 => Self::new(
                1280,
                720,
                avc(VIDEO_BITRATE_720P, FRAME_RATE_30, I_FRAME_INTERVAL_HD),
            ),
            Preset::Sd480 => Self::new(
                720,
                480,
                avc(VIDEO_BITRATE_480P, FRAME_RATE_24, I_FRAME_INTERVAL_SD),
            ),
            Preset::Sd360 => Self::new(
                640,
                360,
                avc(VIDEO_BITRATE_360P, FRAME_RATE_24, I_FRAME_INTERVAL_SD),
            ),
            Preset::Vp8Qhd540 => Self::new(
                960,
                540,
                VideoTarget {
                    codec: VideoCodec::Vp8,
                    bit_rate: VIDEO_BITRATE_540P,
                    frame_rate: FRAME_RATE_25,
                    i_frame_interval: None,
                },
            ),
        }
    }

    pub fn with_bit_rate(mut self, bit_rate: u32) -> Self {
        self.video.bit_rate = bit_rate;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.video.frame_rate = frame_rate;
        self
    }

    pub fn with_audio(mut self, audio: AudioTarget) -> Self {
        self.audio = audio;
        self
    }

    /// Output size for a `width` x `height` source.
    pub fn fit(&self, width: u32, height: u32) -> (u32, u32) {
        if width >= height {
            (self.long_edge, self.short_edge)
        } else {
            (self.short_edge, self.long_edge)
        }
    }
}

impl FormatStrategy for FitStrategy {
    fn video_output_format(&self, input: &MediaFormat) -> Result<Option<MediaFormat>> {
        let (width, height) = frame_size(input)?;
        let (width, height) = self.fit(width, height);
        Ok(Some(self.video.output_format(width, height)))
    }

    fn audio_output_format(&self, input: &MediaFormat) -> Result<Option<MediaFormat>> {
        Ok(self.audio.output_format(self.video.codec, input))
    }

    fn container(&self) -> ContainerFormat {
        self.video.codec.container()
    }

    fn is_supported(&self, video_mime: &str) -> bool {
        self.video.codec.mime() == video_mime
    }
}

/// Scales both frame dimensions by a constant factor.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleStrategy {
    scale: f32,
    video: VideoTarget,
    audio: AudioTarget,
}

impl ScaleStrategy {
    /// # Errors
    ///
    /// - `TranscodeError::Configuration` - Scale is not a positive finite number
    pub fn new(scale: f32, video: VideoTarget) -> Result<Self> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(TranscodeError::configuration(format!(
                "scale factor must be positive, got {scale}"
            )));
        }
        Ok(Self {
            scale,
            video,
            audio: AudioTarget::pass_through(),
        })
    }

    pub fn with_audio(mut self, audio: AudioTarget) -> Self {
        self.audio = audio;
        self
    }

    /// Rounds half up, matching integer pixel sizes.
    pub fn scaled(&self, dimension: u32) -> u32 {
        (dimension as f32 * self.scale + 0.5) as u32
    }
}

impl FormatStrategy for ScaleStrategy {
    fn video_output_format(&self, input: &MediaFormat) -> Result<Option<MediaFormat>> {
        let (width, height) = frame_size(input)?;
        Ok(Some(
            self.video
                .output_format(self.scaled(width), self.scaled(height)),
        ))
    }

    fn audio_output_format(&self, input: &MediaFormat) -> Result<Option<MediaFormat>> {
        Ok(self.audio.output_format(self.video.codec, input))
    }

    fn container(&self) -> ContainerFormat {
        self.video.codec.container()
    }

    fn is_supported(&self, video_mime: &str) -> bool {
        self.video.codec.mime() == video_mime
    }
}

/// Copies every track unchanged into the given container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassThroughStrategy {
    container: ContainerFormat,
}

impl PassThroughStrategy {
    pub fn new(container: ContainerFormat) -> Self {
        Self { container }
    }
}

impl Default for PassThroughStrategy {
    fn default() -> Self {
        Self::new(ContainerFormat::Mp4)
    }
}

impl FormatStrategy for PassThroughStrategy {
    fn video_output_format(&self, _input: &MediaFormat) -> Result<Option<MediaFormat>> {
        Ok(None)
    }

    fn audio_output_format(&self, _input: &MediaFormat) -> Result<Option<MediaFormat>> {
        Ok(None)
    }

    fn container(&self) -> ContainerFormat {
        self.container
    }

    fn is_supported(&self, _video_mime: &str) -> bool {
        true
    }
}

fn frame_size(input: &MediaFormat) -> Result<(u32, u32)> {
    match (input.width, input.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => Ok((width, height)),
        _ => Err(TranscodeError::configuration(format!(
            "video track has no frame size: {input}"
        ))),
    }
}
