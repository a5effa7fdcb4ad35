//! Capability traits for the collaborators the pipeline drives
//!
//! Hardware codecs, container demuxers and muxers, and the GPU are owned by
//! the platform. The pipeline only sees these traits, so a backend can be a
//! real device binding or the deterministic simulation in `recast-sim`.

pub mod gpu;
#[cfg(test)]
pub(crate) mod test_backend;
#[cfg(test)]
pub(crate) mod test_codec;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use gpu::{
    FrameStream, GlApi, GpuError, GpuProvider, GpuResult, ProgramId, QuadDraw, RenderContext,
    SurfaceHandle, TextureId,
};

use crate::media::{BufferInfo, MediaFormat};

/// Errors reported by a hardware codec.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("Codec {codec} failed during {operation}: {reason}")]
    Failed {
        codec: String,
        operation: &'static str,
        reason: String,
    },

    #[error("Buffer index {index} is not owned by the caller")]
    InvalidBufferIndex { index: usize },

    #[error("No codec available for {mime}")]
    Unsupported { mime: String },

    #[error("Codec used in wrong state: {reason}")]
    InvalidState { reason: String },
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Errors reported by container readers and writers.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("Cannot open {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("Source is not decodable: {reason}")]
    InvalidSource { reason: String },

    #[error("Track {track} does not exist")]
    InvalidTrack { track: usize },

    #[error("Sample of {size} bytes does not fit into {capacity} byte buffer")]
    SampleTooLarge { size: usize, capacity: usize },

    #[error("Container write failed: {reason}")]
    Write { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

/// Output container family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerFormat {
    Mp4,
    WebM,
}

impl ContainerFormat {
    /// File extension used for outputs in this container
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::WebM => "webm",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "video/mp4",
            ContainerFormat::WebM => "video/webm",
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Container level metadata read before extraction starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceMetadata {
    /// Total duration, `None` when the container does not declare one
    pub duration_us: Option<i64>,
    pub rotation_degrees: u32,
}

/// Outcome of polling a codec for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    /// Nothing ready within the timeout
    TryAgainLater,
    /// Output format is now known or changed; read it with `output_format`
    FormatChanged,
    /// Output buffer array was reallocated
    BuffersChanged,
    /// A filled output buffer owned by the caller until released
    Buffer { index: usize, info: BufferInfo },
}

/// Hardware decoder or encoder exposing dequeue/queue buffer semantics.
///
/// Indices returned by `dequeue_*` are owned by the caller until handed back
/// through `queue_input_buffer` or `release_output_buffer`.
pub trait MediaCodec: Send {
    fn name(&self) -> &str;

    /// Configures the codec; decoders may target a surface instead of buffers.
    fn configure(&mut self, format: &MediaFormat, surface: Option<SurfaceHandle>)
    -> CodecResult<()>;

    /// Requests a surface feeding the encoder's input. Must follow `configure`.
    fn create_input_surface(&mut self) -> CodecResult<SurfaceHandle>;

    fn start(&mut self) -> CodecResult<()>;

    fn stop(&mut self) -> CodecResult<()>;

    fn release(&mut self) -> CodecResult<()>;

    fn dequeue_input_buffer(&mut self, timeout: Duration) -> CodecResult<Option<usize>>;

    /// Full capacity of a dequeued input buffer.
    fn input_buffer(&mut self, index: usize) -> CodecResult<&mut [u8]>;

    fn queue_input_buffer(&mut self, index: usize, info: BufferInfo) -> CodecResult<()>;

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> CodecResult<OutputStatus>;

    /// Valid bytes of a dequeued output buffer.
    fn output_buffer(&self, index: usize) -> CodecResult<&[u8]>;

    fn output_format(&self) -> CodecResult<MediaFormat>;

    /// Hands an output buffer back, rendering it to the configured surface when `render` is set.
    fn release_output_buffer(&mut self, index: usize, render: bool) -> CodecResult<()>;

    /// Surface-input encoders only: stop accepting frames and drain.
    fn signal_end_of_input_stream(&mut self) -> CodecResult<()>;
}

/// Creates codec instances by mime type.
pub trait CodecFactory: Send + Sync {
    fn create_decoder(&self, mime: &str) -> CodecResult<Box<dyn MediaCodec>>;

    fn create_encoder(&self, mime: &str) -> CodecResult<Box<dyn MediaCodec>>;

    fn supports_decoder(&self, mime: &str) -> bool;

    fn supports_encoder(&self, mime: &str) -> bool;
}

/// Demuxer reading interleaved samples from a source container.
pub trait Extractor: Send {
    fn track_count(&self) -> usize;

    fn track_format(&self, track: usize) -> ContainerResult<MediaFormat>;

    fn select_track(&mut self, track: usize) -> ContainerResult<()>;

    /// Track of the current sample, `None` once every selected track is exhausted.
    fn sample_track_index(&self) -> Option<usize>;

    fn sample_size(&self) -> Option<usize>;

    fn sample_time_us(&self) -> i64;

    /// Sync-sample flag of the current sample.
    fn sample_is_key_frame(&self) -> bool;

    /// Copies the current sample into `buffer`, returning its length.
    fn read_sample_data(&mut self, buffer: &mut [u8]) -> ContainerResult<usize>;

    /// Moves to the next sample of any selected track.
    fn advance(&mut self) -> bool;

    fn release(&mut self);
}

/// Muxer writing tracks into an output container.
pub trait ContainerWriter: Send {
    fn set_orientation_hint(&mut self, degrees: u32) -> ContainerResult<()>;

    fn add_track(&mut self, format: &MediaFormat) -> ContainerResult<usize>;

    fn start(&mut self) -> ContainerResult<()>;

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo)
    -> ContainerResult<()>;

    fn stop(&mut self) -> ContainerResult<()>;

    fn release(&mut self);
}

/// Entry point bundling every collaborator a transcode needs.
pub trait MediaBackend: Send + Sync {
    fn read_metadata(&self, input: &Path) -> ContainerResult<SourceMetadata>;

    fn open_extractor(&self, input: &Path) -> ContainerResult<Box<dyn Extractor>>;

    fn create_writer(
        &self,
        output: &Path,
        container: ContainerFormat,
    ) -> ContainerResult<Box<dyn ContainerWriter>>;

    fn codecs(&self) -> &dyn CodecFactory;

    fn gpu(&self) -> &dyn GpuProvider;
}
