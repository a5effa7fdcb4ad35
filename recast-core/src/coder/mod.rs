//! Per-track state machines moving samples from the extractor to the muxer
//!
//! Every coder is advanced by [`TrackCoder::step_pipeline`], which does a
//! bounded amount of non-blocking work and reports whether anything moved.

pub mod audio;
pub mod passthrough;
pub mod video;

use std::fmt;
use std::time::Duration;

pub use audio::AudioCoder;
pub use passthrough::PassThroughCoder;
pub use video::VideoCoder;

use crate::backend::{Extractor, MediaBackend, MediaCodec, OutputStatus};
use crate::error::{Result, TranscodeError};
use crate::media::{BufferFlags, BufferInfo, MediaFormat, MediaKind};
use crate::muxer::QueuedMuxer;

/// Default copy buffer for pass-through tracks without a max input size.
pub const DEFAULT_PASS_THROUGH_BUFFER: usize = 2048;

/// Outcome of one non-blocking drain attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// Nothing was ready
    None,
    /// Format or buffer layout changed, call again without sleeping
    RetryImmediately,
    /// One unit of work was done
    Consumed,
}

impl DrainState {
    pub fn is_busy(self) -> bool {
        self != DrainState::None
    }
}

/// Lifecycle of a transcoding coder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoderState {
    NotStarted,
    Running,
    /// Decoder emitted end of stream, encoder may still hold frames
    DecoderEndOfStream,
    /// Encoder emitted end of stream. Terminal.
    EncoderEndOfStream,
}

impl CoderState {
    pub fn is_finished(self) -> bool {
        self == CoderState::EncoderEndOfStream
    }

    pub fn is_decoder_done(self) -> bool {
        matches!(
            self,
            CoderState::DecoderEndOfStream | CoderState::EncoderEndOfStream
        )
    }
}

/// Timeouts and sizes a coder needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoderSettings {
    /// Poll timeout for every codec dequeue call
    pub dequeue_timeout: Duration,
    /// Bound on waiting for a decoded video frame
    pub frame_timeout: Duration,
    pub pass_through_buffer_size: usize,
}

impl Default for CoderSettings {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::ZERO,
            frame_timeout: Duration::from_millis(1000),
            pass_through_buffer_size: DEFAULT_PASS_THROUGH_BUFFER,
        }
    }
}

/// Source track a coder is built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSource {
    pub index: usize,
    pub kind: MediaKind,
    pub format: MediaFormat,
}

/// Shared collaborators borrowed by a coder for one call.
pub struct TrackIo<'a> {
    pub extractor: &'a mut dyn Extractor,
    pub muxer: &'a mut QueuedMuxer,
}

/// Which variant a coder is, for reports and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CoderKind {
    Video,
    Audio,
    PassThrough,
}

impl fmt::Display for CoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoderKind::Video => write!(f, "video transcode"),
            CoderKind::Audio => write!(f, "audio transcode"),
            CoderKind::PassThrough => write!(f, "pass-through"),
        }
    }
}

/// One track's coder.
pub enum TrackCoder {
    Video(VideoCoder),
    Audio(AudioCoder),
    PassThrough(PassThroughCoder),
}

impl TrackCoder {
    /// Picks the variant for `source`. No output format means pass-through.
    pub fn for_track(
        source: TrackSource,
        output_format: Option<MediaFormat>,
        settings: CoderSettings,
    ) -> Self {
        match (source.kind, output_format) {
            (_, None) => TrackCoder::PassThrough(PassThroughCoder::new(source, settings)),
            (MediaKind::Video, Some(output)) => {
                TrackCoder::Video(VideoCoder::new(source, output, settings))
            }
            (MediaKind::Audio, Some(output)) => {
                TrackCoder::Audio(AudioCoder::new(source, output, settings))
            }
        }
    }

    pub fn kind(&self) -> CoderKind {
        match self {
            TrackCoder::Video(_) => CoderKind::Video,
            TrackCoder::Audio(_) => CoderKind::Audio,
            TrackCoder::PassThrough(_) => CoderKind::PassThrough,
        }
    }

    pub fn media_kind(&self) -> MediaKind {
        match self {
            TrackCoder::Video(_) => MediaKind::Video,
            TrackCoder::Audio(_) => MediaKind::Audio,
            TrackCoder::PassThrough(coder) => coder.media_kind(),
        }
    }

    /// Selects the track and brings up codecs and surfaces.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Configuration` - Format lacks a mime type or codec unavailable
    /// - `TranscodeError::Codec` / `TranscodeError::Gpu` - Bring-up failed
    pub fn setup(&mut self, io: TrackIo<'_>, backend: &dyn MediaBackend) -> Result<()> {
        match self {
            TrackCoder::Video(coder) => coder.setup(io, backend),
            TrackCoder::Audio(coder) => coder.setup(io, backend),
            TrackCoder::PassThrough(coder) => coder.setup(io),
        }
    }

    /// Advances the track by a bounded amount of work.
    ///
    /// Returns `true` when any stage made progress.
    ///
    /// # Errors
    ///
    /// Any failure is fatal for the whole job.
    pub fn step_pipeline(&mut self, io: TrackIo<'_>) -> Result<bool> {
        match self {
            TrackCoder::Video(coder) => coder.step_pipeline(io),
            TrackCoder::Audio(coder) => coder.step_pipeline(io),
            TrackCoder::PassThrough(coder) => coder.step_pipeline(io),
        }
    }

    /// Source track this coder reads.
    pub fn track_index(&self) -> usize {
        match self {
            TrackCoder::Video(coder) => coder.track_index(),
            TrackCoder::Audio(coder) => coder.track_index(),
            TrackCoder::PassThrough(coder) => coder.track_index(),
        }
    }

    /// Timestamp of the last sample handed to the muxer.
    pub fn presentation_time_us(&self) -> i64 {
        match self {
            TrackCoder::Video(coder) => coder.presentation_time_us(),
            TrackCoder::Audio(coder) => coder.presentation_time_us(),
            TrackCoder::PassThrough(coder) => coder.presentation_time_us(),
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            TrackCoder::Video(coder) => coder.is_finished(),
            TrackCoder::Audio(coder) => coder.is_finished(),
            TrackCoder::PassThrough(coder) => coder.is_finished(),
        }
    }

    pub fn samples_written(&self) -> u64 {
        match self {
            TrackCoder::Video(coder) => coder.samples_written(),
            TrackCoder::Audio(coder) => coder.samples_written(),
            TrackCoder::PassThrough(coder) => coder.samples_written(),
        }
    }

    /// Releases everything the coder owns. Safe after partial setup and when repeated.
    pub fn release(&mut self) {
        match self {
            TrackCoder::Video(coder) => coder.release(),
            TrackCoder::Audio(coder) => coder.release(),
            TrackCoder::PassThrough(coder) => coder.release(),
        }
    }
}

/// Encoder-side bookkeeping shared by the transcoding coders.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EncoderProgress {
    pub(crate) end_of_stream: bool,
    pub(crate) presentation_time_us: i64,
    pub(crate) samples_written: u64,
}

/// Moves at most one encoder output buffer into the muxer.
pub(crate) fn drain_encoder(
    kind: MediaKind,
    encoder: &mut dyn MediaCodec,
    muxer: &mut QueuedMuxer,
    progress: &mut EncoderProgress,
    timeout: Duration,
) -> Result<DrainState> {
    if progress.end_of_stream {
        return Ok(DrainState::None);
    }

    let (index, info) = match encoder.dequeue_output_buffer(timeout)? {
        OutputStatus::TryAgainLater => return Ok(DrainState::None),
        OutputStatus::FormatChanged => {
            let format = encoder.output_format()?;
            tracing::info!("{} encoder output format: {}", kind, format);
            muxer.set_output_format(kind, format)?;
            return Ok(DrainState::RetryImmediately);
        }
        OutputStatus::BuffersChanged => return Ok(DrainState::RetryImmediately),
        OutputStatus::Buffer { index, info } => (index, info),
    };

    if info.flags.is_end_of_stream() {
        progress.end_of_stream = true;
        muxer.write_sample(
            kind,
            &[],
            &BufferInfo::end_of_stream(progress.presentation_time_us),
        )?;
        encoder.release_output_buffer(index, false)?;
        tracing::debug!("{} encoder reached end of stream", kind);
        return Ok(DrainState::Consumed);
    }

    // Config blobs already travel in the output format
    if info.flags.is_codec_config() {
        encoder.release_output_buffer(index, false)?;
        return Ok(DrainState::RetryImmediately);
    }

    let data = encoder.output_buffer(index)?;
    let payload = data
        .get(info.offset..info.offset + info.size)
        .ok_or_else(|| TranscodeError::Pipeline {
            kind,
            reason: format!(
                "encoder buffer {index} holds {} bytes, metadata claims {}..{}",
                data.len(),
                info.offset,
                info.offset + info.size
            ),
        })?;
    let sample = BufferInfo::new(0, info.size, info.presentation_time_us, info.flags);
    muxer.write_sample(kind, payload, &sample)?;
    tracing::trace!(
        "{} sample written: {} bytes at {}us",
        kind,
        info.size,
        info.presentation_time_us
    );

    progress.presentation_time_us = info.presentation_time_us;
    progress.samples_written += 1;
    encoder.release_output_buffer(index, false)?;
    Ok(DrainState::Consumed)
}

/// Feeds at most one extractor sample into `decoder`, or end of stream once the
/// extractor runs dry.
pub(crate) fn drain_extractor(
    track: usize,
    extractor: &mut dyn Extractor,
    decoder: &mut dyn MediaCodec,
    extractor_done: &mut bool,
    timeout: Duration,
) -> Result<DrainState> {
    if *extractor_done {
        return Ok(DrainState::None);
    }

    let sample_track = extractor.sample_track_index();
    if sample_track.is_some_and(|sample_track| sample_track != track) {
        return Ok(DrainState::None);
    }

    let Some(index) = decoder.dequeue_input_buffer(timeout)? else {
        return Ok(DrainState::None);
    };

    if sample_track.is_none() {
        *extractor_done = true;
        decoder.queue_input_buffer(index, BufferInfo::end_of_stream(0))?;
        tracing::debug!("Track {} extractor exhausted, decoder input closed", track);
        return Ok(DrainState::None);
    }

    let size = extractor.read_sample_data(decoder.input_buffer(index)?)?;
    let flags = if extractor.sample_is_key_frame() {
        BufferFlags::KEY_FRAME
    } else {
        BufferFlags::NONE
    };
    decoder.queue_input_buffer(
        index,
        BufferInfo::new(0, size, extractor.sample_time_us(), flags),
    )?;
    extractor.advance();
    Ok(DrainState::Consumed)
}

/// Stops and releases a codec, logging instead of failing.
pub(crate) fn release_codec(codec: Option<Box<dyn MediaCodec>>, started: bool, role: &str) {
    let Some(mut codec) = codec else {
        return;
    };
    if started && let Err(e) = codec.stop() {
        tracing::warn!("Failed to stop {} {}: {}", role, codec.name(), e);
    }
    if let Err(e) = codec.release() {
        tracing::warn!("Failed to release {} {}: {}", role, codec.name(), e);
    }
}

/// Mime type of a format, or a configuration error naming the role.
pub(crate) fn require_mime<'a>(format: &'a MediaFormat, role: &str) -> Result<&'a str> {
    format
        .mime()
        .ok_or_else(|| TranscodeError::configuration(format!("{role} format has no mime type")))
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory extractor and writer shared by the coder tests.

    use std::collections::VecDeque;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::backend::{ContainerResult, ContainerWriter, Extractor};
    use crate::media::{BufferInfo, MediaFormat};

    #[derive(Debug, Clone)]
    pub(crate) struct Sample {
        pub(crate) track: usize,
        pub(crate) pts: i64,
        pub(crate) key: bool,
        pub(crate) data: Vec<u8>,
    }

    pub(crate) struct VecExtractor {
        pub(crate) formats: Vec<MediaFormat>,
        pub(crate) samples: VecDeque<Sample>,
        pub(crate) selected: Vec<usize>,
    }

    impl VecExtractor {
        pub(crate) fn new(formats: Vec<MediaFormat>, samples: Vec<Sample>) -> Self {
            Self {
                formats,
                samples: samples.into(),
                selected: Vec::new(),
            }
        }
    }

    impl Extractor for VecExtractor {
        fn track_count(&self) -> usize {
            self.formats.len()
        }

        fn track_format(&self, track: usize) -> ContainerResult<MediaFormat> {
            self.formats
                .get(track)
                .cloned()
                .ok_or(crate::backend::ContainerError::InvalidTrack { track })
        }

        fn select_track(&mut self, track: usize) -> ContainerResult<()> {
            self.selected.push(track);
            Ok(())
        }

        fn sample_track_index(&self) -> Option<usize> {
            self.samples.front().map(|sample| sample.track)
        }

        fn sample_size(&self) -> Option<usize> {
            self.samples.front().map(|sample| sample.data.len())
        }

        fn sample_time_us(&self) -> i64 {
            self.samples.front().map_or(-1, |sample| sample.pts)
        }

        fn sample_is_key_frame(&self) -> bool {
            self.samples.front().is_some_and(|sample| sample.key)
        }

        fn read_sample_data(&mut self, buffer: &mut [u8]) -> ContainerResult<usize> {
            let sample = self
                .samples
                .front()
                .ok_or(crate::backend::ContainerError::InvalidTrack { track: usize::MAX })?;
            if sample.data.len() > buffer.len() {
                return Err(crate::backend::ContainerError::SampleTooLarge {
                    size: sample.data.len(),
                    capacity: buffer.len(),
                });
            }
            buffer[..sample.data.len()].copy_from_slice(&sample.data);
            Ok(sample.data.len())
        }

        fn advance(&mut self) -> bool {
            self.samples.pop_front();
            !self.samples.is_empty()
        }

        fn release(&mut self) {}
    }

    #[derive(Debug, Default)]
    pub(crate) struct WrittenTracks {
        pub(crate) formats: Vec<MediaFormat>,
        pub(crate) samples: Vec<(usize, Vec<u8>, BufferInfo)>,
    }

    pub(crate) struct SharedWriter(pub(crate) Arc<Mutex<WrittenTracks>>);

    impl ContainerWriter for SharedWriter {
        fn set_orientation_hint(&mut self, _degrees: u32) -> ContainerResult<()> {
            Ok(())
        }

        fn add_track(&mut self, format: &MediaFormat) -> ContainerResult<usize> {
            let mut written = self.0.lock();
            written.formats.push(format.clone());
            Ok(written.formats.len() - 1)
        }

        fn start(&mut self) -> ContainerResult<()> {
            Ok(())
        }

        fn write_sample(
            &mut self,
            track: usize,
            data: &[u8],
            info: &BufferInfo,
        ) -> ContainerResult<()> {
            self.0.lock().samples.push((track, data.to_vec(), *info));
            Ok(())
        }

        fn stop(&mut self) -> ContainerResult<()> {
            Ok(())
        }

        fn release(&mut self) {}
    }
}
