//! Video track: decode to a GPU surface, blit into the encoder's input surface

use std::time::Duration;

use super::{
    CoderSettings, CoderState, DrainState, EncoderProgress, TrackIo, TrackSource, drain_encoder,
    drain_extractor, release_codec, require_mime,
};
use crate::backend::{CodecError, MediaBackend, MediaCodec, OutputStatus};
use crate::error::Result;
use crate::media::{MediaFormat, MediaKind};
use crate::surface::{InputSurface, OutputSurface, bridge_frame};

pub struct VideoCoder {
    source: TrackSource,
    output_format: MediaFormat,
    settings: CoderSettings,
    decoder: Option<Box<dyn MediaCodec>>,
    encoder: Option<Box<dyn MediaCodec>>,
    decoder_started: bool,
    encoder_started: bool,
    input_surface: Option<InputSurface>,
    output_surface: Option<OutputSurface>,
    state: CoderState,
    extractor_done: bool,
    progress: EncoderProgress,
    frames_rendered: u64,
}

impl VideoCoder {
    pub fn new(source: TrackSource, output_format: MediaFormat, settings: CoderSettings) -> Self {
        Self {
            source,
            output_format,
            settings,
            decoder: None,
            encoder: None,
            decoder_started: false,
            encoder_started: false,
            input_surface: None,
            output_surface: None,
            state: CoderState::NotStarted,
            extractor_done: false,
            progress: EncoderProgress::default(),
            frames_rendered: 0,
        }
    }

    /// Encoder first, so its input surface is current when the decode
    /// surface's GL objects are created.
    pub(crate) fn setup(&mut self, io: TrackIo<'_>, backend: &dyn MediaBackend) -> Result<()> {
        let output_mime = require_mime(&self.output_format, "video output")?;
        let input_mime = require_mime(&self.source.format, "video input")?;
        io.extractor.select_track(self.source.index)?;
        let gpu = backend.gpu();

        let encoder = self.encoder.insert(backend.codecs().create_encoder(output_mime)?);
        encoder.configure(&self.output_format, None)?;
        let window = encoder.create_input_surface()?;
        let input_surface = self.input_surface.insert(InputSurface::new(gpu, window)?);
        input_surface.make_current()?;
        encoder.start()?;
        self.encoder_started = true;

        // Frames are blitted unrotated, the container carries the orientation hint
        let mut decoder_format = self.source.format.clone();
        if decoder_format.rotation_degrees.is_some() {
            decoder_format.rotation_degrees = Some(0);
        }

        let output_surface = self
            .output_surface
            .insert(OutputSurface::new(gpu, self.settings.frame_timeout)?);
        let decoder = self.decoder.insert(backend.codecs().create_decoder(input_mime)?);
        decoder.configure(&decoder_format, Some(output_surface.surface()?))?;
        decoder.start()?;
        self.decoder_started = true;

        self.state = CoderState::Running;
        tracing::info!(
            "Video track {} transcoding: {} -> {}",
            self.source.index,
            self.source.format,
            self.output_format
        );
        Ok(())
    }

    pub(crate) fn step_pipeline(&mut self, io: TrackIo<'_>) -> Result<bool> {
        let (Some(decoder), Some(encoder), Some(input), Some(output)) = (
            self.decoder.as_deref_mut(),
            self.encoder.as_deref_mut(),
            self.input_surface.as_mut(),
            self.output_surface.as_mut(),
        ) else {
            return Err(CodecError::InvalidState {
                reason: "video coder stepped before setup".to_string(),
            }
            .into());
        };
        let timeout = self.settings.dequeue_timeout;
        let mut busy = false;

        while drain_encoder(
            MediaKind::Video,
            encoder,
            io.muxer,
            &mut self.progress,
            timeout,
        )?
        .is_busy()
        {
            busy = true;
        }
        if self.progress.end_of_stream {
            self.state = CoderState::EncoderEndOfStream;
        }

        loop {
            let (status, rendered) = drain_decoder(decoder, encoder, &mut self.state, timeout)?;
            if let Some(presentation_time_us) = rendered {
                bridge_frame(output, input, presentation_time_us)?;
                self.frames_rendered += 1;
                tracing::trace!("Frame bridged at {}us", presentation_time_us);
            }
            busy |= status.is_busy();
            if status != DrainState::RetryImmediately {
                break;
            }
        }

        busy |= drain_extractor(
            self.source.index,
            io.extractor,
            decoder,
            &mut self.extractor_done,
            timeout,
        )?
        .is_busy();

        Ok(busy)
    }

    pub fn track_index(&self) -> usize {
        self.source.index
    }

    pub fn presentation_time_us(&self) -> i64 {
        self.progress.presentation_time_us
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    pub fn state(&self) -> CoderState {
        self.state
    }

    pub fn samples_written(&self) -> u64 {
        self.progress.samples_written
    }

    #[cfg(test)]
    pub(crate) fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn release(&mut self) {
        if let Some(mut surface) = self.output_surface.take() {
            surface.release();
        }
        if let Some(mut surface) = self.input_surface.take() {
            surface.release();
        }
        release_codec(self.decoder.take(), self.decoder_started, "video decoder");
        let had_encoder = self.encoder.is_some();
        release_codec(self.encoder.take(), self.encoder_started, "video encoder");
        self.decoder_started = false;
        self.encoder_started = false;
        if had_encoder {
            tracing::debug!("Video coder released after {} frames", self.frames_rendered);
        }
    }
}

/// Releases at most one decoded frame to the decode surface.
///
/// Returns the presentation time of the frame when it was rendered and must
/// now be bridged to the encoder.
fn drain_decoder(
    decoder: &mut dyn MediaCodec,
    encoder: &mut dyn MediaCodec,
    state: &mut CoderState,
    timeout: Duration,
) -> Result<(DrainState, Option<i64>)> {
    if state.is_decoder_done() {
        return Ok((DrainState::None, None));
    }

    let (index, info) = match decoder.dequeue_output_buffer(timeout)? {
        OutputStatus::TryAgainLater => return Ok((DrainState::None, None)),
        OutputStatus::FormatChanged | OutputStatus::BuffersChanged => {
            return Ok((DrainState::RetryImmediately, None));
        }
        OutputStatus::Buffer { index, info } => (index, info),
    };

    let render = if info.is_end_of_stream() {
        encoder.signal_end_of_input_stream()?;
        *state = CoderState::DecoderEndOfStream;
        tracing::debug!("Video decoder reached end of stream, encoder input closed");
        false
    } else {
        info.size > 0
    };

    decoder.release_output_buffer(index, render)?;
    Ok((
        DrainState::Consumed,
        render.then_some(info.presentation_time_us),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_codec::ScriptedCodec;
    use crate::media::{BufferFlags, BufferInfo, mime};

    fn hd_coder() -> VideoCoder {
        let source = TrackSource {
            index: 0,
            kind: MediaKind::Video,
            format: MediaFormat::video(mime::VIDEO_AVC, 1920, 1080).with_rotation(90),
        };
        VideoCoder::new(
            source,
            MediaFormat::video(mime::VIDEO_AVC, 1280, 720),
            CoderSettings::default(),
        )
    }

    #[test]
    fn test_release_before_setup_is_safe() {
        let mut coder = hd_coder();
        coder.release();
        coder.release();
        assert_eq!(coder.state(), CoderState::NotStarted);
        assert_eq!(coder.frames_rendered(), 0);
    }

    #[test]
    fn test_failed_decoder_release_still_releases_encoder() {
        let decoder = ScriptedCodec::new(0).failing_release();
        let encoder = ScriptedCodec::new(0);
        let (decoder_calls, encoder_calls) = (decoder.lifecycle(), encoder.lifecycle());

        let mut coder = hd_coder();
        coder.decoder = Some(Box::new(decoder));
        coder.encoder = Some(Box::new(encoder));
        coder.decoder_started = true;
        coder.encoder_started = true;

        coder.release();
        coder.release();

        assert_eq!(decoder_calls.calls(), ["stop", "release"]);
        assert_eq!(encoder_calls.calls(), ["stop", "release"]);
    }

    #[test]
    fn test_decoded_frame_is_rendered() {
        let mut decoder = ScriptedCodec::new(0);
        let mut encoder = ScriptedCodec::new(0);
        let index = decoder.push_output(vec![0; 16]);
        decoder.push_event(OutputStatus::Buffer {
            index,
            info: BufferInfo::new(0, 16, 33_333, BufferFlags::NONE),
        });
        let mut state = CoderState::Running;

        let drained = drain_decoder(&mut decoder, &mut encoder, &mut state, Duration::ZERO).unwrap();

        assert_eq!(drained, (DrainState::Consumed, Some(33_333)));
        assert_eq!(decoder.rendered_outputs(), &[index]);
        assert_eq!(state, CoderState::Running);
        assert!(!encoder.end_of_input_signaled());
    }

    #[test]
    fn test_decoder_end_of_stream_closes_encoder_input() {
        let mut decoder = ScriptedCodec::new(0);
        let mut encoder = ScriptedCodec::new(0);
        decoder.push_event(OutputStatus::FormatChanged);
        let eos = decoder.push_output(Vec::new());
        decoder.push_event(OutputStatus::Buffer {
            index: eos,
            info: BufferInfo::end_of_stream(0),
        });
        let mut state = CoderState::Running;

        let drained = drain_decoder(&mut decoder, &mut encoder, &mut state, Duration::ZERO).unwrap();
        assert_eq!(drained, (DrainState::RetryImmediately, None));

        let drained = drain_decoder(&mut decoder, &mut encoder, &mut state, Duration::ZERO).unwrap();
        assert_eq!(drained, (DrainState::Consumed, None));
        assert_eq!(state, CoderState::DecoderEndOfStream);
        assert!(encoder.end_of_input_signaled());
        assert_eq!(decoder.released_outputs(), &[eos]);
        assert!(decoder.rendered_outputs().is_empty());

        // Nothing more is pulled from a finished decoder
        let drained = drain_decoder(&mut decoder, &mut encoder, &mut state, Duration::ZERO).unwrap();
        assert_eq!(drained, (DrainState::None, None));
    }
}
