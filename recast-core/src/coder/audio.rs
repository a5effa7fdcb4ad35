//! Audio track: decode to PCM, remix channels, re-encode

use std::time::Duration;

use super::{
    CoderSettings, CoderState, DrainState, EncoderProgress, TrackIo, TrackSource, drain_encoder,
    drain_extractor, release_codec, require_mime,
};
use crate::audio::AudioChannel;
use crate::backend::{CodecError, MediaBackend, MediaCodec, OutputStatus};
use crate::error::Result;
use crate::media::{MediaFormat, MediaKind};

pub struct AudioCoder {
    source: TrackSource,
    output_format: MediaFormat,
    settings: CoderSettings,
    decoder: Option<Box<dyn MediaCodec>>,
    encoder: Option<Box<dyn MediaCodec>>,
    decoder_started: bool,
    encoder_started: bool,
    channel: Option<AudioChannel>,
    state: CoderState,
    extractor_done: bool,
    progress: EncoderProgress,
}

impl AudioCoder {
    pub fn new(source: TrackSource, output_format: MediaFormat, settings: CoderSettings) -> Self {
        Self {
            source,
            output_format,
            settings,
            decoder: None,
            encoder: None,
            decoder_started: false,
            encoder_started: false,
            channel: None,
            state: CoderState::NotStarted,
            extractor_done: false,
            progress: EncoderProgress::default(),
        }
    }

    pub(crate) fn setup(&mut self, io: TrackIo<'_>, backend: &dyn MediaBackend) -> Result<()> {
        let output_mime = require_mime(&self.output_format, "audio output")?;
        let input_mime = require_mime(&self.source.format, "audio input")?;
        io.extractor.select_track(self.source.index)?;

        self.channel = Some(AudioChannel::new(&self.output_format)?);

        let encoder = self.encoder.insert(backend.codecs().create_encoder(output_mime)?);
        encoder.configure(&self.output_format, None)?;
        encoder.start()?;
        self.encoder_started = true;

        let decoder = self.decoder.insert(backend.codecs().create_decoder(input_mime)?);
        decoder.configure(&self.source.format, None)?;
        decoder.start()?;
        self.decoder_started = true;

        self.state = CoderState::Running;
        tracing::info!(
            "Audio track {} transcoding: {} -> {}",
            self.source.index,
            self.source.format,
            self.output_format
        );
        Ok(())
    }

    pub(crate) fn step_pipeline(&mut self, io: TrackIo<'_>) -> Result<bool> {
        let (Some(decoder), Some(encoder), Some(channel)) = (
            self.decoder.as_deref_mut(),
            self.encoder.as_deref_mut(),
            self.channel.as_mut(),
        ) else {
            return Err(CodecError::InvalidState {
                reason: "audio coder stepped before setup".to_string(),
            }
            .into());
        };
        let timeout = self.settings.dequeue_timeout;
        let mut busy = false;

        while drain_encoder(
            MediaKind::Audio,
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
            let status = drain_decoder(decoder, channel, &mut self.state, timeout)?;
            busy |= status.is_busy();
            if status != DrainState::RetryImmediately {
                break;
            }
        }

        while channel.feed_encoder(decoder, encoder, timeout)? {
            busy = true;
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

    pub fn release(&mut self) {
        release_codec(self.decoder.take(), self.decoder_started, "audio decoder");
        release_codec(self.encoder.take(), self.encoder_started, "audio encoder");
        self.decoder_started = false;
        self.encoder_started = false;
        self.channel = None;
    }
}

/// Hands at most one decoded PCM buffer to the channel.
fn drain_decoder(
    decoder: &mut dyn MediaCodec,
    channel: &mut AudioChannel,
    state: &mut CoderState,
    timeout: Duration,
) -> Result<DrainState> {
    if state.is_decoder_done() {
        return Ok(DrainState::None);
    }

    match decoder.dequeue_output_buffer(timeout)? {
        OutputStatus::TryAgainLater => Ok(DrainState::None),
        OutputStatus::FormatChanged => {
            channel.bind_decoded_format(&decoder.output_format()?)?;
            Ok(DrainState::RetryImmediately)
        }
        OutputStatus::BuffersChanged => Ok(DrainState::RetryImmediately),
        OutputStatus::Buffer { index, info } => {
            if info.is_end_of_stream() {
                *state = CoderState::DecoderEndOfStream;
                decoder.release_output_buffer(index, false)?;
                channel.enqueue_decoder_output(decoder, None, 0)?;
                tracing::debug!("Audio decoder reached end of stream");
            } else if info.size > 0 {
                channel.enqueue_decoder_output(decoder, Some(index), info.presentation_time_us)?;
            } else {
                decoder.release_output_buffer(index, false)?;
            }
            Ok(DrainState::Consumed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_codec::ScriptedCodec;
    use crate::media::{BufferFlags, BufferInfo, mime};

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn stereo_channel() -> AudioChannel {
        AudioChannel::new(&MediaFormat::audio(mime::AUDIO_AAC, 44100, 2)).unwrap()
    }

    #[test]
    fn test_format_change_binds_channel() {
        let mut decoder = ScriptedCodec::new(0)
            .with_output_format(MediaFormat::audio(mime::AUDIO_RAW, 44100, 1));
        decoder.push_event(OutputStatus::FormatChanged);
        let mut channel = stereo_channel();
        let mut state = CoderState::Running;

        let status = drain_decoder(&mut decoder, &mut channel, &mut state, Duration::ZERO).unwrap();
        assert_eq!(status, DrainState::RetryImmediately);

        let status = drain_decoder(&mut decoder, &mut channel, &mut state, Duration::ZERO).unwrap();
        assert_eq!(status, DrainState::None);
    }

    #[test]
    fn test_rate_mismatch_fails() {
        let mut decoder = ScriptedCodec::new(0)
            .with_output_format(MediaFormat::audio(mime::AUDIO_RAW, 48000, 2));
        decoder.push_event(OutputStatus::FormatChanged);
        let mut channel = stereo_channel();
        let mut state = CoderState::Running;

        assert!(drain_decoder(&mut decoder, &mut channel, &mut state, Duration::ZERO).is_err());
    }

    #[test]
    fn test_decoded_buffers_reach_encoder() {
        let mut decoder = ScriptedCodec::new(0)
            .with_output_format(MediaFormat::audio(mime::AUDIO_RAW, 44100, 2));
        let mut encoder = ScriptedCodec::new(64);
        let mut channel = stereo_channel();
        let mut state = CoderState::Running;

        decoder.push_event(OutputStatus::FormatChanged);
        let index = decoder.push_output(pcm(&[1, -1, 2, -2]));
        decoder.push_event(OutputStatus::Buffer {
            index,
            info: BufferInfo::new(0, 8, 1_000, BufferFlags::NONE),
        });
        let eos = decoder.push_output(Vec::new());
        decoder.push_event(OutputStatus::Buffer {
            index: eos,
            info: BufferInfo::end_of_stream(0),
        });

        for _ in 0..3 {
            drain_decoder(&mut decoder, &mut channel, &mut state, Duration::ZERO).unwrap();
        }
        assert_eq!(state, CoderState::DecoderEndOfStream);
        assert_eq!(channel.pending_buffers(), 2);

        while channel
            .feed_encoder(&mut decoder, &mut encoder, Duration::ZERO)
            .unwrap()
        {}

        let inputs = encoder.queued_inputs();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].1, pcm(&[1, -1, 2, -2]));
        assert_eq!(inputs[0].0.presentation_time_us, 1_000);
        assert!(inputs[1].0.is_end_of_stream());
        assert_eq!(decoder.released_outputs(), &[eos, index]);
    }

    #[test]
    fn test_failed_decoder_release_still_releases_encoder() {
        let source = TrackSource {
            index: 1,
            kind: MediaKind::Audio,
            format: MediaFormat::audio(mime::AUDIO_AAC, 44100, 2),
        };
        let mut coder = AudioCoder::new(
            source,
            MediaFormat::audio(mime::AUDIO_AAC, 44100, 2),
            CoderSettings::default(),
        );
        let decoder = ScriptedCodec::new(0).failing_release();
        let encoder = ScriptedCodec::new(0);
        let (decoder_calls, encoder_calls) = (decoder.lifecycle(), encoder.lifecycle());
        coder.decoder = Some(Box::new(decoder));
        coder.encoder = Some(Box::new(encoder));
        coder.decoder_started = true;

        coder.release();

        assert_eq!(decoder_calls.calls(), ["stop", "release"]);
        // Never started, so only released
        assert_eq!(encoder_calls.calls(), ["release"]);
    }

    #[test]
    fn test_release_before_setup_is_safe() {
        let source = TrackSource {
            index: 0,
            kind: MediaKind::Audio,
            format: MediaFormat::audio(mime::AUDIO_AAC, 44100, 2),
        };
        let mut coder = AudioCoder::new(
            source,
            MediaFormat::audio(mime::AUDIO_AAC, 44100, 1),
            CoderSettings::default(),
        );
        coder.release();
        coder.release();
        assert_eq!(coder.state(), CoderState::NotStarted);
        assert!(!coder.is_finished());
    }
}
