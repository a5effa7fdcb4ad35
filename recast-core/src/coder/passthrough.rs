//! Copies a track's samples into the output unchanged

use super::{CoderSettings, TrackIo, TrackSource, require_mime};
use crate::backend::ContainerError;
use crate::error::Result;
use crate::media::{BufferFlags, BufferInfo, MediaKind};

pub struct PassThroughCoder {
    source: TrackSource,
    buffer: Vec<u8>,
    default_buffer_size: usize,
    end_of_stream: bool,
    presentation_time_us: i64,
    samples_written: u64,
}

impl PassThroughCoder {
    pub fn new(source: TrackSource, settings: CoderSettings) -> Self {
        Self {
            source,
            buffer: Vec::new(),
            default_buffer_size: settings.pass_through_buffer_size,
            end_of_stream: false,
            presentation_time_us: 0,
            samples_written: 0,
        }
    }

    pub fn media_kind(&self) -> MediaKind {
        self.source.kind
    }

    /// Registers the unchanged input format with the muxer.
    pub(crate) fn setup(&mut self, io: TrackIo<'_>) -> Result<()> {
        require_mime(&self.source.format, "pass-through input")?;
        io.extractor.select_track(self.source.index)?;

        let size = self
            .source
            .format
            .max_input_size
            .unwrap_or(self.default_buffer_size);
        self.buffer = vec![0; size];

        tracing::info!(
            "Passing {} track {} through: {} (copy buffer {} bytes)",
            self.source.kind,
            self.source.index,
            self.source.format,
            size
        );
        io.muxer
            .set_output_format(self.source.kind, self.source.format.clone())
    }

    pub(crate) fn step_pipeline(&mut self, io: TrackIo<'_>) -> Result<bool> {
        if self.end_of_stream {
            return Ok(false);
        }

        let kind = self.source.kind;
        let Some(track) = io.extractor.sample_track_index() else {
            io.muxer.write_sample(
                kind,
                &[],
                &BufferInfo::end_of_stream(self.presentation_time_us),
            )?;
            self.end_of_stream = true;
            tracing::debug!("Pass-through {} track reached end of stream", kind);
            return Ok(true);
        };

        if track != self.source.index {
            return Ok(false);
        }

        if let Some(size) = io.extractor.sample_size()
            && size > self.buffer.len()
        {
            return Err(ContainerError::SampleTooLarge {
                size,
                capacity: self.buffer.len(),
            }
            .into());
        }

        let size = io.extractor.read_sample_data(&mut self.buffer)?;
        let flags = if io.extractor.sample_is_key_frame() {
            BufferFlags::KEY_FRAME
        } else {
            BufferFlags::NONE
        };
        let info = BufferInfo::new(0, size, io.extractor.sample_time_us(), flags);
        io.muxer.write_sample(kind, &self.buffer[..size], &info)?;

        self.presentation_time_us = info.presentation_time_us;
        self.samples_written += 1;
        io.extractor.advance();
        Ok(true)
    }

    pub fn track_index(&self) -> usize {
        self.source.index
    }

    pub fn presentation_time_us(&self) -> i64 {
        self.presentation_time_us
    }

    pub fn is_finished(&self) -> bool {
        self.end_of_stream
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Nothing to release, the extractor and muxer belong to the engine.
    pub fn release(&mut self) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::coder::test_support::{Sample, SharedWriter, VecExtractor, WrittenTracks};
    use crate::error::TranscodeError;
    use crate::media::{MediaFormat, mime};
    use crate::muxer::QueuedMuxer;

    fn audio_source(max_input_size: Option<usize>) -> TrackSource {
        let mut format = MediaFormat::audio(mime::AUDIO_AAC, 44100, 2)
            .with_csd(vec![0x12, 0x10], None);
        format.max_input_size = max_input_size;
        TrackSource {
            index: 1,
            kind: MediaKind::Audio,
            format,
        }
    }

    fn sample(track: usize, pts: i64, data: Vec<u8>) -> Sample {
        Sample {
            track,
            pts,
            key: true,
            data,
        }
    }

    fn setup(
        source: TrackSource,
        samples: Vec<Sample>,
    ) -> (
        PassThroughCoder,
        VecExtractor,
        QueuedMuxer,
        Arc<Mutex<WrittenTracks>>,
    ) {
        let written = Arc::new(Mutex::new(WrittenTracks::default()));
        let mut muxer = QueuedMuxer::new(
            Box::new(SharedWriter(written.clone())),
            &[MediaKind::Audio],
        );
        let mut extractor = VecExtractor::new(
            vec![
                MediaFormat::video(mime::VIDEO_AVC, 640, 360),
                source.format.clone(),
            ],
            samples,
        );
        let mut coder = PassThroughCoder::new(source, CoderSettings::default());
        coder
            .setup(TrackIo {
                extractor: &mut extractor,
                muxer: &mut muxer,
            })
            .unwrap();
        (coder, extractor, muxer, written)
    }

    #[test]
    fn test_copies_samples_and_format() {
        let source = audio_source(None);
        let (mut coder, mut extractor, mut muxer, written) = setup(
            source.clone(),
            vec![sample(1, 0, vec![1, 2, 3]), sample(1, 23_219, vec![4, 5])],
        );
        assert_eq!(extractor.selected, vec![1]);

        while coder
            .step_pipeline(TrackIo {
                extractor: &mut extractor,
                muxer: &mut muxer,
            })
            .unwrap()
        {}

        assert!(coder.is_finished());
        assert_eq!(coder.presentation_time_us(), 23_219);
        assert_eq!(coder.samples_written(), 2);

        let written = written.lock();
        assert_eq!(written.formats, vec![source.format]);
        assert_eq!(written.samples.len(), 3);
        assert_eq!(written.samples[0].1, vec![1, 2, 3]);
        assert!(written.samples[0].2.flags.is_key_frame());
        assert_eq!(written.samples[1].1, vec![4, 5]);
        assert!(written.samples[2].2.is_end_of_stream());
    }

    #[test]
    fn test_waits_for_other_track() {
        let (mut coder, mut extractor, mut muxer, written) =
            setup(audio_source(None), vec![sample(0, 0, vec![9])]);

        let busy = coder
            .step_pipeline(TrackIo {
                extractor: &mut extractor,
                muxer: &mut muxer,
            })
            .unwrap();
        assert!(!busy);
        assert!(!coder.is_finished());
        assert!(written.lock().samples.is_empty());
    }

    #[test]
    fn test_oversized_sample_is_error() {
        let (mut coder, mut extractor, mut muxer, _written) =
            setup(audio_source(Some(4)), vec![sample(1, 0, vec![0; 5])]);

        let error = coder
            .step_pipeline(TrackIo {
                extractor: &mut extractor,
                muxer: &mut muxer,
            })
            .unwrap_err();
        assert!(matches!(
            error,
            TranscodeError::Container(ContainerError::SampleTooLarge {
                size: 5,
                capacity: 4
            })
        ));
    }

    #[test]
    fn test_default_buffer_size() {
        let (coder, _extractor, _muxer, _written) = setup(audio_source(None), Vec::new());
        assert_eq!(coder.buffer.len(), 2048);
    }
}
