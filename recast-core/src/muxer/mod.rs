//! Container writer front end that defers track creation
//!
//! Encoders report their output formats only after producing data, so
//! samples may arrive before every track is known. They are copied into one
//! growing backing buffer and replayed in arrival order once the writer can
//! be started.

use std::collections::BTreeMap;

use crate::backend::ContainerWriter;
use crate::error::{Result, TranscodeError};
use crate::media::{BufferInfo, MediaFormat, MediaKind};

/// Default initial size of the pre-start backing buffer.
pub const DEFAULT_BACKING_CAPACITY: usize = 64 * 1024;

/// Hook run once every expected format is known, before any track is added.
pub type FormatValidator = Box<dyn FnMut(MediaKind, &MediaFormat) -> Result<()> + Send>;

/// Lifecycle of the underlying writer. The transition is one way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerState {
    /// Waiting for output formats, samples are buffered
    Collecting,
    /// Tracks added and writer started, samples go straight through
    Started,
}

/// Sample recorded before the writer started.
#[derive(Debug, Clone, Copy)]
struct PendingSample {
    kind: MediaKind,
    offset: usize,
    len: usize,
    info: BufferInfo,
}

/// Serializes track writes from every coder into one container writer.
pub struct QueuedMuxer {
    writer: Box<dyn ContainerWriter>,
    expected: Vec<MediaKind>,
    formats: BTreeMap<MediaKind, MediaFormat>,
    tracks: BTreeMap<MediaKind, usize>,
    validator: Option<FormatValidator>,
    backing: Vec<u8>,
    pending: Vec<PendingSample>,
    state: MuxerState,
    samples_written: BTreeMap<MediaKind, u64>,
}

impl QueuedMuxer {
    /// Creates a muxer that starts once a format is known for every kind in `expected`.
    pub fn new(writer: Box<dyn ContainerWriter>, expected: &[MediaKind]) -> Self {
        Self::with_capacity(writer, expected, DEFAULT_BACKING_CAPACITY)
    }

    pub fn with_capacity(
        writer: Box<dyn ContainerWriter>,
        expected: &[MediaKind],
        backing_capacity: usize,
    ) -> Self {
        let mut expected = expected.to_vec();
        expected.sort();
        expected.dedup();

        Self {
            writer,
            expected,
            formats: BTreeMap::new(),
            tracks: BTreeMap::new(),
            validator: None,
            backing: Vec::with_capacity(backing_capacity),
            pending: Vec::new(),
            state: MuxerState::Collecting,
            samples_written: BTreeMap::new(),
        }
    }

    /// Installs the format validation hook.
    pub fn set_validator(&mut self, validator: FormatValidator) {
        self.validator = Some(validator);
    }

    pub fn state(&self) -> MuxerState {
        self.state
    }

    /// Records the output format for `kind`, starting the writer once all are known.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Negotiation` - Validator rejected a format
    /// - `TranscodeError::Pipeline` - Format changed after the writer started
    /// - `TranscodeError::Container` - Adding tracks, starting, or replaying failed
    pub fn set_output_format(&mut self, kind: MediaKind, format: MediaFormat) -> Result<()> {
        if self.state == MuxerState::Started {
            if self.formats.get(&kind) == Some(&format) {
                return Ok(());
            }
            return Err(TranscodeError::Pipeline {
                kind,
                reason: "output format changed after the container started".to_string(),
            });
        }

        tracing::debug!("Muxer received {} output format: {}", kind, format);
        self.formats.insert(kind, format);

        if self.expected.iter().all(|kind| self.formats.contains_key(kind)) {
            self.start()?;
        }
        Ok(())
    }

    /// Writes or buffers one sample of `kind`.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Container` - Writer rejected the sample
    pub fn write_sample(&mut self, kind: MediaKind, data: &[u8], info: &BufferInfo) -> Result<()> {
        match self.state {
            MuxerState::Started => {
                let track = self.track_for(kind)?;
                self.writer.write_sample(track, data, info)?;
                *self.samples_written.entry(kind).or_default() += 1;
            }
            MuxerState::Collecting => {
                let offset = self.backing.len();
                self.backing.extend_from_slice(data);
                self.pending.push(PendingSample {
                    kind,
                    offset,
                    len: data.len(),
                    info: *info,
                });
            }
        }
        Ok(())
    }

    /// Stops the writer if it was started.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Container` - Finalizing the container failed
    pub fn stop(&mut self) -> Result<()> {
        if self.state == MuxerState::Started {
            self.writer.stop()?;
        }
        Ok(())
    }

    pub fn release(&mut self) {
        self.writer.release();
    }

    /// Samples buffered while collecting.
    #[cfg(test)]
    pub(crate) fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub(crate) fn backing_capacity(&self) -> usize {
        self.backing.capacity()
    }

    /// Samples written through to the container for `kind`.
    pub fn samples_written(&self, kind: MediaKind) -> u64 {
        self.samples_written.get(&kind).copied().unwrap_or(0)
    }

    fn start(&mut self) -> Result<()> {
        if let Some(validator) = self.validator.as_mut() {
            for (kind, format) in &self.formats {
                validator(*kind, format)?;
            }
        }

        // BTreeMap order puts video before audio
        for (kind, format) in &self.formats {
            let track = self.writer.add_track(format)?;
            self.tracks.insert(*kind, track);
        }
        self.writer.start()?;
        self.state = MuxerState::Started;

        let pending = std::mem::take(&mut self.pending);
        tracing::debug!(
            "Muxer started with {} tracks, replaying {} buffered samples ({} bytes)",
            self.tracks.len(),
            pending.len(),
            self.backing.len()
        );

        for sample in &pending {
            let track = self.track_for(sample.kind)?;
            let data = &self.backing[sample.offset..sample.offset + sample.len];
            self.writer.write_sample(track, data, &sample.info)?;
            *self.samples_written.entry(sample.kind).or_default() += 1;
        }

        self.backing = Vec::new();
        Ok(())
    }

    fn track_for(&self, kind: MediaKind) -> Result<usize> {
        self.tracks
            .get(&kind)
            .copied()
            .ok_or_else(|| TranscodeError::Pipeline {
                kind,
                reason: "no container track for this kind".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use proptest::prelude::*;

    use super::*;
    use crate::backend::ContainerResult;
    use crate::media::{BufferFlags, mime};

    #[derive(Debug, Default)]
    struct WriterLog {
        tracks: Vec<MediaFormat>,
        started: bool,
        stopped: bool,
        samples: Vec<(usize, Vec<u8>, BufferInfo)>,
    }

    struct RecordingWriter(Arc<Mutex<WriterLog>>);

    impl ContainerWriter for RecordingWriter {
        fn set_orientation_hint(&mut self, _degrees: u32) -> ContainerResult<()> {
            Ok(())
        }

        fn add_track(&mut self, format: &MediaFormat) -> ContainerResult<usize> {
            let mut log = self.0.lock();
            log.tracks.push(format.clone());
            Ok(log.tracks.len() - 1)
        }

        fn start(&mut self) -> ContainerResult<()> {
            self.0.lock().started = true;
            Ok(())
        }

        fn write_sample(
            &mut self,
            track: usize,
            data: &[u8],
            info: &BufferInfo,
        ) -> ContainerResult<()> {
            let mut log = self.0.lock();
            assert!(log.started, "sample written before start");
            log.samples.push((track, data.to_vec(), *info));
            Ok(())
        }

        fn stop(&mut self) -> ContainerResult<()> {
            self.0.lock().stopped = true;
            Ok(())
        }

        fn release(&mut self) {}
    }

    fn recording_muxer(expected: &[MediaKind]) -> (QueuedMuxer, Arc<Mutex<WriterLog>>) {
        let log = Arc::new(Mutex::new(WriterLog::default()));
        let muxer = QueuedMuxer::new(Box::new(RecordingWriter(log.clone())), expected);
        (muxer, log)
    }

    fn video_format() -> MediaFormat {
        MediaFormat::video(mime::VIDEO_AVC, 1280, 720)
    }

    fn audio_format() -> MediaFormat {
        MediaFormat::audio(mime::AUDIO_AAC, 44100, 2)
    }

    fn info(pts: i64, size: usize) -> BufferInfo {
        BufferInfo::new(0, size, pts, BufferFlags::NONE)
    }

    #[test]
    fn test_buffers_until_all_formats_known() {
        let (mut muxer, log) = recording_muxer(&[MediaKind::Video, MediaKind::Audio]);
        assert_eq!(muxer.backing_capacity(), DEFAULT_BACKING_CAPACITY);

        muxer
            .write_sample(MediaKind::Audio, b"aa", &info(0, 2))
            .unwrap();
        muxer
            .set_output_format(MediaKind::Audio, audio_format())
            .unwrap();
        muxer
            .write_sample(MediaKind::Audio, b"bbb", &info(10, 3))
            .unwrap();

        assert_eq!(muxer.state(), MuxerState::Collecting);
        assert_eq!(muxer.pending_samples(), 2);
        assert!(log.lock().tracks.is_empty());

        muxer
            .set_output_format(MediaKind::Video, video_format())
            .unwrap();
        assert_eq!(muxer.state(), MuxerState::Started);

        let log = log.lock();
        assert_eq!(log.tracks, vec![video_format(), audio_format()]);
        assert_eq!(log.samples.len(), 2);
        assert_eq!(log.samples[0], (1, b"aa".to_vec(), info(0, 2)));
        assert_eq!(log.samples[1], (1, b"bbb".to_vec(), info(10, 3)));
    }

    #[test]
    fn test_single_track_starts_immediately() {
        let (mut muxer, log) = recording_muxer(&[MediaKind::Video]);
        muxer
            .set_output_format(MediaKind::Video, video_format())
            .unwrap();
        muxer
            .write_sample(MediaKind::Video, b"frame", &info(0, 5))
            .unwrap();
        muxer.stop().unwrap();

        let log = log.lock();
        assert_eq!(log.tracks.len(), 1);
        assert_eq!(log.samples.len(), 1);
        assert!(log.stopped);
        drop(log);
        assert_eq!(muxer.samples_written(MediaKind::Video), 1);
    }

    #[test]
    fn test_validator_rejection_prevents_start() {
        let (mut muxer, log) = recording_muxer(&[MediaKind::Video]);
        muxer.set_validator(Box::new(|kind, _format| {
            Err(TranscodeError::Negotiation {
                kind,
                reason: "wrong profile".to_string(),
            })
        }));

        let error = muxer
            .set_output_format(MediaKind::Video, video_format())
            .unwrap_err();
        assert!(matches!(error, TranscodeError::Negotiation { .. }));
        assert!(!log.lock().started);
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let (mut muxer, log) = recording_muxer(&[MediaKind::Video, MediaKind::Audio]);
        muxer.stop().unwrap();
        assert!(!log.lock().stopped);
    }

    #[test]
    fn test_backing_store_grows_past_initial_capacity() {
        let (mut muxer, log) = recording_muxer(&[MediaKind::Video, MediaKind::Audio]);
        let chunk = vec![0xAB; 16 * 1024];
        for i in 0..8 {
            muxer
                .write_sample(MediaKind::Video, &chunk, &info(i, chunk.len()))
                .unwrap();
        }
        muxer
            .set_output_format(MediaKind::Video, video_format())
            .unwrap();
        muxer
            .set_output_format(MediaKind::Audio, audio_format())
            .unwrap();

        let log = log.lock();
        assert_eq!(log.samples.len(), 8);
        assert!(log.samples.iter().all(|(_, data, _)| data == &chunk));
    }

    #[test]
    fn test_format_change_after_start_rejected() {
        let (mut muxer, _log) = recording_muxer(&[MediaKind::Video]);
        muxer
            .set_output_format(MediaKind::Video, video_format())
            .unwrap();
        muxer
            .set_output_format(MediaKind::Video, video_format())
            .unwrap();

        let changed = MediaFormat::video(mime::VIDEO_AVC, 640, 360);
        assert!(muxer.set_output_format(MediaKind::Video, changed).is_err());
    }

    fn sample_strategy() -> impl Strategy<Value = (bool, Vec<u8>, i64)> {
        (
            any::<bool>(),
            prop::collection::vec(any::<u8>(), 0..64),
            0i64..1_000_000,
        )
    }

    proptest! {
        #[test]
        fn test_replay_preserves_submission_order(
            before in prop::collection::vec(sample_strategy(), 0..32),
            after in prop::collection::vec(sample_strategy(), 0..8),
            video_first in any::<bool>(),
        ) {
            let (mut muxer, log) = recording_muxer(&[MediaKind::Video, MediaKind::Audio]);
            let kind_of = |is_video: bool| if is_video { MediaKind::Video } else { MediaKind::Audio };

            for (is_video, data, pts) in &before {
                muxer.write_sample(kind_of(*is_video), data, &info(*pts, data.len())).unwrap();
            }

            if video_first {
                muxer.set_output_format(MediaKind::Video, video_format()).unwrap();
                muxer.set_output_format(MediaKind::Audio, audio_format()).unwrap();
            } else {
                muxer.set_output_format(MediaKind::Audio, audio_format()).unwrap();
                muxer.set_output_format(MediaKind::Video, video_format()).unwrap();
            }

            for (is_video, data, pts) in &after {
                muxer.write_sample(kind_of(*is_video), data, &info(*pts, data.len())).unwrap();
            }

            let log = log.lock();
            let expected: Vec<_> = before
                .iter()
                .chain(after.iter())
                .map(|(is_video, data, pts)| {
                    let track = if *is_video { 0 } else { 1 };
                    (track, data.clone(), info(*pts, data.len()))
                })
                .collect();
            prop_assert_eq!(&log.samples, &expected);
        }
    }
}
