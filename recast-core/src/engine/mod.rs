//! Job orchestration: track selection, coder construction and the step loop
//!
//! One job runs entirely on the calling thread. The engine owns the
//! extractor, the muxer and every coder for the duration of [`TranscodeEngine::run`]
//! and releases all of them on every exit path.

pub mod capture;
pub mod progress;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

pub use capture::{CapturedFrame, capture_frame};
pub use progress::{
    CancellationFlag, INDETERMINATE_PROGRESS, JobEvent, NoopListener, ProgressListener,
    RecordingListener, TrackPosition, overall_progress,
};

use crate::backend::{ContainerFormat, Extractor, MediaBackend, SourceMetadata};
use crate::coder::{CoderKind, TrackCoder, TrackIo, TrackSource};
use crate::config::PipelineConfig;
use crate::error::{Result, TranscodeError};
use crate::media::{MediaFormat, MediaKind};
use crate::muxer::{MuxerState, QueuedMuxer};
use crate::strategy::FormatStrategy;
use crate::validation::OutputPolicy;

/// One input to output transcode request.
#[derive(Clone)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub strategy: Arc<dyn FormatStrategy>,
}

impl TranscodeJob {
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        strategy: Arc<dyn FormatStrategy>,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            strategy,
        }
    }
}

impl fmt::Debug for TranscodeJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscodeJob")
            .field("input", &self.input)
            .field("output", &self.output)
            .field("container", &self.strategy.container())
            .finish()
    }
}

/// Per-track summary of a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackReport {
    pub track_index: usize,
    pub kind: MediaKind,
    pub coder: CoderKind,
    pub samples_written: u64,
    pub last_presentation_time_us: i64,
    pub finished: bool,
}

/// Summary of a completed job.
#[derive(Debug, Clone, Serialize)]
pub struct TranscodeReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub container: ContainerFormat,
    pub duration_us: Option<i64>,
    pub rotation_degrees: u32,
    pub tracks: Vec<TrackReport>,
    pub iterations: u64,
    pub elapsed: Duration,
}

impl TranscodeReport {
    pub fn track(&self, kind: MediaKind) -> Option<&TrackReport> {
        self.tracks.iter().find(|track| track.kind == kind)
    }
}

/// How a job ended when it did not fail.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(TranscodeReport),
    Cancelled,
}

impl RunOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled)
    }

    pub fn report(&self) -> Option<&TranscodeReport> {
        match self {
            RunOutcome::Completed(report) => Some(report),
            RunOutcome::Cancelled => None,
        }
    }
}

/// Runs transcode jobs against a media backend.
#[derive(Clone)]
pub struct TranscodeEngine {
    backend: Arc<dyn MediaBackend>,
    config: PipelineConfig,
}

impl TranscodeEngine {
    pub fn new(backend: Arc<dyn MediaBackend>, config: PipelineConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs `job` and dispatches the terminal listener callback.
    ///
    /// # Errors
    ///
    /// Same as [`TranscodeEngine::run`]. The error is also passed to
    /// `listener.on_error`.
    pub fn execute(
        &self,
        job: &TranscodeJob,
        listener: &dyn ProgressListener,
        cancel: &CancellationFlag,
    ) -> Result<RunOutcome> {
        let result = self.run(job, listener, cancel);
        match &result {
            Ok(RunOutcome::Completed(report)) => listener.on_complete(report),
            Ok(RunOutcome::Cancelled) => listener.on_cancelled(),
            Err(e) => listener.on_error(e),
        }
        result
    }

    /// Transcodes `job.input` into `job.output`.
    ///
    /// Blocks the calling thread until the job completes, fails, or observes
    /// `cancel`. Only progress callbacks are made.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Configuration` - Unreadable input, zero duration, no usable track, missing codec
    /// - `TranscodeError::Negotiation` - An encoder produced a format the container rejects
    /// - `TranscodeError::Pipeline` / `Codec` / `Gpu` / `Container` - Failure while samples were flowing
    pub fn run(
        &self,
        job: &TranscodeJob,
        listener: &dyn ProgressListener,
        cancel: &CancellationFlag,
    ) -> Result<RunOutcome> {
        let started_at = Instant::now();
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }

        tracing::info!(
            "Starting transcode {} -> {}",
            job.input.display(),
            job.output.display()
        );

        let metadata = self.backend.read_metadata(&job.input)?;
        if metadata.duration_us.is_some_and(|duration| duration <= 0) {
            return Err(TranscodeError::configuration(format!(
                "{} has zero duration",
                job.input.display()
            )));
        }

        let mut extractor = self.backend.open_extractor(&job.input)?;
        let result = self.run_with_extractor(
            job,
            extractor.as_mut(),
            metadata,
            listener,
            cancel,
            started_at,
        );
        extractor.release();

        match &result {
            Ok(RunOutcome::Completed(report)) => tracing::info!(
                "Transcode finished in {:?}: {} ({} iterations)",
                report.elapsed,
                job.output.display(),
                report.iterations
            ),
            Ok(RunOutcome::Cancelled) => {
                tracing::info!("Transcode of {} cancelled", job.input.display());
            }
            Err(e) => tracing::error!("Transcode of {} failed: {}", job.input.display(), e),
        }
        result
    }

    fn run_with_extractor(
        &self,
        job: &TranscodeJob,
        extractor: &mut dyn Extractor,
        metadata: SourceMetadata,
        listener: &dyn ProgressListener,
        cancel: &CancellationFlag,
        started_at: Instant,
    ) -> Result<RunOutcome> {
        let sources = select_tracks(extractor)?;
        let mut coders = self.build_coders(job.strategy.as_ref(), sources)?;

        let container = job.strategy.container();
        let expected: Vec<MediaKind> = coders.iter().map(TrackCoder::media_kind).collect();
        let transcoded: Vec<MediaKind> = coders
            .iter()
            .filter(|coder| coder.kind() != CoderKind::PassThrough)
            .map(TrackCoder::media_kind)
            .collect();

        // Nothing is written to disk before this point
        let mut writer = self.backend.create_writer(&job.output, container)?;
        if let Err(e) = writer.set_orientation_hint(metadata.rotation_degrees) {
            writer.release();
            remove_partial_output(&job.output);
            return Err(e.into());
        }

        let mut muxer =
            QueuedMuxer::with_capacity(writer, &expected, self.config.muxer_backing_capacity);
        let policy = OutputPolicy::for_container(container);
        muxer.set_validator(Box::new(move |kind, format: &MediaFormat| {
            if transcoded.contains(&kind) {
                policy.validate(kind, format)
            } else {
                Ok(())
            }
        }));

        let mut pipeline = Pipeline {
            coders: &mut coders,
            extractor,
            muxer: &mut muxer,
        };
        let result = self.drive(&mut pipeline, metadata.duration_us, listener, cancel);

        for coder in &mut coders {
            coder.release();
        }
        muxer.release();

        let iterations = match result {
            Ok(Some(iterations)) => iterations,
            Ok(None) => {
                remove_partial_output(&job.output);
                return Ok(RunOutcome::Cancelled);
            }
            Err(e) => {
                remove_partial_output(&job.output);
                return Err(e);
            }
        };

        let tracks = coders
            .iter()
            .map(|coder| TrackReport {
                track_index: coder.track_index(),
                kind: coder.media_kind(),
                coder: coder.kind(),
                samples_written: coder.samples_written(),
                last_presentation_time_us: coder.presentation_time_us(),
                finished: coder.is_finished(),
            })
            .collect();

        Ok(RunOutcome::Completed(TranscodeReport {
            input: job.input.clone(),
            output: job.output.clone(),
            container,
            duration_us: metadata.duration_us,
            rotation_degrees: metadata.rotation_degrees,
            tracks,
            iterations,
            elapsed: started_at.elapsed(),
        }))
    }

    fn build_coders(
        &self,
        strategy: &dyn FormatStrategy,
        sources: Vec<TrackSource>,
    ) -> Result<Vec<TrackCoder>> {
        let codecs = self.backend.codecs();
        let settings = self.config.coder_settings();
        let mut coders = Vec::with_capacity(sources.len());

        for source in sources {
            let output = match source.kind {
                MediaKind::Video => strategy.video_output_format(&source.format)?,
                MediaKind::Audio => strategy.audio_output_format(&source.format)?,
            };

            if let Some(output) = &output {
                let input_mime = source.format.mime().unwrap_or_default();
                if !codecs.supports_decoder(input_mime) {
                    return Err(TranscodeError::configuration(format!(
                        "no decoder for {} track {} ({input_mime})",
                        source.kind, source.index
                    )));
                }
                let output_mime = output.mime().unwrap_or_default();
                if !codecs.supports_encoder(output_mime) {
                    return Err(TranscodeError::configuration(format!(
                        "no encoder for {output_mime}"
                    )));
                }
            }

            tracing::info!(
                "Track {} ({}): {} -> {}",
                source.index,
                source.kind,
                source.format,
                output
                    .as_ref()
                    .map_or_else(|| "pass-through".to_string(), ToString::to_string)
            );
            coders.push(TrackCoder::for_track(source, output, settings));
        }
        Ok(coders)
    }

    /// Sets up the coders and steps them until one finishes.
    ///
    /// Returns the iteration count, or `None` when cancelled.
    fn drive(
        &self,
        pipeline: &mut Pipeline<'_>,
        duration_us: Option<i64>,
        listener: &dyn ProgressListener,
        cancel: &CancellationFlag,
    ) -> Result<Option<u64>> {
        let backend = self.backend.as_ref();
        for coder in pipeline.coders.iter_mut() {
            coder.setup(
                TrackIo {
                    extractor: &mut *pipeline.extractor,
                    muxer: &mut *pipeline.muxer,
                },
                backend,
            )?;
        }

        if duration_us.is_none() {
            listener.on_progress(INDETERMINATE_PROGRESS);
        }

        let interval = self.config.progress_interval.max(1);
        let mut iteration: u64 = 0;

        while !pipeline.coders.iter().any(TrackCoder::is_finished) {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let mut busy = false;
            for coder in pipeline.coders.iter_mut() {
                busy |= coder.step_pipeline(TrackIo {
                    extractor: &mut *pipeline.extractor,
                    muxer: &mut *pipeline.muxer,
                })?;
            }
            iteration += 1;

            if let Some(duration_us) = duration_us
                && iteration % interval == 0
            {
                listener.on_progress(overall_progress(&pipeline.positions(), duration_us));
            }

            if !busy {
                std::thread::sleep(self.config.idle_sleep);
            }
        }

        if pipeline.muxer.state() != MuxerState::Started {
            let kind = pipeline
                .coders
                .iter()
                .find(|coder| !coder.is_finished())
                .or(pipeline.coders.first())
                .map_or(MediaKind::Video, TrackCoder::media_kind);
            return Err(TranscodeError::Pipeline {
                kind,
                reason: "a track finished before every output format was negotiated".to_string(),
            });
        }

        pipeline.muxer.stop()?;
        if duration_us.is_some() {
            listener.on_progress(1.0);
        }
        Ok(Some(iteration))
    }
}

/// Collaborators borrowed for the step loop.
struct Pipeline<'a> {
    coders: &'a mut Vec<TrackCoder>,
    extractor: &'a mut dyn Extractor,
    muxer: &'a mut QueuedMuxer,
}

impl Pipeline<'_> {
    fn positions(&self) -> Vec<TrackPosition> {
        self.coders
            .iter()
            .map(|coder| TrackPosition {
                presentation_time_us: coder.presentation_time_us(),
                finished: coder.is_finished(),
            })
            .collect()
    }
}

/// Picks the first video and the first audio track, video first.
///
/// # Errors
///
/// - `TranscodeError::Configuration` - Neither a video nor an audio track exists
pub fn select_tracks(extractor: &dyn Extractor) -> Result<Vec<TrackSource>> {
    let mut video = None;
    let mut audio = None;

    for index in 0..extractor.track_count() {
        let format = extractor.track_format(index)?;
        let (slot, kind) = match format.kind() {
            Some(MediaKind::Video) => (&mut video, MediaKind::Video),
            Some(MediaKind::Audio) => (&mut audio, MediaKind::Audio),
            None => continue,
        };
        if slot.is_none() {
            *slot = Some(TrackSource {
                index,
                kind,
                format,
            });
        }
    }

    let sources: Vec<TrackSource> = video.into_iter().chain(audio).collect();
    if sources.is_empty() {
        return Err(TranscodeError::configuration(
            "input has no decodable video or audio track",
        ));
    }
    Ok(sources)
}

fn remove_partial_output(output: &Path) {
    match std::fs::remove_file(output) {
        Ok(()) => tracing::debug!("Removed partial output {}", output.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            "Failed to remove partial output {}: {}",
            output.display(),
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_backend::{MemoryBackend, audio_format, interleaved, video_format};
    use crate::coder::test_support::VecExtractor;
    use crate::error::ErrorCategory;
    use crate::media::mime;
    use crate::strategy::{FitStrategy, PassThroughStrategy, Preset};

    /// Cancels the job from its first progress report.
    struct CancelOnProgress {
        flag: CancellationFlag,
        inner: RecordingListener,
    }

    impl ProgressListener for CancelOnProgress {
        fn on_progress(&self, fraction: f64) {
            self.flag.cancel();
            self.inner.on_progress(fraction);
        }

        fn on_complete(&self, report: &TranscodeReport) {
            self.inner.on_complete(report);
        }

        fn on_error(&self, error: &TranscodeError) {
            self.inner.on_error(error);
        }

        fn on_cancelled(&self) {
            self.inner.on_cancelled();
        }
    }

    fn engine(backend: Arc<MemoryBackend>) -> TranscodeEngine {
        let config = PipelineConfig {
            idle_sleep: Duration::from_millis(1),
            ..Default::default()
        };
        TranscodeEngine::new(backend, config)
    }

    fn pass_through_job(output: &Path) -> TranscodeJob {
        TranscodeJob::new(
            "input.mp4",
            output,
            Arc::new(PassThroughStrategy::default()),
        )
    }

    #[test]
    fn test_pass_through_copies_formats_and_samples() {
        let backend = Arc::new(MemoryBackend::new(
            Some(1_000_000),
            vec![video_format(), audio_format()],
            interleaved(12),
        ));
        let listener = RecordingListener::new();

        let outcome = engine(backend.clone())
            .execute(
                &pass_through_job(Path::new("out.mp4")),
                &listener,
                &CancellationFlag::new(),
            )
            .unwrap();

        let report = outcome.report().unwrap();
        assert_eq!(report.container, ContainerFormat::Mp4);
        assert_eq!(report.rotation_degrees, 90);
        assert_eq!(report.tracks.len(), 2);
        let video = report.track(MediaKind::Video).unwrap();
        assert_eq!(video.coder, CoderKind::PassThrough);
        assert_eq!(video.track_index, 0);
        assert_eq!(video.samples_written, 12);
        assert!(video.finished);

        let written = backend.written.lock();
        assert_eq!(written.formats, vec![video_format(), audio_format()]);
        let payloads: Vec<&Vec<u8>> = written
            .samples
            .iter()
            .filter(|(track, data, _)| *track == 0 && !data.is_empty())
            .map(|(_, data, _)| data)
            .collect();
        assert_eq!(payloads.len(), 12);
        assert_eq!(payloads[3], &vec![0xAA, 3, 1]);

        assert_eq!(listener.last_event(), Some(JobEvent::Complete));
        assert_eq!(listener.progress_values().last(), Some(&1.0));
    }

    #[test]
    fn test_zero_duration_fails_before_writer_opens() {
        let backend = Arc::new(MemoryBackend::new(
            Some(0),
            vec![video_format()],
            interleaved(1),
        ));
        let listener = RecordingListener::new();

        let error = engine(backend.clone())
            .execute(
                &pass_through_job(Path::new("out.mp4")),
                &listener,
                &CancellationFlag::new(),
            )
            .unwrap_err();

        assert_eq!(error.category(), ErrorCategory::Configuration);
        assert_eq!(backend.writers_opened(), 0);
        assert!(matches!(listener.last_event(), Some(JobEvent::Error(_))));
    }

    #[test]
    fn test_input_without_media_tracks_is_rejected() {
        let backend = Arc::new(MemoryBackend::new(
            Some(1_000_000),
            vec![MediaFormat::default(), MediaFormat {
                mime: Some("text/vtt".to_string()),
                ..Default::default()
            }],
            Vec::new(),
        ));

        let error = engine(backend.clone())
            .run(
                &pass_through_job(Path::new("out.mp4")),
                &NoopListener,
                &CancellationFlag::new(),
            )
            .unwrap_err();

        assert!(matches!(error, TranscodeError::Configuration { .. }));
        assert_eq!(backend.writers_opened(), 0);
    }

    #[test]
    fn test_missing_codec_is_configuration_error() {
        let backend = Arc::new(MemoryBackend::new(
            Some(1_000_000),
            vec![video_format(), audio_format()],
            interleaved(4),
        ));
        let job = TranscodeJob::new(
            "input.mp4",
            "out.mp4",
            Arc::new(FitStrategy::preset(Preset::Hd720)),
        );

        let error = engine(backend.clone())
            .run(&job, &NoopListener, &CancellationFlag::new())
            .unwrap_err();

        assert_eq!(error.category(), ErrorCategory::Configuration);
        assert_eq!(backend.writers_opened(), 0);
    }

    #[test]
    fn test_cancelled_before_start() {
        let backend = Arc::new(MemoryBackend::new(
            Some(1_000_000),
            vec![video_format()],
            interleaved(4),
        ));
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let listener = RecordingListener::new();

        let outcome = engine(backend.clone())
            .execute(&pass_through_job(Path::new("out.mp4")), &listener, &cancel)
            .unwrap();

        assert!(outcome.is_cancelled());
        assert_eq!(backend.writers_opened(), 0);
        assert_eq!(listener.events(), vec![JobEvent::Cancelled]);
    }

    #[test]
    fn test_cancellation_mid_run_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("partial.mp4");
        std::fs::write(&output, b"partial").unwrap();

        let backend = Arc::new(MemoryBackend::new(
            Some(10_000_000),
            vec![video_format(), audio_format()],
            interleaved(40),
        ));
        let cancel = CancellationFlag::new();
        let listener = CancelOnProgress {
            flag: cancel.clone(),
            inner: RecordingListener::new(),
        };

        let outcome = engine(backend.clone())
            .execute(&pass_through_job(&output), &listener, &cancel)
            .unwrap();

        assert!(outcome.is_cancelled());
        assert_eq!(listener.inner.last_event(), Some(JobEvent::Cancelled));
        assert_eq!(listener.inner.progress_values().len(), 1);
        assert!(!output.exists());
    }

    #[test]
    fn test_unknown_duration_reports_indeterminate_once() {
        let backend = Arc::new(MemoryBackend::new(
            None,
            vec![video_format(), audio_format()],
            interleaved(25),
        ));
        let listener = RecordingListener::new();

        engine(backend)
            .execute(
                &pass_through_job(Path::new("out.mp4")),
                &listener,
                &CancellationFlag::new(),
            )
            .unwrap();

        assert_eq!(listener.progress_values(), vec![INDETERMINATE_PROGRESS]);
        assert_eq!(listener.last_event(), Some(JobEvent::Complete));
    }

    #[test]
    fn test_select_tracks_takes_first_of_each_kind() {
        let extractor = VecExtractor::new(
            vec![
                audio_format(),
                MediaFormat::default(),
                video_format(),
                MediaFormat::video(mime::VIDEO_VP8, 640, 360),
            ],
            Vec::new(),
        );

        let sources = select_tracks(&extractor).unwrap();

        assert_eq!(sources.len(), 2);
        assert_eq!((sources[0].index, sources[0].kind), (2, MediaKind::Video));
        assert_eq!((sources[1].index, sources[1].kind), (0, MediaKind::Audio));
    }
}
