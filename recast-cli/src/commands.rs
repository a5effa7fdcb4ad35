//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use clap::{Args, Subcommand, ValueEnum};
use recast_core::config::RecastConfig;
use recast_core::engine::{INDETERMINATE_PROGRESS, capture_frame};
use recast_core::media::mime;
use recast_core::strategy::{
    FRAME_RATE_30, I_FRAME_INTERVAL_HD, VIDEO_BITRATE_720P, VideoCodec, VideoTarget,
};
use recast_core::{
    AudioTarget, ContainerFormat, FitStrategy, FormatStrategy, PassThroughStrategy, Preset,
    ProgressListener, RecastError, RunOutcome, ScaleStrategy, TranscodeEngine, TranscodeError,
    TranscodeJob, TranscodeReport, WorkerPool,
};
use recast_sim::{OutputSummary, SimBackend, SourceFixture};

type Result<T> = std::result::Result<T, RecastError>;

#[derive(Subcommand)]
pub enum Commands {
    /// Transcode one or more inputs on the job pool
    Transcode(TranscodeArgs),

    /// Write a synthetic source file for the simulated backend
    GenerateFixture(FixtureArgs),

    /// Decode a single frame into a raw RGBA file
    Capture {
        /// Source file to read
        input: PathBuf,

        /// Destination for the RGBA bytes
        output: PathBuf,

        /// Capture the first frame at or after this time
        #[arg(long, default_value_t = 0)]
        at_ms: i64,
    },

    /// Print the tracks of a transcoded output
    Inspect {
        /// Output file written by `transcode`
        output: PathBuf,
    },
}

#[derive(Args)]
pub struct TranscodeArgs {
    /// Source files to transcode
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Directory for outputs (defaults to each input's directory)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Output size preset
    #[arg(short, long, value_enum, default_value_t = PresetArg::Hd720)]
    pub preset: PresetArg,

    /// Scale both dimensions by this factor instead of fitting a preset
    #[arg(long, conflicts_with = "pass_through")]
    pub scale: Option<f32>,

    /// Video bit rate in bits per second
    #[arg(long)]
    pub bit_rate: Option<u32>,

    /// Output frame rate
    #[arg(long)]
    pub frame_rate: Option<u32>,

    /// Re-encode audio at this bit rate (audio is copied otherwise)
    #[arg(long, requires = "audio_channels")]
    pub audio_bitrate: Option<u32>,

    /// Channel count for re-encoded audio
    #[arg(long, requires = "audio_bitrate")]
    pub audio_channels: Option<u32>,

    /// Copy every track without re-encoding
    #[arg(long)]
    pub pass_through: bool,

    /// Maximum jobs running at once
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Args)]
pub struct FixtureArgs {
    /// Where to write the fixture
    pub output: PathBuf,

    /// Length of every track
    #[arg(long, default_value_t = 5000)]
    pub duration_ms: i64,

    #[arg(long, default_value_t = 1920)]
    pub width: u32,

    #[arg(long, default_value_t = 1080)]
    pub height: u32,

    #[arg(long, default_value_t = 30)]
    pub frame_rate: u32,

    #[arg(long, value_enum, default_value_t = VideoCodecArg::Avc)]
    pub video_codec: VideoCodecArg,

    #[arg(long, value_enum, default_value_t = AudioCodecArg::Aac)]
    pub audio_codec: AudioCodecArg,

    #[arg(long, default_value_t = 44100)]
    pub sample_rate: u32,

    #[arg(long, default_value_t = 2)]
    pub channels: u32,

    /// Rotation metadata in degrees
    #[arg(long, default_value_t = 0)]
    pub rotation: u32,

    /// Omit the video track
    #[arg(long, conflicts_with = "no_audio")]
    pub no_video: bool,

    /// Omit the audio track
    #[arg(long)]
    pub no_audio: bool,

    /// Leave the duration out of the container metadata
    #[arg(long)]
    pub unknown_duration: bool,

    /// Seed for the synthesized sample payloads
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PresetArg {
    #[value(name = "1080p")]
    Hd1080,
    #[value(name = "720p")]
    Hd720,
    #[value(name = "480p")]
    Sd480,
    #[value(name = "360p")]
    Sd360,
    #[value(name = "vp8-540p")]
    Vp8Qhd540,
}

impl PresetArg {
    fn preset(self) -> Preset {
        match self {
            PresetArg::Hd1080 => Preset::Hd1080,
            PresetArg::Hd720 => Preset::Hd720,
            PresetArg::Sd480 => Preset::Sd480,
            PresetArg::Sd360 => Preset::Sd360,
            PresetArg::Vp8Qhd540 => Preset::Vp8Qhd540,
        }
    }

    fn video_codec(self) -> VideoCodec {
        match self {
            PresetArg::Vp8Qhd540 => VideoCodec::Vp8,
            _ => VideoCodec::Avc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VideoCodecArg {
    Avc,
    Vp8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AudioCodecArg {
    Aac,
    Vorbis,
}

/// Dispatches a parsed command.
///
/// # Errors
///
/// Returns whatever the command itself returns.
pub async fn handle_command(command: Commands, config: RecastConfig) -> Result<()> {
    match command {
        Commands::Transcode(args) => transcode(args, config).await,
        Commands::GenerateFixture(args) => generate_fixture(args).await,
        Commands::Capture {
            input,
            output,
            at_ms,
        } => capture(input, output, at_ms, config).await,
        Commands::Inspect { output } => inspect(output).await,
    }
}

/// Submits every input to a job pool and waits for all of them.
///
/// Ctrl-C cancels every job still running; their partial outputs are removed.
///
/// # Errors
///
/// - `RecastError::Configuration` - Arguments describe no valid strategy or output path
/// - `RecastError::Pool` - A job failed or could not be queued
pub async fn transcode(args: TranscodeArgs, mut config: RecastConfig) -> Result<()> {
    let strategy = build_strategy(&args)?;
    if let Some(jobs) = args.jobs {
        if jobs == 0 {
            return Err(RecastError::Configuration {
                reason: "--jobs must be at least 1".to_string(),
            });
        }
        config.pool.max_concurrent_jobs = jobs;
    }

    let backend = Arc::new(SimBackend::new(config.simulation.clone()));
    let engine = TranscodeEngine::new(backend, config.pipeline.clone());
    let pool = WorkerPool::new(engine, config.pool.clone());

    let mut handles = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        let output = output_path(input, args.output_dir.as_deref(), strategy.container())?;
        let listener = Arc::new(ConsoleProgress::new(input));
        let job = TranscodeJob::new(input, &output, strategy.clone());
        let handle = pool.submit(job, listener).await?;
        tracing::info!(
            "Queued job {} for {} -> {}",
            handle.id(),
            input.display(),
            output.display()
        );
        handles.push(handle);
    }

    let ids: Vec<_> = handles.iter().map(|handle| handle.id()).collect();
    let waits = futures::future::join_all(handles.into_iter().map(|handle| handle.wait()));
    tokio::pin!(waits);

    let results = tokio::select! {
        results = &mut waits => results,
        _ = tokio::signal::ctrl_c() => {
            println!("Interrupted, cancelling {} jobs", ids.len());
            for id in &ids {
                // Finished jobs are already gone from the pool
                let _ = pool.cancel(*id).await;
            }
            waits.await
        }
    };

    let mut completed = 0usize;
    let mut cancelled = 0usize;
    let mut first_error = None;
    for (input, result) in args.inputs.iter().zip(results) {
        match result {
            Ok(RunOutcome::Completed(report)) => {
                completed += 1;
                print_report(&report);
            }
            Ok(RunOutcome::Cancelled) => cancelled += 1,
            Err(e) => {
                eprintln!("{}: {}", input.display(), e);
                first_error.get_or_insert(e);
            }
        }
    }

    if let Ok(stats) = pool.stats().await
        && let Some(average) = stats.average_processing_time
    {
        tracing::debug!("Average job time {:?}", average);
    }
    pool.shutdown().await;

    println!(
        "{} completed, {} cancelled, {} failed",
        completed,
        cancelled,
        args.inputs.len() - completed - cancelled
    );
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Writes a synthetic source file.
///
/// # Errors
///
/// - `RecastError::Configuration` - Duration is negative or no track was requested
/// - `RecastError::Transcode` - The file cannot be written
pub async fn generate_fixture(args: FixtureArgs) -> Result<()> {
    if args.duration_ms < 0 {
        return Err(RecastError::Configuration {
            reason: "--duration-ms cannot be negative".to_string(),
        });
    }

    let mut fixture = SourceFixture::new(args.duration_ms * 1000).with_seed(args.seed);
    if !args.no_video {
        let video_mime = match args.video_codec {
            VideoCodecArg::Avc => mime::VIDEO_AVC,
            VideoCodecArg::Vp8 => mime::VIDEO_VP8,
        };
        fixture = fixture.with_video(video_mime, args.width, args.height, args.frame_rate);
    }
    if !args.no_audio {
        let audio_mime = match args.audio_codec {
            AudioCodecArg::Aac => mime::AUDIO_AAC,
            AudioCodecArg::Vorbis => mime::AUDIO_VORBIS,
        };
        fixture = fixture.with_audio(audio_mime, args.sample_rate, args.channels);
    }
    if args.rotation != 0 {
        fixture = fixture.with_rotation(args.rotation);
    }
    if args.unknown_duration {
        fixture = fixture.without_declared_duration();
    }

    fixture.save(&args.output).map_err(TranscodeError::from)?;

    println!("Wrote {}", args.output.display());
    for (index, track) in fixture.tracks.iter().enumerate() {
        println!(
            "  track {}: {} ({} samples)",
            index, track.format, track.sample_count
        );
    }
    Ok(())
}

/// Decodes one frame and writes its RGBA bytes.
///
/// # Errors
///
/// - `RecastError::Transcode` - The frame cannot be decoded or drawn
/// - `RecastError::Io` - The output cannot be written
pub async fn capture(
    input: PathBuf,
    output: PathBuf,
    at_ms: i64,
    config: RecastConfig,
) -> Result<()> {
    let backend = SimBackend::new(config.simulation.clone());
    let pipeline = config.pipeline.clone();
    let source = input.clone();
    let frame = tokio::task::spawn_blocking(move || {
        capture_frame(&backend, &pipeline, &source, at_ms * 1000)
    })
    .await
    .map_err(|e| RecastError::Configuration {
        reason: format!("capture task failed: {e}"),
    })??;

    tokio::fs::write(&output, &frame.rgba).await?;
    println!(
        "Captured {}x{} frame at {} ms from {} into {}",
        frame.width,
        frame.height,
        frame.presentation_time_us / 1000,
        input.display(),
        output.display()
    );
    Ok(())
}

/// Prints the summary of a finished output.
///
/// # Errors
///
/// - `RecastError::Transcode` - The file is missing or was never finalized
pub async fn inspect(output: PathBuf) -> Result<()> {
    let summary = OutputSummary::read(&output).map_err(TranscodeError::from)?;

    println!("{} ({:?})", output.display(), summary.container);
    println!("  orientation: {} degrees", summary.orientation_hint);
    for (index, track) in summary.tracks.iter().enumerate() {
        println!("  track {}: {}", index, track.format);
        println!(
            "    {} samples, {} key frames, {} bytes",
            track.samples, track.key_frames, track.bytes
        );
        if let (Some(first), Some(last)) = (
            track.first_presentation_time_us,
            track.last_presentation_time_us,
        ) {
            println!("    {first}us .. {last}us");
        }
        println!(
            "    end of stream: {}, sha1: {}",
            track.end_of_stream, track.payload_digest
        );
    }
    Ok(())
}

fn build_strategy(args: &TranscodeArgs) -> Result<Arc<dyn FormatStrategy>> {
    let codec = args.preset.video_codec();
    if args.pass_through {
        return Ok(Arc::new(PassThroughStrategy::new(codec.container())));
    }

    let audio = match (args.audio_bitrate, args.audio_channels) {
        (Some(bitrate), Some(channels)) => AudioTarget::new(bitrate, channels),
        _ => AudioTarget::pass_through(),
    };

    if let Some(scale) = args.scale {
        let target = VideoTarget {
            codec,
            bit_rate: args.bit_rate.unwrap_or(VIDEO_BITRATE_720P),
            frame_rate: args.frame_rate.unwrap_or(FRAME_RATE_30),
            i_frame_interval: Some(I_FRAME_INTERVAL_HD),
        };
        let strategy = ScaleStrategy::new(scale, target)?.with_audio(audio);
        return Ok(Arc::new(strategy));
    }

    let mut strategy = FitStrategy::preset(args.preset.preset()).with_audio(audio);
    if let Some(bit_rate) = args.bit_rate {
        strategy = strategy.with_bit_rate(bit_rate);
    }
    if let Some(frame_rate) = args.frame_rate {
        strategy = strategy.with_frame_rate(frame_rate);
    }
    Ok(Arc::new(strategy))
}

fn output_path(
    input: &Path,
    output_dir: Option<&Path>,
    container: ContainerFormat,
) -> Result<PathBuf> {
    let stem = input.file_stem().ok_or_else(|| RecastError::Configuration {
        reason: format!("{} has no file name", input.display()),
    })?;
    let dir = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    let output = dir.join(stem).with_extension(container.extension());
    if output == input {
        return Err(RecastError::Configuration {
            reason: format!("output would overwrite {}", input.display()),
        });
    }
    Ok(output)
}

fn print_report(report: &TranscodeReport) {
    println!(
        "{} -> {} in {:.2}s",
        report.input.display(),
        report.output.display(),
        report.elapsed.as_secs_f64()
    );
    for track in &report.tracks {
        println!(
            "  {} track {}: {}, {} samples",
            track.kind, track.track_index, track.coder, track.samples_written
        );
    }
}

/// Prints progress in 10% steps for one job.
struct ConsoleProgress {
    label: String,
    last_step: AtomicI64,
}

impl ConsoleProgress {
    fn new(input: &Path) -> Self {
        Self {
            label: input.display().to_string(),
            last_step: AtomicI64::new(i64::MIN),
        }
    }
}

impl ProgressListener for ConsoleProgress {
    fn on_progress(&self, fraction: f64) {
        let step = if fraction == INDETERMINATE_PROGRESS {
            -1
        } else {
            (fraction * 10.0).floor() as i64
        };
        if self.last_step.swap(step, Ordering::Relaxed) == step {
            return;
        }
        if step < 0 {
            println!("{}: running (duration unknown)", self.label);
        } else {
            println!("{}: {}%", self.label, step * 10);
        }
    }

    fn on_complete(&self, _report: &TranscodeReport) {
        println!("{}: done", self.label);
    }

    fn on_error(&self, error: &TranscodeError) {
        eprintln!("{}: failed: {}", self.label, error);
    }

    fn on_cancelled(&self) {
        println!("{}: cancelled", self.label);
    }
}
