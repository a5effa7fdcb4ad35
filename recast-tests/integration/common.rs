//! Shared fixtures and engine setup for integration tests

use std::path::{Path, PathBuf};
use std::sync::Arc;

use recast_core::config::{RecastConfig, SimulationConfig};
use recast_core::engine::{CancellationFlag, NoopListener};
use recast_core::error::Result;
use recast_core::media::mime;
use recast_core::{FormatStrategy, RunOutcome, TranscodeEngine, TranscodeJob, TranscodeReport};
use recast_sim::{OutputSummary, SimBackend, SourceFixture};
use tempfile::TempDir;

/// Temporary directory holding fixtures and outputs of one test.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn write_fixture(&self, name: &str, fixture: &SourceFixture) -> PathBuf {
        let path = self.path(name);
        fixture.save(&path).unwrap();
        path
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// 1080p AVC with 44.1 kHz stereo AAC.
pub fn hd_source(duration_us: i64) -> SourceFixture {
    SourceFixture::new(duration_us)
        .with_video(mime::VIDEO_AVC, 1920, 1080, 30)
        .with_audio(mime::AUDIO_AAC, 44100, 2)
        .with_seed(7)
}

pub fn sim_backend() -> Arc<SimBackend> {
    Arc::new(SimBackend::for_testing())
}

pub fn sim_backend_with(config: SimulationConfig) -> Arc<SimBackend> {
    Arc::new(SimBackend::new(config))
}

pub fn engine(backend: Arc<SimBackend>) -> TranscodeEngine {
    TranscodeEngine::new(backend, RecastConfig::for_testing().pipeline)
}

/// Runs one job to its end without listening or cancelling.
pub fn run(
    engine: &TranscodeEngine,
    input: &Path,
    output: &Path,
    strategy: Arc<dyn FormatStrategy>,
) -> Result<RunOutcome> {
    let job = TranscodeJob::new(input, output, strategy);
    engine.execute(&job, &NoopListener, &CancellationFlag::new())
}

/// Runs a job that must complete and returns its report and output summary.
pub fn transcode(
    engine: &TranscodeEngine,
    input: &Path,
    output: &Path,
    strategy: Arc<dyn FormatStrategy>,
) -> (TranscodeReport, OutputSummary) {
    let outcome = run(engine, input, output, strategy).unwrap();
    let report = outcome.report().cloned().unwrap();
    let summary = OutputSummary::read(output).unwrap();
    (report, summary)
}
