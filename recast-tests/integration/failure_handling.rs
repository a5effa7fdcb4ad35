//! Rejected inputs, negotiation failures, pipeline faults and cancellation
//!
//! Whatever ends a job early, no output file may remain and every surface
//! the job created must have been released.

use std::sync::Arc;

use recast_core::config::SimulationConfig;
use recast_core::engine::{
    CancellationFlag, INDETERMINATE_PROGRESS, JobEvent, ProgressListener, RecordingListener,
};
use recast_core::media::{avc, mime};
use recast_core::{
    ErrorCategory, FitStrategy, PassThroughStrategy, Preset, RunOutcome, TranscodeError,
    TranscodeJob, TranscodeReport,
};
use recast_sim::{SimBackend, SourceFixture};

use crate::common::{Workspace, engine, hd_source, run, sim_backend, sim_backend_with};

#[test]
fn test_zero_duration_never_opens_the_output() {
    let workspace = Workspace::new();
    let input = workspace.write_fixture("empty.json", &hd_source(0));
    let output = workspace.path("empty.mp4");

    let err = run(
        &engine(sim_backend()),
        &input,
        &output,
        Arc::new(FitStrategy::preset(Preset::Hd720)),
    )
    .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(!output.exists());
}

#[test]
fn test_unknown_duration_reports_indeterminate_progress() {
    let workspace = Workspace::new();
    let fixture = hd_source(500_000).without_declared_duration();
    let input = workspace.write_fixture("stream.json", &fixture);
    let output = workspace.path("stream.mp4");
    let listener = RecordingListener::new();

    let job = TranscodeJob::new(
        &input,
        &output,
        Arc::new(FitStrategy::preset(Preset::Sd360)),
    );
    let outcome = engine(sim_backend())
        .execute(&job, &listener, &CancellationFlag::new())
        .unwrap();

    assert_eq!(outcome.report().unwrap().duration_us, None);
    assert_eq!(listener.progress_values(), vec![INDETERMINATE_PROGRESS]);
    assert_eq!(listener.last_event(), Some(JobEvent::Complete));
    assert!(output.exists());
}

#[test]
fn test_missing_fixture_is_a_configuration_error() {
    let workspace = Workspace::new();
    let err = run(
        &engine(sim_backend()),
        &workspace.path("missing.json"),
        &workspace.path("out.mp4"),
        Arc::new(PassThroughStrategy::new(recast_core::ContainerFormat::Mp4)),
    )
    .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(!workspace.path("out.mp4").exists());
}

#[test]
fn test_missing_encoder_is_rejected_before_writing() {
    let workspace = Workspace::new();
    let input = workspace.write_fixture("clip.json", &hd_source(500_000));
    let output = workspace.path("clip.webm");
    let backend = Arc::new(SimBackend::for_testing().without_codec(mime::VIDEO_VP8));

    let err = run(
        &engine(backend),
        &input,
        &output,
        Arc::new(FitStrategy::preset(Preset::Vp8Qhd540)),
    )
    .unwrap_err();

    assert!(matches!(err, TranscodeError::Configuration { .. }));
    assert!(err.to_string().contains("no encoder"));
    assert!(!output.exists());
}

#[test]
fn test_source_without_media_tracks() {
    let workspace = Workspace::new();
    let input = workspace.write_fixture("nothing.json", &SourceFixture::new(1_000_000));
    let output = workspace.path("nothing.mp4");

    let err = run(
        &engine(sim_backend()),
        &input,
        &output,
        Arc::new(FitStrategy::preset(Preset::Hd720)),
    )
    .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(!output.exists());
}

#[test]
fn test_high_profile_encoder_output_is_rejected() {
    let workspace = Workspace::new();
    let input = workspace.write_fixture("clip.json", &hd_source(1_000_000));
    let output = workspace.path("clip.mp4");
    let backend = sim_backend_with(SimulationConfig {
        encoder_profile_idc: avc::PROFILE_IDC_HIGH,
        ..SimulationConfig::deterministic_testing()
    });

    let err = run(
        &engine(backend.clone()),
        &input,
        &output,
        Arc::new(FitStrategy::preset(Preset::Hd720)),
    )
    .unwrap_err();

    assert!(matches!(err, TranscodeError::Negotiation { .. }));
    assert_eq!(err.category(), ErrorCategory::Negotiation);
    assert!(!output.exists());
    assert_eq!(backend.live_surfaces(), 0);
}

#[test]
fn test_gpu_draw_failure_aborts_the_job() {
    let workspace = Workspace::new();
    let input = workspace.write_fixture("clip.json", &hd_source(1_000_000));
    let output = workspace.path("clip.mp4");
    let backend = Arc::new(SimBackend::for_testing().with_draw_failure_after(3));

    let err = run(
        &engine(backend.clone()),
        &input,
        &output,
        Arc::new(FitStrategy::preset(Preset::Hd720)),
    )
    .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Pipeline);
    assert!(!output.exists());
    assert_eq!(backend.live_surfaces(), 0);
}

/// Requests cancellation on the first progress report.
struct CancelOnProgress {
    cancel: CancellationFlag,
    inner: RecordingListener,
}

impl ProgressListener for CancelOnProgress {
    fn on_progress(&self, fraction: f64) {
        self.cancel.cancel();
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

#[test]
fn test_cancellation_mid_run_removes_output() {
    let workspace = Workspace::new();
    let input = workspace.write_fixture("long.json", &hd_source(3_000_000));
    let output = workspace.path("long.mp4");
    let backend = sim_backend();
    let cancel = CancellationFlag::new();
    let listener = CancelOnProgress {
        cancel: cancel.clone(),
        inner: RecordingListener::new(),
    };

    let job = TranscodeJob::new(
        &input,
        &output,
        Arc::new(FitStrategy::preset(Preset::Hd720)),
    );
    let outcome = engine(backend.clone())
        .execute(&job, &listener, &cancel)
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Cancelled));
    assert_eq!(listener.inner.last_event(), Some(JobEvent::Cancelled));
    assert_eq!(listener.inner.progress_values().len(), 1);
    assert!(!output.exists());
    assert_eq!(backend.live_surfaces(), 0);
}
