//! Full transcodes through the simulated codecs and GPU
//!
//! Frame and packet counts depend on how far each track got when the first
//! one finished, so these tests check formats, ordering and cleanup rather
//! than exact sample totals.

use std::sync::Arc;

use recast_core::coder::CoderKind;
use recast_core::config::SimulationConfig;
use recast_core::engine::{CancellationFlag, JobEvent, RecordingListener};
use recast_core::media::mime;
use recast_core::strategy::{VideoCodec, VideoTarget};
use recast_core::{
    AudioTarget, ContainerFormat, FitStrategy, MediaKind, Preset, ScaleStrategy, TranscodeJob,
};
use recast_sim::SourceFixture;

use crate::common::{Workspace, engine, hd_source, sim_backend, sim_backend_with, transcode};

#[test]
fn test_hd_source_fits_720p_and_keeps_rotation() {
    let workspace = Workspace::new();
    let input = workspace.write_fixture("portrait.json", &hd_source(1_000_000).with_rotation(90));
    let output = workspace.path("portrait.mp4");
    let backend = sim_backend();

    let (report, summary) = transcode(
        &engine(backend.clone()),
        &input,
        &output,
        Arc::new(FitStrategy::preset(Preset::Hd720)),
    );

    assert_eq!(report.container, ContainerFormat::Mp4);
    assert_eq!(report.rotation_degrees, 90);
    assert_eq!(report.track(MediaKind::Video).unwrap().coder, CoderKind::Video);
    assert_eq!(
        report.track(MediaKind::Audio).unwrap().coder,
        CoderKind::PassThrough
    );

    assert_eq!(summary.container, ContainerFormat::Mp4);
    assert_eq!(summary.orientation_hint, 90);

    let video = summary.track_with_prefix("video/").unwrap();
    assert_eq!(video.format.mime(), Some(mime::VIDEO_AVC));
    assert_eq!(video.format.width, Some(1280));
    assert_eq!(video.format.height, Some(720));
    assert!(video.samples > 0);
    assert!(video.key_frames >= 1);

    let audio = summary.track_with_prefix("audio/").unwrap();
    assert_eq!(audio.format.mime(), Some(mime::AUDIO_AAC));
    assert_eq!(audio.format.sample_rate, Some(44100));
    assert_eq!(audio.format.channel_count, Some(2));
    assert!(audio.samples > 0);

    assert!(backend.draw_count() > 0);
    assert_eq!(backend.live_surfaces(), 0);
}

#[test]
fn test_video_only_source_finishes_on_video_track() {
    let workspace = Workspace::new();
    let fixture = SourceFixture::new(1_000_000)
        .with_video(mime::VIDEO_AVC, 1920, 1080, 30)
        .with_seed(4);
    let input = workspace.write_fixture("silent.json", &fixture);
    let output = workspace.path("silent.mp4");
    let backend = sim_backend();

    let (report, summary) = transcode(
        &engine(backend.clone()),
        &input,
        &output,
        Arc::new(FitStrategy::preset(Preset::Hd720)),
    );

    assert!(report.track(MediaKind::Audio).is_none());
    assert_eq!(report.tracks.len(), 1);
    let video = report.track(MediaKind::Video).unwrap();
    assert_eq!(video.coder, CoderKind::Video);
    assert!(video.finished);
    assert!(video.samples_written > 0);

    assert_eq!(summary.tracks.len(), 1);
    let written = summary.track_with_prefix("video/").unwrap();
    assert_eq!(written.format.width, Some(1280));
    assert_eq!(written.format.height, Some(720));
    assert!(written.end_of_stream);
    assert_eq!(backend.live_surfaces(), 0);
}

#[test]
fn test_vp8_preset_writes_webm_with_vorbis() {
    let workspace = Workspace::new();
    let input = workspace.write_fixture("clip.json", &hd_source(1_000_000));
    let output = workspace.path("clip.webm");

    let strategy =
        FitStrategy::preset(Preset::Vp8Qhd540).with_audio(AudioTarget::new(128_000, 2));
    let (report, summary) = transcode(
        &engine(sim_backend()),
        &input,
        &output,
        Arc::new(strategy),
    );

    assert_eq!(report.container, ContainerFormat::WebM);
    assert_eq!(report.track(MediaKind::Audio).unwrap().coder, CoderKind::Audio);
    assert_eq!(summary.container, ContainerFormat::WebM);

    let video = summary.track_with_prefix("video/").unwrap();
    assert_eq!(video.format.mime(), Some(mime::VIDEO_VP8));
    assert_eq!(video.format.width, Some(960));
    assert_eq!(video.format.height, Some(540));

    let audio = summary.track_with_prefix("audio/").unwrap();
    assert_eq!(audio.format.mime(), Some(mime::AUDIO_VORBIS));
    assert_eq!(audio.format.channel_count, Some(2));
}

#[test]
fn test_mono_audio_is_upmixed_to_stereo() {
    let workspace = Workspace::new();
    let fixture = SourceFixture::new(1_000_000)
        .with_video(mime::VIDEO_AVC, 1280, 720, 30)
        .with_audio(mime::AUDIO_AAC, 44100, 1)
        .with_seed(11);
    let input = workspace.write_fixture("mono.json", &fixture);
    let output = workspace.path("mono.mp4");

    let strategy = FitStrategy::preset(Preset::Sd360).with_audio(AudioTarget::new(96_000, 2));
    let (report, summary) = transcode(
        &engine(sim_backend()),
        &input,
        &output,
        Arc::new(strategy),
    );

    assert_eq!(report.track(MediaKind::Audio).unwrap().coder, CoderKind::Audio);

    let video = summary.track_with_prefix("video/").unwrap();
    assert_eq!(video.format.width, Some(640));
    assert_eq!(video.format.height, Some(360));

    let audio = summary.track_with_prefix("audio/").unwrap();
    assert_eq!(audio.format.mime(), Some(mime::AUDIO_AAC));
    assert_eq!(audio.format.sample_rate, Some(44100));
    assert_eq!(audio.format.channel_count, Some(2));
    assert_eq!(audio.format.bit_rate, Some(96_000));
    // AudioSpecificConfig: AAC LC, 44.1 kHz, two channels
    assert_eq!(audio.format.csd0.as_deref(), Some(&[0x12, 0x10][..]));
}

#[test]
fn test_scale_strategy_halves_the_frame() {
    let workspace = Workspace::new();
    let input = workspace.write_fixture("clip.json", &hd_source(1_000_000));
    let output = workspace.path("half.mp4");

    let target = VideoTarget {
        codec: VideoCodec::Avc,
        bit_rate: 2_000_000,
        frame_rate: 30,
        i_frame_interval: Some(1),
    };
    let strategy = ScaleStrategy::new(0.5, target).unwrap();
    let (_, summary) = transcode(
        &engine(sim_backend()),
        &input,
        &output,
        Arc::new(strategy),
    );

    let video = summary.track_with_prefix("video/").unwrap();
    assert_eq!(video.format.width, Some(960));
    assert_eq!(video.format.height, Some(540));
    assert_eq!(video.format.bit_rate, Some(2_000_000));
}

#[test]
fn test_asynchronous_frame_delivery() {
    let workspace = Workspace::new();
    let input = workspace.write_fixture("clip.json", &hd_source(1_000_000));
    let output = workspace.path("async.mp4");
    let backend = sim_backend_with(SimulationConfig {
        asynchronous_frames: true,
        ..SimulationConfig::deterministic_testing()
    });

    let (report, summary) = transcode(
        &engine(backend.clone()),
        &input,
        &output,
        Arc::new(FitStrategy::preset(Preset::Sd480)),
    );

    assert!(report.track(MediaKind::Video).unwrap().samples_written > 0);
    let video = summary.track_with_prefix("video/").unwrap();
    assert_eq!(video.format.width, Some(720));
    assert_eq!(video.format.height, Some(480));
    assert_eq!(backend.live_surfaces(), 0);
}

#[test]
fn test_progress_ends_at_one_after_completion() {
    let workspace = Workspace::new();
    let input = workspace.write_fixture("clip.json", &hd_source(2_000_000));
    let output = workspace.path("clip.mp4");
    let listener = RecordingListener::new();

    let job = TranscodeJob::new(
        &input,
        &output,
        Arc::new(FitStrategy::preset(Preset::Hd720)),
    );
    let outcome = engine(sim_backend())
        .execute(&job, &listener, &CancellationFlag::new())
        .unwrap();
    assert_eq!(outcome.report().unwrap().duration_us, Some(2_000_000));

    let progress = listener.progress_values();
    assert!(progress.len() >= 2);
    assert!(progress.iter().all(|fraction| (0.0..=1.0).contains(fraction)));
    assert_eq!(progress.last(), Some(&1.0));
    assert_eq!(listener.last_event(), Some(JobEvent::Complete));
}
