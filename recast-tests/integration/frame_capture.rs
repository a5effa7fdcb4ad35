//! Single frame capture through the offscreen surface

use recast_core::config::RecastConfig;
use recast_core::engine::capture_frame;
use recast_core::media::mime;
use recast_core::{ErrorCategory, TranscodeError};
use recast_sim::{SimBackend, SourceFixture};

use crate::common::Workspace;

fn small_source() -> SourceFixture {
    SourceFixture::new(1_000_000)
        .with_video(mime::VIDEO_AVC, 320, 240, 30)
        .with_audio(mime::AUDIO_AAC, 44100, 2)
        .with_seed(3)
}

#[test]
fn test_capture_first_frame_after_timestamp() {
    let workspace = Workspace::new();
    let input = workspace.write_fixture("clip.json", &small_source());
    let backend = SimBackend::for_testing();
    let config = RecastConfig::for_testing();

    let frame = capture_frame(&backend, &config.pipeline, &input, 500_000).unwrap();

    assert!(frame.presentation_time_us >= 500_000);
    assert!(frame.presentation_time_us < 500_000 + 33_334);
    assert_eq!((frame.width, frame.height), (320, 240));
    assert_eq!(frame.rgba.len(), 320 * 240 * 4);

    let draws = backend.draw_count();
    assert!(draws >= 1);
    assert!(
        frame
            .rgba
            .chunks_exact(4)
            .all(|pixel| pixel == [draws as u8, 0x80, 0x40, 0xFF])
    );
    assert_eq!(backend.live_surfaces(), 0);
}

#[test]
fn test_capture_at_start() {
    let workspace = Workspace::new();
    let input = workspace.write_fixture("clip.json", &small_source().with_rotation(270));
    let backend = SimBackend::for_testing();

    let frame = capture_frame(
        &backend,
        &RecastConfig::for_testing().pipeline,
        &input,
        0,
    )
    .unwrap();

    assert_eq!(frame.presentation_time_us, 0);
    // Frames are read back unrotated
    assert_eq!((frame.width, frame.height), (320, 240));
}

#[test]
fn test_capture_past_the_end() {
    let workspace = Workspace::new();
    let input = workspace.write_fixture("clip.json", &small_source());
    let backend = SimBackend::for_testing();

    let err = capture_frame(
        &backend,
        &RecastConfig::for_testing().pipeline,
        &input,
        5_000_000,
    )
    .unwrap_err();

    assert!(matches!(err, TranscodeError::Configuration { .. }));
    assert_eq!(backend.live_surfaces(), 0);
}

#[test]
fn test_capture_without_decoder() {
    let workspace = Workspace::new();
    let input = workspace.write_fixture("clip.json", &small_source());
    let backend = SimBackend::for_testing().without_codec(mime::VIDEO_AVC);

    let err = capture_frame(
        &backend,
        &RecastConfig::for_testing().pipeline,
        &input,
        0,
    )
    .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert_eq!(backend.live_surfaces(), 0);
}
