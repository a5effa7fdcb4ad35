//! Tracks copied without decoding

use std::sync::Arc;

use proptest::prelude::*;
use recast_core::coder::CoderKind;
use recast_core::media::mime;
use recast_core::{ContainerFormat, FitStrategy, MediaKind, PassThroughStrategy, Preset};
use recast_sim::SourceFixture;

use crate::common::{Workspace, engine, hd_source, sim_backend, transcode};

#[test]
fn test_pass_through_copies_every_sample() {
    let workspace = Workspace::new();
    let fixture = hd_source(1_000_000).with_rotation(180);
    let input = workspace.write_fixture("clip.json", &fixture);
    let output = workspace.path("copy.mp4");
    let backend = sim_backend();

    let (report, summary) = transcode(
        &engine(backend.clone()),
        &input,
        &output,
        Arc::new(PassThroughStrategy::new(ContainerFormat::Mp4)),
    );

    assert!(
        report
            .tracks
            .iter()
            .all(|track| track.coder == CoderKind::PassThrough && track.finished)
    );
    assert_eq!(summary.orientation_hint, 180);
    assert_eq!(summary.tracks.len(), fixture.tracks.len());

    for (index, source) in fixture.tracks.iter().enumerate() {
        let prefix = if source.kind() == Some(MediaKind::Video) {
            "video/"
        } else {
            "audio/"
        };
        let copied = summary.track_with_prefix(prefix).unwrap();
        assert_eq!(copied.format, source.format);
        assert_eq!(copied.samples, source.sample_count as u64);
        assert_eq!(copied.payload_digest, fixture.track_digest(index));
        assert!(copied.end_of_stream);
    }

    assert_eq!(backend.draw_count(), 0);
    assert_eq!(backend.live_surfaces(), 0);
}

#[test]
fn test_audio_copied_alongside_video_transcode() {
    let workspace = Workspace::new();
    let fixture = hd_source(2_000_000);
    let input = workspace.write_fixture("clip.json", &fixture);
    let output = workspace.path("clip.mp4");

    let (report, summary) = transcode(
        &engine(sim_backend()),
        &input,
        &output,
        Arc::new(FitStrategy::preset(Preset::Hd720)),
    );

    let audio_index = report.track(MediaKind::Audio).unwrap().track_index;
    let audio = summary.track_with_prefix("audio/").unwrap();
    assert_eq!(audio.format, fixture.tracks[audio_index].format);
    assert_eq!(audio.payload_digest, fixture.track_digest(audio_index));
}

#[test]
fn test_audio_only_source() {
    let workspace = Workspace::new();
    let fixture = SourceFixture::new(500_000)
        .with_audio(mime::AUDIO_AAC, 48000, 2)
        .with_seed(5);
    let input = workspace.write_fixture("voice.json", &fixture);
    let output = workspace.path("voice.mp4");

    let (report, summary) = transcode(
        &engine(sim_backend()),
        &input,
        &output,
        Arc::new(FitStrategy::preset(Preset::Hd720)),
    );

    assert!(report.track(MediaKind::Video).is_none());
    assert_eq!(summary.tracks.len(), 1);
    assert_eq!(summary.tracks[0].payload_digest, fixture.track_digest(0));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn test_pass_through_preserves_payloads(
        duration_ms in 50i64..400,
        seed in any::<u64>(),
    ) {
        let workspace = Workspace::new();
        let fixture = hd_source(duration_ms * 1000).with_seed(seed);
        let input = workspace.write_fixture("clip.json", &fixture);
        let output = workspace.path("copy.mp4");

        let (_, summary) = transcode(
            &engine(sim_backend()),
            &input,
            &output,
            Arc::new(PassThroughStrategy::new(ContainerFormat::Mp4)),
        );

        for (index, source) in fixture.tracks.iter().enumerate() {
            let copied = &summary.tracks[index];
            prop_assert_eq!(&copied.format, &source.format);
            prop_assert_eq!(&copied.payload_digest, &fixture.track_digest(index));
        }
    }
}
