//! Batch of mixed jobs submitted the way the CLI submits them

use std::sync::Arc;

use futures::future::join_all;
use recast_core::config::RecastConfig;
use recast_core::engine::{JobEvent, RecordingListener};
use recast_core::media::mime;
use recast_core::{
    AudioTarget, ContainerFormat, FitStrategy, FormatStrategy, PassThroughStrategy, Preset,
    TranscodeEngine, TranscodeJob, WorkerPool,
};
use recast_sim::{OutputSummary, SimBackend, SourceFixture};
use tempfile::TempDir;

struct Case {
    name: &'static str,
    fixture: SourceFixture,
    strategy: Arc<dyn FormatStrategy>,
}

fn cases() -> Vec<Case> {
    vec![
        Case {
            name: "landscape",
            fixture: SourceFixture::new(1_000_000)
                .with_video(mime::VIDEO_AVC, 1920, 1080, 30)
                .with_audio(mime::AUDIO_AAC, 48000, 2)
                .with_seed(1),
            strategy: Arc::new(FitStrategy::preset(Preset::Hd720)),
        },
        Case {
            name: "portrait",
            fixture: SourceFixture::new(1_000_000)
                .with_video(mime::VIDEO_AVC, 1080, 1920, 30)
                .with_audio(mime::AUDIO_AAC, 44100, 1)
                .with_rotation(90)
                .with_seed(2),
            strategy: Arc::new(
                FitStrategy::preset(Preset::Sd480).with_audio(AudioTarget::new(64_000, 2)),
            ),
        },
        Case {
            name: "web",
            fixture: SourceFixture::new(1_000_000)
                .with_video(mime::VIDEO_AVC, 1280, 720, 25)
                .with_audio(mime::AUDIO_AAC, 44100, 2)
                .with_seed(3),
            strategy: Arc::new(
                FitStrategy::preset(Preset::Vp8Qhd540).with_audio(AudioTarget::new(96_000, 2)),
            ),
        },
        Case {
            name: "archive",
            fixture: SourceFixture::new(1_000_000)
                .with_video(mime::VIDEO_VP8, 640, 360, 30)
                .with_audio(mime::AUDIO_VORBIS, 48000, 2)
                .with_seed(4),
            strategy: Arc::new(PassThroughStrategy::new(ContainerFormat::WebM)),
        },
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mixed_batch_on_the_pool() {
    let dir = TempDir::new().unwrap();
    let config = RecastConfig::for_testing();
    let backend = Arc::new(SimBackend::new(config.simulation.clone()));
    let engine = TranscodeEngine::new(backend.clone(), config.pipeline.clone());
    let pool = WorkerPool::new(engine, config.pool.clone());

    let cases = cases();
    let mut submitted = Vec::new();
    for case in &cases {
        let input = dir.path().join(format!("{}.json", case.name));
        case.fixture.save(&input).unwrap();
        let output = dir
            .path()
            .join(case.name)
            .with_extension(case.strategy.container().extension());

        let listener = RecordingListener::new();
        let job = TranscodeJob::new(&input, &output, case.strategy.clone());
        let handle = pool.submit(job, Arc::new(listener.clone())).await.unwrap();
        submitted.push((handle, listener, output));
    }

    let (handles, rest): (Vec<_>, Vec<_>) = submitted
        .into_iter()
        .map(|(handle, listener, output)| (handle, (listener, output)))
        .unzip();
    let results = join_all(handles.into_iter().map(|handle| handle.wait())).await;

    for ((case, result), (listener, output)) in cases.iter().zip(results).zip(rest) {
        let outcome = result.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(listener.last_event(), Some(JobEvent::Complete), "{}", case.name);
        assert_eq!(report.container, case.strategy.container());

        let json = serde_json::to_value(report).unwrap();
        assert_eq!(
            json["tracks"].as_array().map(Vec::len),
            Some(case.fixture.tracks.len())
        );

        let text = std::fs::read_to_string(&output).unwrap();
        let summary: OutputSummary = serde_json::from_str(&text).unwrap();
        assert_eq!(summary.container, case.strategy.container());
        assert_eq!(summary.orientation_hint, case.fixture.rotation_degrees);
        assert_eq!(summary.tracks.len(), case.fixture.tracks.len());
        for track in &summary.tracks {
            assert!(track.samples > 0, "{}: empty {}", case.name, track.format);
        }
    }

    let portrait = OutputSummary::read(&dir.path().join("portrait.mp4")).unwrap();
    let video = portrait.track_with_prefix("video/").unwrap();
    assert_eq!((video.format.width, video.format.height), (Some(480), Some(720)));
    let audio = portrait.track_with_prefix("audio/").unwrap();
    assert_eq!(audio.format.channel_count, Some(2));

    let stats = pool.stats().await.unwrap();
    assert_eq!(stats.completed_jobs, cases.len() as u64);
    pool.shutdown().await;
    assert_eq!(backend.live_surfaces(), 0);
}
