//! Job pool running simulated transcodes concurrently

use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;

use futures::future::join_all;
use parking_lot::Mutex;
use recast_core::config::PoolConfig;
use recast_core::engine::{JobEvent, NoopListener, RecordingListener};
use recast_core::jobs::JobState;
use recast_core::{
    FitStrategy, PoolError, Preset, ProgressListener, TranscodeError, TranscodeJob,
    TranscodeReport, WorkerPool,
};
use recast_sim::OutputSummary;
use tokio::sync::oneshot;

use crate::common::{Workspace, engine, hd_source, sim_backend};

fn pool_config(max_concurrent_jobs: usize) -> PoolConfig {
    PoolConfig {
        max_concurrent_jobs,
        queue_capacity: 16,
        ..PoolConfig::default()
    }
}

fn hd720_job(input: &Path, output: &Path) -> TranscodeJob {
    TranscodeJob::new(input, output, Arc::new(FitStrategy::preset(Preset::Hd720)))
}

#[tokio::test]
async fn test_concurrent_jobs_share_one_backend() {
    let workspace = Workspace::new();
    let backend = sim_backend();
    let pool = WorkerPool::new(engine(backend.clone()), pool_config(2));

    let mut handles = Vec::new();
    let mut outputs = Vec::new();
    for index in 0..4 {
        let fixture = hd_source(500_000).with_seed(index);
        let input = workspace.write_fixture(&format!("clip{index}.json"), &fixture);
        let output = workspace.path(&format!("clip{index}.mp4"));
        let handle = pool
            .submit(hd720_job(&input, &output), Arc::new(NoopListener))
            .await
            .unwrap();
        handles.push(handle);
        outputs.push(output);
    }

    let ids: Vec<_> = handles.iter().map(|handle| handle.id()).collect();
    let results = join_all(handles.into_iter().map(|handle| handle.wait())).await;
    for result in results {
        assert!(result.unwrap().report().is_some());
    }

    for output in &outputs {
        let summary = OutputSummary::read(output).unwrap();
        assert_eq!(summary.tracks.len(), 2);
    }
    for id in ids {
        let progress = pool.progress(id).await.unwrap().unwrap();
        assert_eq!(progress.state, JobState::Completed);
        assert_eq!(progress.fraction, Some(1.0));
    }

    let stats = pool.stats().await.unwrap();
    assert_eq!(stats.completed_jobs, 4);
    assert_eq!(stats.running_jobs, 0);
    assert_eq!(stats.queued_jobs, 0);
    assert_eq!(backend.live_surfaces(), 0);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_failed_job_does_not_affect_others() {
    let workspace = Workspace::new();
    let pool = WorkerPool::new(engine(sim_backend()), pool_config(2));

    let good = workspace.write_fixture("good.json", &hd_source(500_000));
    let empty = workspace.write_fixture("empty.json", &hd_source(0));
    let good_listener = RecordingListener::new();
    let bad_listener = RecordingListener::new();

    let good_handle = pool
        .submit(
            hd720_job(&good, &workspace.path("good.mp4")),
            Arc::new(good_listener.clone()),
        )
        .await
        .unwrap();
    let bad_handle = pool
        .submit(
            hd720_job(&empty, &workspace.path("empty.mp4")),
            Arc::new(bad_listener.clone()),
        )
        .await
        .unwrap();

    assert!(matches!(
        bad_handle.wait().await,
        Err(PoolError::Transcode(TranscodeError::Configuration { .. }))
    ));
    assert!(good_handle.wait().await.unwrap().report().is_some());
    assert_eq!(good_listener.last_event(), Some(JobEvent::Complete));
    assert!(matches!(bad_listener.last_event(), Some(JobEvent::Error(_))));
    assert!(!workspace.path("empty.mp4").exists());
    assert!(workspace.path("good.mp4").exists());

    let stats = pool.stats().await.unwrap();
    assert_eq!(stats.completed_jobs, 1);
    assert_eq!(stats.failed_jobs, 1);
}

/// Holds the worker inside its first progress callback until released.
struct PausingListener {
    reached: Mutex<Option<oneshot::Sender<()>>>,
    resume: Mutex<std_mpsc::Receiver<()>>,
}

impl ProgressListener for PausingListener {
    fn on_progress(&self, _fraction: f64) {
        let reached = self.reached.lock().take();
        if let Some(reached) = reached {
            let _ = reached.send(());
            let _ = self.resume.lock().recv();
        }
    }

    fn on_complete(&self, _report: &TranscodeReport) {}

    fn on_error(&self, _error: &TranscodeError) {}

    fn on_cancelled(&self) {}
}

#[tokio::test]
async fn test_cancel_running_job_removes_output() {
    let workspace = Workspace::new();
    let backend = sim_backend();
    let pool = WorkerPool::new(engine(backend.clone()), pool_config(1));

    let input = workspace.write_fixture("long.json", &hd_source(3_000_000));
    let output = workspace.path("long.mp4");
    let (reached_tx, reached_rx) = oneshot::channel();
    let (resume_tx, resume_rx) = std_mpsc::channel();
    let listener = PausingListener {
        reached: Mutex::new(Some(reached_tx)),
        resume: Mutex::new(resume_rx),
    };

    let handle = pool
        .submit(hd720_job(&input, &output), Arc::new(listener))
        .await
        .unwrap();
    let job_id = handle.id();

    reached_rx.await.unwrap();
    let running = pool.progress(job_id).await.unwrap().unwrap();
    assert_eq!(running.state, JobState::Running);
    assert!(running.fraction.is_some());

    pool.cancel(job_id).await.unwrap();
    resume_tx.send(()).unwrap();

    assert!(handle.wait().await.unwrap().is_cancelled());
    assert!(!output.exists());
    assert_eq!(
        pool.progress(job_id).await.unwrap().unwrap().state,
        JobState::Cancelled
    );
    assert_eq!(pool.stats().await.unwrap().cancelled_jobs, 1);
    assert_eq!(backend.live_surfaces(), 0);
}

#[tokio::test]
async fn test_shutdown_refuses_new_jobs() {
    let workspace = Workspace::new();
    let pool = WorkerPool::new(engine(sim_backend()), pool_config(1));
    let input = workspace.write_fixture("clip.json", &hd_source(200_000));

    let handle = pool
        .submit(
            hd720_job(&input, &workspace.path("first.mp4")),
            Arc::new(NoopListener),
        )
        .await
        .unwrap();
    pool.shutdown().await;
    assert!(handle.wait().await.is_ok());

    let result = pool
        .submit(
            hd720_job(&input, &workspace.path("second.mp4")),
            Arc::new(NoopListener),
        )
        .await;
    assert!(matches!(result, Err(PoolError::PoolShuttingDown)));
}
