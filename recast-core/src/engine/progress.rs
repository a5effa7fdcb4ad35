//! Progress reporting for a running job

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::TranscodeReport;
use crate::error::TranscodeError;

/// Progress value reported when the input duration is unknown.
pub const INDETERMINATE_PROGRESS: f64 = -1.0;

/// Receives job lifecycle callbacks. Called from the worker thread.
pub trait ProgressListener: Send + Sync {
    /// `fraction` is in `0.0..=1.0`, or [`INDETERMINATE_PROGRESS`].
    fn on_progress(&self, fraction: f64);

    fn on_complete(&self, report: &TranscodeReport);

    fn on_error(&self, error: &TranscodeError);

    fn on_cancelled(&self);
}

/// Listener that ignores every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl ProgressListener for NoopListener {
    fn on_progress(&self, _fraction: f64) {}

    fn on_complete(&self, _report: &TranscodeReport) {}

    fn on_error(&self, _error: &TranscodeError) {}

    fn on_cancelled(&self) {}
}

/// Terminal state recorded by [`RecordingListener`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress(f64),
    Complete,
    Error(String),
    Cancelled,
}

/// Listener that keeps every callback in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<JobEvent>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().clone()
    }

    /// Progress values in the order reported.
    pub fn progress_values(&self) -> Vec<f64> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                JobEvent::Progress(value) => Some(*value),
                _ => None,
            })
            .collect()
    }

    pub fn last_event(&self) -> Option<JobEvent> {
        self.events.lock().last().cloned()
    }
}

impl ProgressListener for RecordingListener {
    fn on_progress(&self, fraction: f64) {
        self.events.lock().push(JobEvent::Progress(fraction));
    }

    fn on_complete(&self, _report: &TranscodeReport) {
        self.events.lock().push(JobEvent::Complete);
    }

    fn on_error(&self, error: &TranscodeError) {
        self.events.lock().push(JobEvent::Error(error.to_string()));
    }

    fn on_cancelled(&self) {
        self.events.lock().push(JobEvent::Cancelled);
    }
}

/// Cooperative cancellation request shared with the worker.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Position of one track for progress estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPosition {
    pub presentation_time_us: i64,
    pub finished: bool,
}

/// Average completion over `tracks`, each capped at 1.0 and 1.0 once finished.
pub fn overall_progress(tracks: &[TrackPosition], duration_us: i64) -> f64 {
    if tracks.is_empty() || duration_us <= 0 {
        return INDETERMINATE_PROGRESS;
    }

    let total: f64 = tracks
        .iter()
        .map(|track| {
            if track.finished {
                1.0
            } else {
                (track.presentation_time_us as f64 / duration_us as f64).clamp(0.0, 1.0)
            }
        })
        .sum();
    total / tracks.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(presentation_time_us: i64, finished: bool) -> TrackPosition {
        TrackPosition {
            presentation_time_us,
            finished,
        }
    }

    #[test]
    fn test_progress_averages_tracks() {
        let progress = overall_progress(&[at(2_500_000, false), at(7_500_000, false)], 10_000_000);
        assert!((progress - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_progress_caps_and_finishes() {
        let progress = overall_progress(&[at(12_000_000, false), at(0, true)], 10_000_000);
        assert_eq!(progress, 1.0);

        let progress = overall_progress(&[at(5_000_000, false)], 10_000_000);
        assert_eq!(progress, 0.5);
    }

    #[test]
    fn test_progress_unknown_duration() {
        assert_eq!(
            overall_progress(&[at(1, false)], 0),
            INDETERMINATE_PROGRESS
        );
        assert_eq!(overall_progress(&[], 1_000), INDETERMINATE_PROGRESS);
    }

    #[test]
    fn test_cancellation_flag_shared_between_clones() {
        let flag = CancellationFlag::new();
        let worker_side = flag.clone();
        assert!(!worker_side.is_cancelled());

        flag.cancel();
        assert!(worker_side.is_cancelled());
    }

    #[test]
    fn test_recording_listener_keeps_order() {
        let listener = RecordingListener::new();
        listener.on_progress(0.25);
        listener.on_progress(1.0);
        listener.on_cancelled();

        assert_eq!(listener.progress_values(), vec![0.25, 1.0]);
        assert_eq!(listener.last_event(), Some(JobEvent::Cancelled));
    }
}
