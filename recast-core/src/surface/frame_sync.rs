//! Frame-available handshake between a decode surface producer and the pipeline

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::backend::{GpuError, GpuResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FrameState {
    #[default]
    Empty,
    Available,
    /// Producer signaled twice without a consume in between
    Overrun,
}

#[derive(Debug, Default)]
struct FrameSlot {
    state: Mutex<FrameState>,
    ready: Condvar,
}

/// One-frame handshake shared by the producer callback and the consumer.
///
/// Clones share the same slot. A second notify before the consumer has
/// taken the first frame is recorded and reported to the consumer as an
/// error instead of silently dropping a frame.
#[derive(Debug, Clone, Default)]
pub struct FrameSignal {
    slot: Arc<FrameSlot>,
}

impl FrameSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer side: a new frame was rendered into the stream.
    pub fn notify(&self) {
        let mut state = self.slot.state.lock();
        *state = match *state {
            FrameState::Empty => FrameState::Available,
            FrameState::Available | FrameState::Overrun => {
                tracing::warn!("Frame signaled before the previous frame was consumed");
                FrameState::Overrun
            }
        };
        self.slot.ready.notify_all();
    }

    /// Consumer side: blocks until a frame is available, then consumes it.
    ///
    /// # Errors
    ///
    /// - `GpuError::FrameTimeout` - No frame within `timeout`
    /// - `GpuError::FrameAlreadySet` - Producer signaled more than once since the last consume
    pub fn wait(&self, timeout: Duration) -> GpuResult<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.state.lock();
        loop {
            match *state {
                FrameState::Available => {
                    *state = FrameState::Empty;
                    return Ok(());
                }
                FrameState::Overrun => return Err(GpuError::FrameAlreadySet),
                FrameState::Empty => {
                    let result = self.slot.ready.wait_until(&mut state, deadline);
                    if result.timed_out() && *state == FrameState::Empty {
                        return Err(GpuError::FrameTimeout {
                            waited_ms: timeout.as_millis() as u64,
                        });
                    }
                }
            }
        }
    }

    /// Whether a frame is waiting to be consumed.
    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        *self.slot.state.lock() != FrameState::Empty
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_signal_then_wait() {
        let signal = FrameSignal::new();
        signal.notify();
        assert!(signal.is_pending());

        signal.wait(Duration::from_millis(10)).unwrap();
        assert!(!signal.is_pending());
    }

    #[test]
    fn test_wait_times_out() {
        let signal = FrameSignal::new();
        let error = signal.wait(Duration::from_millis(20)).unwrap_err();
        assert_eq!(error, GpuError::FrameTimeout { waited_ms: 20 });
    }

    #[test]
    fn test_double_signal_is_fatal() {
        let signal = FrameSignal::new();
        signal.notify();
        signal.notify();

        assert_eq!(
            signal.wait(Duration::from_millis(10)),
            Err(GpuError::FrameAlreadySet)
        );
    }

    #[test]
    fn test_cross_thread_delivery() {
        let signal = FrameSignal::new();
        let producer = signal.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.notify();
        });

        signal.wait(Duration::from_secs(2)).unwrap();
        handle.join().unwrap();
    }
}
