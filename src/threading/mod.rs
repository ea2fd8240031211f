//! Worker threads of a playback session
//!
//! One video decode worker and one worker per audio track. Every worker owns
//! its own decoder source (and so its own container handle), runs exactly
//! once and is replaced rather than restarted. Control from the command
//! thread goes through a [`WorkerState`]: atomic flags plus a lock that guards
//! nothing but the pending seek target.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

mod audio_worker;
mod track_manager;
mod video_worker;

pub use audio_worker::{AudioTrackWorker, TrackControls};
pub use track_manager::{TrackManager, TrackStatus};
pub use video_worker::{StampedFrame, VideoDecodeWorker, VideoPipe};

/// Observable lifecycle phase of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Created, source not opened yet
    Idle,
    /// Source opened, thread not started
    Opened,
    /// Thread running and producing
    Running,
    /// Thread alive but holding still
    Paused,
    /// Input reached end of stream
    Finished,
    /// Stopped by request
    Stopped,
}

/// Flags shared between a worker thread and its controller
#[derive(Debug, Default)]
pub struct WorkerState {
    running: AtomicBool,
    paused: AtomicBool,
    finished: AtomicBool,
    stopped: AtomicBool,
    /// Bumped every time the thread applies a seek
    generation: AtomicU64,
    seek: Mutex<Option<f64>>,
}

impl WorkerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the thread as started
    pub(crate) fn mark_running(&self) {
        self.stopped.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);
    }

    /// Ask the thread to exit. Also lifts a pause so a paused thread can
    /// notice.
    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
        self.paused.store(false, Ordering::Release);
    }

    /// End of stream reached, the thread will exit on its own
    pub(crate) fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// The thread is about to return
    pub(crate) fn mark_exited(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    /// Clear the end-of-stream flag after a seek moved the input back
    pub(crate) fn clear_finished(&self) {
        self.finished.store(false, Ordering::Release);
    }

    /// Record a seek target, replacing any target not yet applied
    pub fn request_seek(&self, pts: f64) {
        *self.seek.lock() = Some(pts);
    }

    /// Take the pending seek target, if any
    pub(crate) fn take_seek(&self) -> Option<f64> {
        self.seek.lock().take()
    }

    /// Whether a seek is waiting to be applied
    pub fn seek_pending(&self) -> bool {
        self.seek.lock().is_some()
    }

    /// Direct access to the seek slot, for callers that must update other
    /// state atomically with the request
    pub(crate) fn seek_slot(&self) -> MutexGuard<'_, Option<f64>> {
        self.seek.lock()
    }

    /// Number of seeks applied so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Sleep in `interval` steps while paused. Returns whether the thread
    /// should keep going.
    pub(crate) fn wait_while_paused(&self, interval: Duration) -> bool {
        while self.is_paused() && self.is_running() {
            if self.seek_pending() {
                break;
            }
            thread::sleep(interval);
        }
        self.is_running()
    }

    /// Phase as seen from outside. `started` tells whether a thread was ever
    /// spawned for this state.
    pub fn phase(&self, opened: bool, started: bool) -> WorkerPhase {
        if self.is_stopped() {
            WorkerPhase::Stopped
        } else if self.is_finished() && !self.is_running() {
            WorkerPhase::Finished
        } else if self.is_running() {
            if self.is_paused() {
                WorkerPhase::Paused
            } else {
                WorkerPhase::Running
            }
        } else if started {
            WorkerPhase::Finished
        } else if opened {
            WorkerPhase::Opened
        } else {
            WorkerPhase::Idle
        }
    }
}

/// Join `handle`, giving up after `timeout`. A thread still running at the
/// deadline is detached and a warning logged. Returns whether it was joined.
pub(crate) fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("{} did not stop within {:?}, detaching", name, timeout);
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
    if handle.join().is_err() {
        log::error!("{} panicked", name);
    }
    true
}

/// Whether a spawned thread is still executing
pub(crate) fn thread_alive(handle: &Option<JoinHandle<()>>) -> bool {
    handle.as_ref().map_or(false, |h| !h.is_finished())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        let state = WorkerState::new();
        assert_eq!(state.phase(false, false), WorkerPhase::Idle);
        assert_eq!(state.phase(true, false), WorkerPhase::Opened);

        state.mark_running();
        assert_eq!(state.phase(true, true), WorkerPhase::Running);
        state.set_paused(true);
        assert_eq!(state.phase(true, true), WorkerPhase::Paused);

        state.request_stop();
        assert!(!state.is_paused());
        assert_eq!(state.phase(true, true), WorkerPhase::Stopped);
    }

    #[test]
    fn test_finished_after_exit() {
        let state = WorkerState::new();
        state.mark_running();
        state.mark_finished();
        assert_eq!(state.phase(true, true), WorkerPhase::Running);
        state.mark_exited();
        assert_eq!(state.phase(true, true), WorkerPhase::Finished);
    }

    #[test]
    fn test_latest_seek_wins() {
        let state = WorkerState::new();
        state.request_seek(1.0);
        state.request_seek(4.0);
        assert!(state.seek_pending());
        assert_eq!(state.take_seek(), Some(4.0));
        assert_eq!(state.take_seek(), None);
    }

    #[test]
    fn test_pause_wait_breaks_on_stop() {
        let state = std::sync::Arc::new(WorkerState::new());
        state.mark_running();
        state.set_paused(true);

        let waiter = std::sync::Arc::clone(&state);
        let handle = thread::spawn(move || waiter.wait_while_paused(Duration::from_millis(5)));
        thread::sleep(Duration::from_millis(20));
        state.request_stop();
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn test_join_with_timeout() {
        let quick = thread::spawn(|| {});
        assert!(join_with_timeout(quick, Duration::from_millis(500), "quick"));

        let slow = thread::spawn(|| thread::sleep(Duration::from_millis(300)));
        assert!(!join_with_timeout(slow, Duration::from_millis(20), "slow"));
    }
}
