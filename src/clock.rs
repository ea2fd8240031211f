//! Master playback clock
//!
//! The single source of "what time is it in the stream". While running,
//! `now = start_pts + (wall_now - start_wall_time)`; while stopped or paused,
//! `now = paused_pts`.

use std::time::Instant;

use parking_lot::Mutex;

struct ClockState {
    running: bool,
    start_wall_time: Instant,
    start_pts: f64,
    paused_pts: f64,
}

impl ClockState {
    fn now(&self) -> f64 {
        if self.running {
            self.start_pts + self.start_wall_time.elapsed().as_secs_f64()
        } else {
            self.paused_pts
        }
    }
}

/// Lock-protected stream clock. Every operation is O(1) and never blocks
/// beyond the internal lock.
pub struct PlaybackClock {
    state: Mutex<ClockState>,
}

impl PlaybackClock {
    /// Create a stopped clock at position 0
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClockState {
                running: false,
                start_wall_time: Instant::now(),
                start_pts: 0.0,
                paused_pts: 0.0,
            }),
        }
    }

    /// Anchor wall-time-now to `pts` and start running
    pub fn start(&self, pts: f64) {
        let mut state = self.state.lock();
        state.start_wall_time = Instant::now();
        state.start_pts = pts;
        state.paused_pts = pts;
        state.running = true;
    }

    /// Freeze the clock at its current time. Pausing a paused clock is a
    /// no-op.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if state.running {
            state.paused_pts = state.now();
            state.running = false;
        }
    }

    /// Re-anchor wall-time-now to the paused position and run again
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if !state.running {
            state.start_wall_time = Instant::now();
            state.start_pts = state.paused_pts;
            state.running = true;
        }
    }

    /// Jump to `pts` immediately, keeping the running state
    pub fn seek(&self, pts: f64) {
        let mut state = self.state.lock();
        state.start_wall_time = Instant::now();
        state.start_pts = pts;
        state.paused_pts = pts;
    }

    /// Current stream time in seconds
    pub fn get_time(&self) -> f64 {
        self.state.lock().now()
    }

    /// Whether the clock is advancing
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Stop and reset to position 0
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.running = false;
        state.start_pts = 0.0;
        state.paused_pts = 0.0;
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}
