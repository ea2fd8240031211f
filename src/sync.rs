//! Presentation timing
//!
//! The sync controller consumes the video queue and hands each frame to the
//! observer when the playback clock reaches its pts. Late frames are
//! dropped, frames from before the latest seek are discarded, and a wait in
//! progress is abandoned as soon as playback pauses, stops or seeks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::utils::Backoff;

use crate::clock::PlaybackClock;
use crate::config::PlayerConfig;
use crate::decoder::{frame_duration, DEFAULT_FPS};
use crate::error::{Error, Result};
use crate::events::PlayerObserver;
use crate::threading::{join_with_timeout, thread_alive, StampedFrame, VideoPipe};

/// Presentation counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SyncStats {
    /// Frames handed to the observer
    pub frames_displayed: u64,

    /// Frames dropped for being late
    pub frames_dropped: u64,

    /// Pts of the last displayed frame
    pub last_pts: Option<f64>,
}

struct SyncShared {
    pipe: VideoPipe,
    clock: Arc<PlaybackClock>,
    observer: Arc<dyn PlayerObserver>,
    running: AtomicBool,
    frame_duration: AtomicU64,
    displayed: AtomicU64,
    dropped: AtomicU64,
    last_pts: AtomicU64,
    poll_interval: Duration,
    get_timeout: Duration,
    spin_threshold: Duration,
    position_interval: u64,
}

impl SyncShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn frame_duration(&self) -> f64 {
        f64::from_bits(self.frame_duration.load(Ordering::Relaxed))
    }

    /// Whether a frame of `epoch` may still be shown
    fn presentable(&self, epoch: u64) -> bool {
        self.is_running() && self.clock.is_running() && self.pipe.epoch() == epoch
    }
}

/// Consumer of the video queue, paced by the playback clock
pub struct SyncController {
    shared: Arc<SyncShared>,
    handle: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl SyncController {
    pub fn new(
        pipe: VideoPipe,
        clock: Arc<PlaybackClock>,
        observer: Arc<dyn PlayerObserver>,
        config: &PlayerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(SyncShared {
                pipe,
                clock,
                observer,
                running: AtomicBool::new(false),
                frame_duration: AtomicU64::new(frame_duration(DEFAULT_FPS).to_bits()),
                displayed: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                last_pts: AtomicU64::new(f64::NAN.to_bits()),
                poll_interval: config.pause_poll_interval,
                get_timeout: config.queue_get_timeout,
                spin_threshold: config.spin_threshold,
                position_interval: config.position_update_interval.max(1),
            }),
            handle: None,
            join_timeout: config.join_timeout,
        }
    }

    /// Set the frame rate used for late-frame decisions
    pub fn set_fps(&self, fps: f64) {
        self.shared
            .frame_duration
            .store(frame_duration(fps).to_bits(), Ordering::Relaxed);
    }

    /// Start the clock at `pts` and spawn the presentation thread
    pub fn start(&mut self, pts: f64) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.shared.running.store(true, Ordering::Release);
        self.shared.clock.start(pts);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("av-sync".to_string())
            .spawn(move || run(shared))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                Error::Thread(format!("failed to spawn sync controller: {}", e))
            })?;
        self.handle = Some(handle);
        log::debug!("Sync controller started at {:.3}s", pts);
        Ok(())
    }

    pub fn pause(&self) {
        self.shared.clock.pause();
    }

    pub fn resume(&self) {
        self.shared.clock.resume();
    }

    pub fn seek(&self, pts: f64) {
        self.shared.clock.seek(pts);
    }

    /// Stop the presentation thread, waiting up to the join timeout
    pub fn stop(&mut self) -> bool {
        self.shared.running.store(false, Ordering::Release);
        match self.handle.take() {
            Some(handle) => join_with_timeout(handle, self.join_timeout, "av-sync"),
            None => true,
        }
    }

    /// Whether the presentation thread was started and not stopped
    pub fn is_running(&self) -> bool {
        self.shared.is_running() && thread_alive(&self.handle)
    }

    pub fn is_alive(&self) -> bool {
        thread_alive(&self.handle)
    }

    pub fn clock(&self) -> &Arc<PlaybackClock> {
        &self.shared.clock
    }

    pub fn stats(&self) -> SyncStats {
        let last = f64::from_bits(self.shared.last_pts.load(Ordering::Relaxed));
        SyncStats {
            frames_displayed: self.shared.displayed.load(Ordering::Relaxed),
            frames_dropped: self.shared.dropped.load(Ordering::Relaxed),
            last_pts: (!last.is_nan()).then_some(last),
        }
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

fn run(shared: Arc<SyncShared>) {
    log::debug!("Sync loop started");

    let mut epoch = shared.pipe.epoch();
    let mut last_pts = f64::NEG_INFINITY;
    let mut end_reported = false;
    let mut held: Option<StampedFrame> = None;

    'outer: while shared.is_running() {
        if !shared.clock.is_running() {
            thread::sleep(shared.poll_interval);
            continue;
        }

        let current_epoch = shared.pipe.epoch();
        if current_epoch != epoch {
            epoch = current_epoch;
            last_pts = f64::NEG_INFINITY;
            end_reported = false;
        }

        let mut stamped = match held.take() {
            Some(frame) => frame,
            None => match shared.pipe.queue().get(shared.get_timeout) {
                Ok(frame) => frame,
                Err(_) => {
                    if !end_reported && shared.pipe.input_finished() && shared.pipe.queue().is_empty() {
                        end_reported = true;
                        log::info!("Presentation reached end of stream");
                        shared.observer.on_end_of_stream();
                    }
                    continue;
                }
            },
        };

        // Skip stale, late and backwards frames without blocking
        let cutoff = shared.clock.get_time() - shared.frame_duration();
        loop {
            // A seek landed while this frame was fetched
            if stamped.epoch > epoch {
                epoch = stamped.epoch;
                last_pts = f64::NEG_INFINITY;
                end_reported = false;
            }
            let stale = stamped.epoch < epoch;
            let late = stamped.frame.pts < cutoff;
            let backwards = stamped.frame.pts < last_pts;
            if !(stale || late || backwards) {
                break;
            }
            if !stale {
                shared.dropped.fetch_add(1, Ordering::Relaxed);
                log::trace!("Dropping frame at {:.3}s (cutoff {:.3}s)", stamped.frame.pts, cutoff);
            }
            match shared.pipe.queue().get_nowait() {
                Ok(next) => stamped = next,
                Err(_) => continue 'outer,
            }
        }

        if !wait_until(&shared, stamped.frame.pts, epoch) {
            // Interrupted. Keep the frame unless a seek made it stale.
            if shared.pipe.epoch() == epoch {
                held = Some(stamped);
            }
            continue;
        }

        if !shared.presentable(epoch) {
            if shared.pipe.epoch() == epoch {
                held = Some(stamped);
            }
            continue;
        }

        let pts = stamped.frame.pts;
        shared.observer.on_frame_ready(stamped.frame);
        last_pts = pts;
        shared.last_pts.store(pts.to_bits(), Ordering::Relaxed);
        let displayed = shared.displayed.fetch_add(1, Ordering::Relaxed) + 1;
        if displayed % shared.position_interval == 0 {
            shared.observer.on_position_update(pts);
        }
    }

    log::debug!("Sync loop stopped");
}

/// Sleep until the clock reaches `pts`, spinning through the last stretch.
/// Returns false if presentation was interrupted.
fn wait_until(shared: &SyncShared, pts: f64, epoch: u64) -> bool {
    loop {
        if !shared.presentable(epoch) {
            return false;
        }
        let remaining = pts - shared.clock.get_time();
        if remaining <= 0.0 {
            return true;
        }

        let remaining = Duration::from_secs_f64(remaining);
        if remaining > shared.spin_threshold {
            let nap = (remaining - shared.spin_threshold).min(shared.poll_interval);
            thread::sleep(nap);
            continue;
        }

        let backoff = Backoff::new();
        while shared.clock.get_time() < pts {
            if !shared.presentable(epoch) {
                return false;
            }
            if backoff.is_completed() {
                thread::yield_now();
            } else {
                backoff.spin();
            }
        }
        return true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::VideoFrame;
    use crate::events::{ChannelObserver, PlayerEvent};
    use std::time::Instant;

    fn config() -> PlayerConfig {
        PlayerConfig {
            pause_poll_interval: Duration::from_millis(5),
            queue_get_timeout: Duration::from_millis(10),
            position_update_interval: 5,
            ..PlayerConfig::default()
        }
    }

    fn push(pipe: &VideoPipe, epoch: u64, n: u64, fps: f64) {
        let frame = VideoFrame::test_frame(n as f64 / fps, n);
        pipe.queue()
            .put(StampedFrame { epoch, frame }, Duration::from_millis(100))
            .unwrap();
    }

    fn controller(pipe: &VideoPipe) -> (SyncController, crossbeam_channel::Receiver<PlayerEvent>) {
        let (observer, rx) = ChannelObserver::new();
        let sync = SyncController::new(
            pipe.clone(),
            Arc::new(PlaybackClock::new()),
            Arc::new(observer),
            &config(),
        );
        sync.set_fps(30.0);
        (sync, rx)
    }

    fn frames(rx: &crossbeam_channel::Receiver<PlayerEvent>) -> Vec<VideoFrame> {
        rx.try_iter()
            .filter_map(|e| match e {
                PlayerEvent::FrameReady(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_presents_on_time() {
        let pipe = VideoPipe::new(32);
        for n in 0..10 {
            push(&pipe, 0, n, 30.0);
        }
        let (mut sync, rx) = controller(&pipe);

        let start = Instant::now();
        sync.start(0.0).unwrap();
        let mut shown = Vec::new();
        while shown.len() < 10 && start.elapsed() < Duration::from_secs(2) {
            if let Ok(PlayerEvent::FrameReady(f)) = rx.recv_timeout(Duration::from_millis(100)) {
                shown.push((f, start.elapsed().as_secs_f64()));
            }
        }
        sync.stop();

        assert_eq!(shown.len(), 10);
        for (frame, at) in &shown {
            assert!(*at + 0.005 >= frame.pts, "frame {} shown early at {}", frame.pts, at);
            assert!(*at - frame.pts < 0.1, "frame {} shown late at {}", frame.pts, at);
        }
        assert_eq!(sync.stats().frames_displayed, 10);
        assert_eq!(sync.stats().frames_dropped, 0);
    }

    #[test]
    fn test_late_frames_are_dropped() {
        let pipe = VideoPipe::new(64);
        for n in 0..40 {
            push(&pipe, 0, n, 30.0);
        }
        let (mut sync, rx) = controller(&pipe);
        // one second in: frames 0..29 are all late
        sync.start(1.0).unwrap();
        thread::sleep(Duration::from_millis(200));
        sync.stop();

        let shown = frames(&rx);
        assert!(!shown.is_empty());
        assert!(shown.iter().all(|f| f.frame_number >= 29));
        let stats = sync.stats();
        assert!(stats.frames_dropped >= 29);
        // at most one frame was in hand when the loop stopped
        let accounted = stats.frames_dropped + stats.frames_displayed + pipe.queue().len() as u64;
        assert!(accounted == 40 || accounted == 39, "accounted for {}", accounted);
    }

    #[test]
    fn test_stale_epoch_is_discarded() {
        let pipe = VideoPipe::new(32);
        for n in 0..5 {
            push(&pipe, 0, n, 30.0);
        }
        pipe.advance_epoch();
        for n in 0..5 {
            push(&pipe, 1, n + 60, 30.0);
        }
        let (mut sync, rx) = controller(&pipe);
        sync.start(2.0).unwrap();
        thread::sleep(Duration::from_millis(250));
        sync.stop();

        let shown = frames(&rx);
        assert_eq!(shown.len(), 5);
        assert!(shown.iter().all(|f| f.frame_number >= 60));
        assert_eq!(sync.stats().frames_dropped, 0);
    }

    #[test]
    fn test_presentation_is_monotonic() {
        let pipe = VideoPipe::new(32);
        for n in [0, 1, 2, 1, 3, 4] {
            push(&pipe, 0, n, 30.0);
        }
        let (mut sync, rx) = controller(&pipe);
        sync.start(0.0).unwrap();
        thread::sleep(Duration::from_millis(250));
        sync.stop();

        let shown: Vec<u64> = frames(&rx).iter().map(|f| f.frame_number).collect();
        assert_eq!(shown, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_pause_holds_presentation() {
        let pipe = VideoPipe::new(32);
        for n in 0..30 {
            push(&pipe, 0, n, 30.0);
        }
        let (mut sync, rx) = controller(&pipe);
        sync.start(0.0).unwrap();
        thread::sleep(Duration::from_millis(100));
        sync.pause();
        thread::sleep(Duration::from_millis(20));
        let before = frames(&rx).len();
        thread::sleep(Duration::from_millis(150));
        assert!(frames(&rx).is_empty());

        sync.resume();
        thread::sleep(Duration::from_millis(100));
        let after = frames(&rx);
        assert!(!after.is_empty());
        assert!(before > 0);
        // nothing was skipped while paused
        assert_eq!(sync.stats().frames_dropped, 0);
        sync.stop();
    }

    #[test]
    fn test_end_of_stream_reported_once() {
        let pipe = VideoPipe::new(8);
        push(&pipe, 0, 0, 30.0);
        pipe.set_input_finished(true);
        let (mut sync, rx) = controller(&pipe);
        sync.start(0.0).unwrap();
        thread::sleep(Duration::from_millis(150));
        sync.stop();

        let ends = rx
            .try_iter()
            .filter(|e| matches!(e, PlayerEvent::EndOfStream))
            .count();
        assert_eq!(ends, 1);
    }

    #[test]
    fn test_position_updates_every_nth_frame() {
        let pipe = VideoPipe::new(32);
        for n in 0..10 {
            push(&pipe, 0, n, 100.0);
        }
        let (mut sync, rx) = controller(&pipe);
        sync.start(0.0).unwrap();
        thread::sleep(Duration::from_millis(250));
        sync.stop();

        let positions: Vec<f64> = rx
            .try_iter()
            .filter_map(|e| match e {
                PlayerEvent::Position(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(positions.len(), 2);
        assert!((positions[0] - 0.04).abs() < 1e-9);
        assert!((positions[1] - 0.09).abs() < 1e-9);
    }

    #[test]
    fn test_stop_is_prompt() {
        let pipe = VideoPipe::new(4);
        push(&pipe, 0, 300, 30.0);
        let (mut sync, _rx) = controller(&pipe);
        sync.start(0.0).unwrap();
        thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        assert!(sync.stop());
        assert!(start.elapsed() < Duration::from_millis(200));
        assert!(!sync.is_alive());
    }
}
