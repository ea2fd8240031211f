//! Frame-accurate random access for stepping and scrubbing
//!
//! Serves single frames at arbitrary positions without touching the live
//! decode worker. Misses are decoded on a secondary cursor with its own
//! container handle; every frame it decodes on the way lands in the cache,
//! so stepping through a run costs one decode per frame at most.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{CacheStatistics, StepCache};
use crate::config::PlayerConfig;
use crate::decoder::{frame_duration, MediaBackend, VideoFrame, VideoSource};
use crate::error::Result;

/// Secondary decoder kept open between requests
struct StepCursor {
    source: Box<dyn VideoSource>,
    last_pts: Option<f64>,
    next_frame_number: u64,
}

/// Random-access frame server with a pts-ordered cache
pub struct FrameStepper {
    backend: Arc<dyn MediaBackend>,
    path: PathBuf,
    fps: f64,
    sequential_window: f64,
    cache: StepCache,
    cursor: Option<StepCursor>,
    frames_decoded: u64,
}

impl FrameStepper {
    pub fn new(backend: Arc<dyn MediaBackend>, path: &Path, fps: f64, config: &PlayerConfig) -> Self {
        Self {
            backend,
            path: path.to_path_buf(),
            fps,
            sequential_window: config.sequential_decode_window,
            cache: StepCache::new(config.step_cache_capacity),
            cursor: None,
            frames_decoded: 0,
        }
    }

    /// Frame for position `target`.
    ///
    /// With a `current_pts` and a non-zero `direction`, the cached frame next
    /// to `current_pts` in that direction is served if it lies within one
    /// frame of `target`. Without a direction the cached frame within half a
    /// frame of `target` is served. Anything else decodes from the secondary
    /// cursor. At end of stream the last decoded frame is returned.
    pub fn get_frame_at_position(
        &mut self,
        target: f64,
        current_pts: Option<f64>,
        direction: i32,
    ) -> Result<Option<VideoFrame>> {
        let duration = frame_duration(self.fps);
        let half = duration / 2.0;

        let cached = match current_pts {
            Some(current) if direction > 0 => self.cache.next_after(current, half),
            Some(current) if direction < 0 => self.cache.prev_before(current, half),
            _ => self.cache.find_near(target, half),
        }
        .filter(|frame| (frame.pts - target).abs() <= duration)
        .cloned();

        if let Some(frame) = cached {
            self.cache.record_hit();
            log::trace!("Step cache hit at {:.3}s", frame.pts);
            return Ok(Some(frame));
        }
        self.cache.record_miss();

        match self.decode_to(target, half) {
            Ok(frame) => Ok(frame),
            Err(e) => {
                log::warn!("Frame lookup at {:.3}s failed, resetting cursor: {}", target, e);
                self.cursor = None;
                Err(e)
            }
        }
    }

    fn decode_to(&mut self, target: f64, half: f64) -> Result<Option<VideoFrame>> {
        let window = self.sequential_window;
        let sequential = self.cursor.as_ref().and_then(|c| c.last_pts).map_or(false, |last| {
            target > last && target - last <= window
        });

        if self.cursor.is_none() {
            let source = self.backend.open_video(&self.path)?;
            log::debug!("Opened stepping cursor for {:?}", self.path);
            self.cursor = Some(StepCursor {
                source,
                last_pts: None,
                next_frame_number: 0,
            });
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        if !sequential {
            let seek_to = target.max(0.0);
            cursor.source.seek(seek_to)?;
            cursor.last_pts = None;
            cursor.next_frame_number = (seek_to * self.fps).round() as u64;
            log::trace!("Stepping cursor seeked to {:.3}s", seek_to);
        }

        let threshold = target - half;
        let mut last = None;
        while let Some(raw) = cursor.source.next_frame()? {
            self.frames_decoded += 1;
            let frame_number = match raw.pts {
                Some(pts) => (pts * self.fps).round() as u64,
                None => cursor.next_frame_number,
            };
            let pts = raw.pts.unwrap_or(frame_number as f64 / self.fps);
            cursor.next_frame_number = frame_number + 1;
            cursor.last_pts = Some(pts);

            let frame = VideoFrame::from_raw(raw, pts, frame_number);
            self.cache.insert(frame.clone(), half);
            if pts >= threshold {
                return Ok(Some(frame));
            }
            last = Some(frame);
        }

        log::debug!("Stepping cursor reached end of stream before {:.3}s", target);
        Ok(last)
    }

    /// Drop every cached frame. The cursor stays open.
    pub fn clear_frame_cache(&mut self) {
        self.cache.clear();
    }

    /// Close the cursor and drop the cache
    pub fn close(&mut self) {
        self.cursor = None;
        self.cache.clear();
    }

    /// Frames decoded by the cursor so far
    pub fn decode_count(&self) -> u64 {
        self.frames_decoded
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.cache.statistics()
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::synthetic::{SyntheticBackend, SyntheticMedia};

    const FPS: f64 = 30.0;
    const FD: f64 = 1.0 / FPS;

    fn stepper(duration: f64) -> (FrameStepper, Arc<SyntheticBackend>) {
        stepper_with(SyntheticMedia::new(duration, FPS), PlayerConfig::default())
    }

    fn stepper_with(media: SyntheticMedia, config: PlayerConfig) -> (FrameStepper, Arc<SyntheticBackend>) {
        let backend = Arc::new(SyntheticBackend::new(media));
        let stepper = FrameStepper::new(backend.clone(), Path::new("clip"), FPS, &config);
        (stepper, backend)
    }

    #[test]
    fn test_forward_steps_decode_each_frame_once() {
        let (mut stepper, _) = stepper(4.0);
        let mut current = 0.0;
        for n in 1..=30u64 {
            let frame = stepper
                .get_frame_at_position(current + FD, Some(current), 1)
                .unwrap()
                .unwrap();
            assert_eq!(frame.frame_number, n);
            current = frame.pts;
        }
        // frames 0..=30
        assert_eq!(stepper.decode_count(), 31);

        // stepping back over the run never decodes
        for n in (0..30u64).rev() {
            let frame = stepper
                .get_frame_at_position(current - FD, Some(current), -1)
                .unwrap()
                .unwrap();
            assert_eq!(frame.frame_number, n);
            current = frame.pts;
        }
        assert_eq!(stepper.decode_count(), 31);
        assert_eq!(stepper.statistics().hit_count, 30);
    }

    #[test]
    fn test_cached_positions_are_not_redecoded() {
        let (mut stepper, backend) = stepper(4.0);
        stepper.get_frame_at_position(1.0, None, 0).unwrap();
        let decoded = backend.counters().video_frames();

        for n in 24..=30u64 {
            let t = n as f64 * FD;
            let frame = stepper.get_frame_at_position(t, None, 0).unwrap().unwrap();
            assert_eq!(frame.frame_number, n);
        }
        assert_eq!(backend.counters().video_frames(), decoded);
    }

    #[test]
    fn test_gap_falls_through_to_decode() {
        let (mut stepper, backend) = stepper(10.0);
        stepper.get_frame_at_position(1.0, None, 0).unwrap();
        stepper.get_frame_at_position(5.0, None, 0).unwrap();

        // the cached frame after 1.0s is now far ahead of the target, so the
        // step must decode instead of jumping to it
        let seeks = backend.counters().video_seeks();
        let frame = stepper
            .get_frame_at_position(2.0, Some(1.9), 1)
            .unwrap()
            .unwrap();
        assert!((frame.pts - 2.0).abs() < FD / 2.0);
        assert_eq!(backend.counters().video_seeks(), seeks + 1);
    }

    #[test]
    fn test_short_forward_jump_decodes_sequentially() {
        let (mut stepper, backend) = stepper(10.0);
        stepper.get_frame_at_position(1.0, None, 0).unwrap();
        let seeks = backend.counters().video_seeks();

        let frame = stepper.get_frame_at_position(2.5, None, 0).unwrap().unwrap();
        assert!((frame.pts - 2.5).abs() < FD / 2.0);
        assert_eq!(backend.counters().video_seeks(), seeks);

        stepper.get_frame_at_position(6.0, None, 0).unwrap();
        assert_eq!(backend.counters().video_seeks(), seeks + 1);
    }

    #[test]
    fn test_end_of_stream_returns_last_frame() {
        let (mut stepper, _) = stepper(1.0);
        let frame = stepper.get_frame_at_position(0.999, None, 0).unwrap().unwrap();
        assert_eq!(frame.frame_number, 29);
    }

    #[test]
    fn test_seek_error_resets_cursor() {
        let (mut stepper, backend) = stepper(1.0);
        stepper.get_frame_at_position(0.5, None, 0).unwrap();
        assert_eq!(backend.counters().video_opens(), 1);

        assert!(stepper.get_frame_at_position(5.0, None, 0).is_err());
        stepper.get_frame_at_position(0.2, None, 0).unwrap();
        assert_eq!(backend.counters().video_opens(), 2);
    }

    #[test]
    fn test_clear_frame_cache() {
        let (mut stepper, _) = stepper(2.0);
        stepper.get_frame_at_position(0.5, None, 0).unwrap();
        let decoded = stepper.decode_count();
        stepper.clear_frame_cache();
        assert_eq!(stepper.statistics().entries, 0);

        stepper.get_frame_at_position(0.5, None, 0).unwrap();
        assert!(stepper.decode_count() > decoded);
    }

    #[test]
    fn test_small_cache_stays_bounded() {
        let config = PlayerConfig {
            step_cache_capacity: 8,
            ..PlayerConfig::default()
        };
        let (mut stepper, _) = stepper_with(SyntheticMedia::new(4.0, FPS), config);
        // decodes the whole GOP 84..=95
        stepper.get_frame_at_position(95.0 * FD, None, 0).unwrap();
        assert_eq!(stepper.decode_count(), 12);
        assert_eq!(stepper.statistics().entries, 8);
    }
}
