//! Frame cache for stepping and scrubbing
//!
//! A bounded, pts-ordered store of decoded frames. Ordering by pts makes
//! "next frame after" and "previous frame before" range lookups; eviction is
//! by insertion age so a long decoded run pushes out what was decoded first.

use std::collections::{BTreeMap, VecDeque};

use crate::decoder::VideoFrame;

mod stepper;

pub use stepper::FrameStepper;

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStatistics {
    /// Entry count
    pub entries: usize,

    /// Capacity
    pub capacity: usize,

    /// Lookups answered from the cache
    pub hit_count: u64,

    /// Lookups that had to decode
    pub miss_count: u64,

    /// Pixel memory held, in bytes
    pub memory_usage_bytes: u64,
}

impl CacheStatistics {
    /// Total accesses
    pub fn total_accesses(&self) -> u64 {
        self.hit_count + self.miss_count
    }

    /// Hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            return 0.0;
        }
        self.hit_count as f64 / total as f64
    }
}

fn to_micros(seconds: f64) -> i64 {
    (seconds * 1_000_000.0).round() as i64
}

/// Bounded frame cache keyed by pts
pub struct StepCache {
    capacity: usize,
    frames: BTreeMap<i64, VideoFrame>,
    order: VecDeque<i64>,
    hits: u64,
    misses: u64,
}

impl StepCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            frames: BTreeMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Insert a frame unless one already sits within `tolerance` seconds of
    /// its pts. Evicts the oldest insertions beyond capacity. Returns whether
    /// the frame was stored.
    pub fn insert(&mut self, frame: VideoFrame, tolerance: f64) -> bool {
        let key = to_micros(frame.pts);
        let tol = to_micros(tolerance).max(0);
        if self.frames.range(key - tol..=key + tol).next().is_some() {
            return false;
        }

        self.frames.insert(key, frame);
        self.order.push_back(key);
        while self.frames.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.frames.remove(&oldest);
                }
                None => break,
            }
        }
        true
    }

    /// Frame closest to `pts`, if one lies within `tolerance` seconds
    pub fn find_near(&self, pts: f64, tolerance: f64) -> Option<&VideoFrame> {
        let key = to_micros(pts);
        let tol = to_micros(tolerance).max(0);
        self.frames
            .range(key - tol..=key + tol)
            .min_by_key(|(k, _)| (**k - key).abs())
            .map(|(_, frame)| frame)
    }

    /// First frame strictly later than `pts + margin`
    pub fn next_after(&self, pts: f64, margin: f64) -> Option<&VideoFrame> {
        let bound = to_micros(pts + margin);
        self.frames
            .range(bound + 1..)
            .next()
            .map(|(_, frame)| frame)
    }

    /// Last frame strictly earlier than `pts - margin`
    pub fn prev_before(&self, pts: f64, margin: f64) -> Option<&VideoFrame> {
        let bound = to_micros(pts - margin);
        self.frames.range(..bound).next_back().map(|(_, frame)| frame)
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop every frame. Statistics are kept.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.order.clear();
    }

    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            entries: self.frames.len(),
            capacity: self.capacity,
            hit_count: self.hits,
            miss_count: self.misses,
            memory_usage_bytes: self.frames.values().map(|f| f.data_size() as u64).sum(),
        }
    }
}
