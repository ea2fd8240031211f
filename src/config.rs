//! Player configuration
//!
//! The core keeps no on-disk state; every tunable lives here and is handed
//! to the components when a file is opened.

use std::time::Duration;

use crate::decoder::DecoderConfig;

/// Player configuration
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Backend decoder settings
    pub decoder: DecoderConfig,

    /// Capacity of the video hand-off queue, in frames
    pub video_queue_capacity: usize,

    /// Capacity of each audio track queue, in chunks
    pub audio_queue_capacity: usize,

    /// Sleep between pause-flag polls
    pub pause_poll_interval: Duration,

    /// Timeout of one queue put attempt before state is re-checked
    pub queue_put_timeout: Duration,

    /// Timeout of one queue get attempt in the sync loop
    pub queue_get_timeout: Duration,

    /// Emit a position update every Nth displayed frame
    pub position_update_interval: u64,

    /// Final part of a presentation wait that is spin-waited
    pub spin_threshold: Duration,

    /// Capacity of the frame-stepping cache
    pub step_cache_capacity: usize,

    /// Cache misses up to this far ahead of the stepping cursor decode
    /// sequentially instead of seeking, in seconds
    pub sequential_decode_window: f64,

    /// Frames requested per audio output callback
    pub output_block_size: u32,

    /// Bounded wait when joining worker threads
    pub join_timeout: Duration,

    /// Consecutive per-frame decode errors after which a stream is treated
    /// as ended
    pub max_consecutive_decode_errors: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig::default(),
            video_queue_capacity: 60,
            audio_queue_capacity: 100,
            pause_poll_interval: Duration::from_millis(50),
            queue_put_timeout: Duration::from_millis(20),
            queue_get_timeout: Duration::from_millis(50),
            position_update_interval: 10,
            spin_threshold: Duration::from_millis(2),
            step_cache_capacity: 120,
            sequential_decode_window: 2.0,
            output_block_size: 1024,
            join_timeout: Duration::from_secs(1),
            max_consecutive_decode_errors: 64,
        }
    }
}

impl PlayerConfig {
    /// Smaller queues and faster polling for interactive use
    pub fn low_latency() -> Self {
        Self {
            video_queue_capacity: 15,
            audio_queue_capacity: 24,
            pause_poll_interval: Duration::from_millis(10),
            queue_put_timeout: Duration::from_millis(10),
            queue_get_timeout: Duration::from_millis(20),
            output_block_size: 512,
            ..Self::default()
        }
    }

    /// Small queues and a small stepping cache
    pub fn low_memory() -> Self {
        Self {
            video_queue_capacity: 12,
            audio_queue_capacity: 32,
            step_cache_capacity: 30,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlayerConfig::default();
        assert_eq!(config.video_queue_capacity, 60);
        assert_eq!(config.step_cache_capacity, 120);
        assert_eq!(config.pause_poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_presets() {
        let low = PlayerConfig::low_latency();
        assert!(low.pause_poll_interval < PlayerConfig::default().pause_poll_interval);

        let small = PlayerConfig::low_memory();
        assert_eq!(small.step_cache_capacity, 30);
    }
}
