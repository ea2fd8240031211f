//! avsync-core - synchronized multi-track media playback core
//!
//! This crate provides the media pipeline behind a player UI:
//! - Per-stream decode workers (one video, one per audio track)
//! - Bounded hand-off queues and a master playback clock
//! - A sync controller presenting frames on time
//! - Frame-accurate stepping backed by a pts-ordered cache
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │           MediaPlayer                │
//! │  (open/play/pause/seek/stop/step)    │
//! └─────────────────────────────────────┘
//!        │              │            │
//!        ▼              ▼            ▼
//! ┌────────────┐ ┌────────────┐ ┌──────────────┐
//! │ Video      │ │ Track      │ │ FrameStepper │
//! │ worker     │ │ manager    │ │ (step cache) │
//! └────────────┘ └────────────┘ └──────────────┘
//!        │              │
//!   video queue    chunk queues
//!        ▼              ▼
//! ┌────────────┐ ┌────────────┐
//! │ Sync       │ │ Output     │
//! │ controller │ │ callbacks  │
//! └────────────┘ └────────────┘
//!        │
//!        ▼
//!  PlayerObserver (frames, positions)
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod output;
pub mod player;
pub mod queue;
pub mod sync;
pub mod threading;

// Re-export main types
pub use cache::{CacheStatistics, FrameStepper, StepCache};
pub use clock::PlaybackClock;
pub use config::PlayerConfig;
pub use decoder::{
    AudioChunk, AudioTrackInfo, DecoderConfig, MediaBackend, PixelFormat, StreamMetadata, VideoFrame,
};
pub use error::{Error, QueueError, Result};
pub use events::{ChannelObserver, NoopObserver, PlayerEvent, PlayerObserver};
pub use output::{AudioOutput, NullOutput};
pub use player::MediaPlayer;
pub use queue::FrameQueue;
pub use sync::{SyncController, SyncStats};
pub use threading::TrackStatus;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library (call once at startup)
pub fn init() {
    // Initialize logging with info level by default if RUST_LOG is not set
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).try_init();

    log::info!("avsync-core {} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_init_twice() {
        init();
        init();
    }
}
