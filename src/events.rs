//! Outbound notifications to the controller/display layer
//!
//! Callbacks fire on core threads (the video worker for open-time metadata,
//! the sync controller for frames and positions). Getting them onto a UI
//! thread is the receiver's job; [`ChannelObserver`] turns them into
//! [`PlayerEvent`]s on a FIFO channel for exactly that.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::decoder::VideoFrame;

/// Receiver of playback callbacks. Every method defaults to a no-op.
pub trait PlayerObserver: Send + Sync {
    /// Media duration in seconds, reported at open
    fn on_duration(&self, _seconds: f64) {}

    /// Video frame rate, reported at open
    fn on_fps(&self, _fps: f64) {}

    /// A frame became due and should be shown now
    fn on_frame_ready(&self, _frame: VideoFrame) {}

    /// Current presentation position in seconds
    fn on_position_update(&self, _seconds: f64) {}

    /// The video stream ended and every decoded frame has been presented
    fn on_end_of_stream(&self) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PlayerObserver for NoopObserver {}

/// Playback callback as a message
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    Duration(f64),
    Fps(f64),
    FrameReady(VideoFrame),
    Position(f64),
    EndOfStream,
}

/// Observer forwarding every callback over an unbounded channel
pub struct ChannelObserver {
    tx: Sender<PlayerEvent>,
}

impl ChannelObserver {
    /// Create the observer and the receiving end
    pub fn new() -> (Self, Receiver<PlayerEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    fn send(&self, event: PlayerEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

impl PlayerObserver for ChannelObserver {
    fn on_duration(&self, seconds: f64) {
        self.send(PlayerEvent::Duration(seconds));
    }

    fn on_fps(&self, fps: f64) {
        self.send(PlayerEvent::Fps(fps));
    }

    fn on_frame_ready(&self, frame: VideoFrame) {
        self.send(PlayerEvent::FrameReady(frame));
    }

    fn on_position_update(&self, seconds: f64) {
        self.send(PlayerEvent::Position(seconds));
    }

    fn on_end_of_stream(&self) {
        self.send(PlayerEvent::EndOfStream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_preserves_order() {
        let (observer, rx) = ChannelObserver::new();
        observer.on_duration(10.0);
        observer.on_frame_ready(VideoFrame::test_frame(0.5, 15));
        observer.on_position_update(0.5);

        assert!(matches!(rx.try_recv(), Ok(PlayerEvent::Duration(d)) if d == 10.0));
        assert!(matches!(rx.try_recv(), Ok(PlayerEvent::FrameReady(f)) if f.frame_number == 15));
        assert!(matches!(rx.try_recv(), Ok(PlayerEvent::Position(p)) if p == 0.5));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_harmless() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_end_of_stream();
    }
}
