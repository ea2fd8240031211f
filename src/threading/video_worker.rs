//! Video decode worker
//!
//! Decodes frames ahead of presentation into the video queue. Seeks bump the
//! pipe epoch so the sync controller can tell pre-seek frames still in
//! flight from post-seek ones.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::PlayerConfig;
use crate::decoder::{MediaBackend, VideoFrame, VideoSource, VideoStreamInfo, DEFAULT_FPS};
use crate::error::{Error, Result};
use crate::events::PlayerObserver;
use crate::queue::FrameQueue;

use super::{join_with_timeout, thread_alive, WorkerPhase, WorkerState};

/// A decoded frame tagged with the seek epoch it was decoded in
#[derive(Debug, Clone)]
pub struct StampedFrame {
    pub epoch: u64,
    pub frame: VideoFrame,
}

/// Hand-off between the video worker and the sync controller.
///
/// Outlives individual workers: a replacement worker reuses the pipe of the
/// one it replaces.
#[derive(Clone)]
pub struct VideoPipe {
    queue: FrameQueue<StampedFrame>,
    epoch: Arc<AtomicU64>,
    input_finished: Arc<AtomicBool>,
}

impl VideoPipe {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: FrameQueue::new(capacity),
            epoch: Arc::new(AtomicU64::new(0)),
            input_finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn queue(&self) -> &FrameQueue<StampedFrame> {
        &self.queue
    }

    /// Current seek epoch
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Start a new epoch, invalidating every frame already decoded
    pub(crate) fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Whether the decoder reached end of stream in the current epoch
    pub fn input_finished(&self) -> bool {
        self.input_finished.load(Ordering::Acquire)
    }

    pub(crate) fn set_input_finished(&self, finished: bool) {
        self.input_finished.store(finished, Ordering::Release);
    }
}

/// Everything the decode thread owns
struct DecodeLoop {
    source: Box<dyn VideoSource>,
    state: Arc<WorkerState>,
    pipe: VideoPipe,
    config: PlayerConfig,
    fps: f64,
}

/// Worker producing [`StampedFrame`]s into a [`VideoPipe`]
pub struct VideoDecodeWorker {
    state: Arc<WorkerState>,
    pipe: VideoPipe,
    info: VideoStreamInfo,
    config: PlayerConfig,
    source: Option<Box<dyn VideoSource>>,
    handle: Option<JoinHandle<()>>,
}

impl VideoDecodeWorker {
    /// Open the video stream of `path` and report its duration and frame
    /// rate to `observer`.
    pub fn open(
        backend: &dyn MediaBackend,
        path: &Path,
        pipe: VideoPipe,
        config: &PlayerConfig,
        observer: &dyn PlayerObserver,
    ) -> Result<Self> {
        let source = backend.open_video(path)?;
        let mut info = source.info().clone();
        if !(info.fps.is_finite() && info.fps > 0.0) {
            log::warn!("Video stream reports no usable frame rate, assuming {}", DEFAULT_FPS);
            info.fps = DEFAULT_FPS;
        }

        log::info!(
            "Video stream opened: {}x{} @ {:.3} fps, {:.3}s",
            info.width,
            info.height,
            info.fps,
            info.duration
        );
        observer.on_duration(info.duration);
        observer.on_fps(info.fps);

        Ok(Self {
            state: Arc::new(WorkerState::new()),
            pipe,
            info,
            config: config.clone(),
            source: Some(source),
            handle: None,
        })
    }

    /// Stream information, with the frame rate already defaulted
    pub fn info(&self) -> &VideoStreamInfo {
        &self.info
    }

    /// Spawn the decode thread. A worker runs only once.
    pub fn start(&mut self) -> Result<()> {
        let source = self
            .source
            .take()
            .ok_or_else(|| Error::Thread("video worker already started".to_string()))?;

        self.pipe.set_input_finished(false);
        self.state.mark_running();

        let job = DecodeLoop {
            source,
            state: Arc::clone(&self.state),
            pipe: self.pipe.clone(),
            config: self.config.clone(),
            fps: self.info.fps,
        };

        let handle = thread::Builder::new()
            .name("video-decode".to_string())
            .spawn(move || job.run())
            .map_err(|e| {
                self.state.mark_exited();
                Error::Thread(format!("failed to spawn video worker: {}", e))
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    pub fn pause(&self) {
        self.state.set_paused(true);
    }

    /// Lift a pause. No effect once the thread has exited.
    pub fn resume(&self) {
        if self.state.is_running() {
            self.state.set_paused(false);
        }
    }

    /// Request a seek. The new epoch starts immediately, so frames already
    /// queued are stale from this point on.
    pub fn seek(&self, pts: f64) {
        let mut slot = self.state.seek_slot();
        let epoch = self.pipe.advance_epoch();
        *slot = Some(pts);
        log::debug!("Video seek to {:.3}s requested (epoch {})", pts, epoch);
    }

    /// Stop the thread and wait up to the join timeout. Returns whether the
    /// thread was joined.
    pub fn stop(&mut self) -> bool {
        self.state.request_stop();
        self.source = None;
        match self.handle.take() {
            Some(handle) => join_with_timeout(handle, self.config.join_timeout, "video-decode"),
            None => true,
        }
    }

    pub fn phase(&self) -> WorkerPhase {
        self.state.phase(true, self.handle.is_some() || self.source.is_none())
    }

    /// Whether the thread has ended because input reached end of stream
    pub fn is_finished(&self) -> bool {
        self.state.is_finished() && !self.is_alive()
    }

    /// Whether a thread was started and has since exited
    pub fn has_exited(&self) -> bool {
        self.handle.is_some() && !self.is_alive()
    }

    /// Whether the decode thread is executing
    pub fn is_alive(&self) -> bool {
        thread_alive(&self.handle)
    }
}

impl Drop for VideoDecodeWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

impl DecodeLoop {
    fn run(mut self) {
        log::debug!("Video decode worker started");

        let mut frame_number: u64 = 0;
        let mut epoch = self.pipe.epoch();
        let mut errors: u32 = 0;

        while self.state.is_running() {
            if !self.state.wait_while_paused(self.config.pause_poll_interval) {
                break;
            }

            let pending = {
                let mut slot = self.state.seek_slot();
                slot.take().map(|target| {
                    epoch = self.pipe.epoch();
                    target
                })
            };
            if let Some(target) = pending {
                self.apply_seek(target, &mut frame_number);
                errors = 0;
                continue;
            }

            match self.source.next_frame() {
                Ok(Some(raw)) => {
                    errors = 0;
                    let pts = raw.pts.unwrap_or(frame_number as f64 / self.fps);
                    let frame = VideoFrame::from_raw(raw, pts, frame_number);
                    frame_number += 1;
                    self.push(StampedFrame { epoch, frame });
                }
                Ok(None) => {
                    log::info!("Video decode reached end of stream after frame {}", frame_number);
                    self.finish();
                    if !self.hold_after_end(&mut epoch, &mut frame_number) {
                        break;
                    }
                }
                Err(e) => {
                    errors += 1;
                    log::warn!("Video decode error (skipping frame): {}", e);
                    if errors >= self.config.max_consecutive_decode_errors {
                        log::error!("Giving up on video after {} consecutive errors", errors);
                        self.finish();
                        break;
                    }
                }
            }
        }

        self.state.mark_exited();
        log::debug!("Video decode worker stopped");
    }

    fn apply_seek(&mut self, target: f64, frame_number: &mut u64) {
        match self.source.seek(target) {
            Ok(()) => {
                *frame_number = (target.max(0.0) * self.fps).round() as u64;
            }
            Err(e) => log::warn!("Video seek to {:.3}s failed: {}", target, e),
        }
        let discarded = self.pipe.queue.drain();
        if discarded > 0 {
            log::trace!("Discarded {} queued frames after seek", discarded);
        }
        self.pipe.set_input_finished(false);
        self.state.clear_finished();
        self.state.bump_generation();
    }

    fn finish(&self) {
        self.state.mark_finished();
        self.pipe.set_input_finished(true);
    }

    /// After end of stream the thread stays around only long enough to honour
    /// a seek that races with it; otherwise it exits.
    fn hold_after_end(&mut self, epoch: &mut u64, frame_number: &mut u64) -> bool {
        let pending = {
            let mut slot = self.state.seek_slot();
            slot.take().map(|target| {
                *epoch = self.pipe.epoch();
                target
            })
        };
        match pending {
            Some(target) => {
                self.apply_seek(target, frame_number);
                true
            }
            None => false,
        }
    }

    /// Queue one frame, retrying in short slices. Gives up when the worker
    /// stops or a seek arrives; holds on to the frame while paused.
    fn push(&self, item: StampedFrame) {
        let mut item = item;
        loop {
            if !self.state.is_running() || self.state.seek_pending() {
                return;
            }
            if self.state.is_paused() {
                std::thread::sleep(self.config.pause_poll_interval);
                continue;
            }
            match self.pipe.queue.offer(item, self.config.queue_put_timeout) {
                Ok(()) => return,
                Err(back) => item = back,
            }
        }
    }
}
