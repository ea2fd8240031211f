//! Audio track worker
//!
//! Decodes one audio stream into its own queue and owns the output stream
//! that plays it. The output is opened on the worker thread, because device
//! streams are not guaranteed to be movable between threads; the outcome is
//! reported back to `start` so a missing device surfaces as an error there.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};

use crate::config::PlayerConfig;
use crate::decoder::{AudioChunk, AudioFormat, AudioSource, AudioTrackInfo, MediaBackend};
use crate::error::{Error, Result};
use crate::output::{AudioOutput, OutputConfig, TrackRenderer};
use crate::queue::FrameQueue;

use super::{join_with_timeout, thread_alive, WorkerPhase, WorkerState};

/// How long `start` waits for the output device to come up
const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(3);

const UNITY_GAIN: u32 = 1 << 16;

/// Per-track volume and mute, read by the render callback.
///
/// Volume is kept as Q16 fixed point in an atomic so the real-time path never
/// takes a lock. Updates become visible within one callback.
#[derive(Debug)]
pub struct TrackControls {
    volume: AtomicU32,
    muted: AtomicBool,
}

impl TrackControls {
    pub fn new() -> Self {
        Self {
            volume: AtomicU32::new(UNITY_GAIN),
            muted: AtomicBool::new(false),
        }
    }

    /// Set the volume, clamped to [0, 1]
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        let q16 = (volume * UNITY_GAIN as f32).round() as u32;
        self.volume.store(q16, Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        self.volume.load(Ordering::Relaxed) as f32 / UNITY_GAIN as f32
    }

    /// Volume as Q16 gain, `1 << 16` being unity
    pub fn gain_q16(&self) -> u32 {
        self.volume.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
}

impl Default for TrackControls {
    fn default() -> Self {
        Self::new()
    }
}

struct TrackLoop {
    source: Box<dyn AudioSource>,
    state: Arc<WorkerState>,
    queue: FrameQueue<AudioChunk>,
    controls: Arc<TrackControls>,
    position: Arc<AtomicU64>,
    output: Arc<dyn AudioOutput>,
    output_config: OutputConfig,
    config: PlayerConfig,
    startup: Sender<Result<()>>,
}

/// Decoder and player of one audio track
pub struct AudioTrackWorker {
    track_id: usize,
    info: AudioTrackInfo,
    format: AudioFormat,
    state: Arc<WorkerState>,
    queue: FrameQueue<AudioChunk>,
    controls: Arc<TrackControls>,
    position: Arc<AtomicU64>,
    output: Arc<dyn AudioOutput>,
    config: PlayerConfig,
    source: Option<Box<dyn AudioSource>>,
    handle: Option<JoinHandle<()>>,
}

impl AudioTrackWorker {
    /// Open the audio stream described by `info` as track `track_id`
    pub fn open(
        backend: &dyn MediaBackend,
        path: &Path,
        track_id: usize,
        info: &AudioTrackInfo,
        controls: Arc<TrackControls>,
        output: Arc<dyn AudioOutput>,
        config: &PlayerConfig,
    ) -> Result<Self> {
        let format = AudioFormat::for_track(info.sample_rate, info.channels);
        let source = backend.open_audio(path, info.index, format)?;
        let format = source.format();
        log::debug!(
            "Audio track {} ({}) opened: {} Hz, {} ch",
            track_id,
            info.label,
            format.sample_rate,
            format.channels
        );

        Ok(Self {
            track_id,
            info: info.clone(),
            format,
            state: Arc::new(WorkerState::new()),
            queue: FrameQueue::new(config.audio_queue_capacity),
            controls,
            position: Arc::new(AtomicU64::new(0f64.to_bits())),
            output,
            config: config.clone(),
            source: Some(source),
            handle: None,
        })
    }

    pub fn track_id(&self) -> usize {
        self.track_id
    }

    pub fn info(&self) -> &AudioTrackInfo {
        &self.info
    }

    /// Name of this track's output stream
    pub fn label(&self) -> String {
        format!("track-{}", self.track_id)
    }

    pub fn controls(&self) -> &Arc<TrackControls> {
        &self.controls
    }

    pub fn queue(&self) -> &FrameQueue<AudioChunk> {
        &self.queue
    }

    /// Spawn the worker thread and wait until its output stream runs.
    /// Fails with an audio device error if the output cannot be opened.
    pub fn start(&mut self) -> Result<()> {
        let source = self
            .source
            .take()
            .ok_or_else(|| Error::Thread(format!("audio track {} already started", self.track_id)))?;

        let (startup_tx, startup_rx) = bounded(1);
        let job = TrackLoop {
            source,
            state: Arc::clone(&self.state),
            queue: self.queue.clone(),
            controls: Arc::clone(&self.controls),
            position: Arc::clone(&self.position),
            output: Arc::clone(&self.output),
            output_config: OutputConfig {
                label: self.label(),
                sample_rate: self.format.sample_rate,
                channels: self.format.channels,
                block_size: self.config.output_block_size,
            },
            config: self.config.clone(),
            startup: startup_tx,
        };

        self.state.mark_running();
        let handle = thread::Builder::new()
            .name(format!("audio-track-{}", self.track_id))
            .spawn(move || job.run())
            .map_err(|e| {
                self.state.mark_exited();
                Error::Thread(format!("failed to spawn audio worker: {}", e))
            })?;
        self.handle = Some(handle);

        match startup_rx.recv_timeout(DEVICE_OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(Error::AudioDevice(format!(
                    "output for track {} did not start within {:?}",
                    self.track_id, DEVICE_OPEN_TIMEOUT
                )))
            }
        }
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

    pub fn seek(&self, pts: f64) {
        self.state.request_seek(pts);
    }

    /// Stop the thread, waiting up to the join timeout
    pub fn stop(&mut self) -> bool {
        self.state.request_stop();
        self.source = None;
        match self.handle.take() {
            Some(handle) => {
                let name = format!("audio-track-{}", self.track_id);
                join_with_timeout(handle, self.config.join_timeout, &name)
            }
            None => true,
        }
    }

    /// Presentation time of the last sample handed to the device
    pub fn current_pts(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Relaxed))
    }

    pub fn phase(&self) -> WorkerPhase {
        self.state.phase(true, self.handle.is_some() || self.source.is_none())
    }

    /// Whether the thread was started and has since exited
    pub fn has_exited(&self) -> bool {
        self.handle.is_some() && !self.is_alive()
    }

    /// Whether the source was handed to a thread already
    pub fn is_started(&self) -> bool {
        self.source.is_none()
    }

    pub fn is_alive(&self) -> bool {
        thread_alive(&self.handle)
    }
}

impl Drop for AudioTrackWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

impl TrackLoop {
    fn run(mut self) {
        let label = self.output_config.label.clone();
        let mut renderer = TrackRenderer::new(
            self.queue.clone(),
            Arc::clone(&self.controls),
            Arc::clone(&self.state),
            Arc::clone(&self.position),
        );

        let opened = self
            .output
            .open(&self.output_config, Box::new(move |buf: &mut [f32]| renderer.render(buf)))
            .and_then(|mut stream| stream.start().map(|()| stream));
        let mut stream = match opened {
            Ok(stream) => {
                let _ = self.startup.send(Ok(()));
                stream
            }
            Err(e) => {
                log::warn!("Audio output for {} unavailable: {}", label, e);
                let _ = self.startup.send(Err(e));
                self.state.mark_exited();
                return;
            }
        };
        log::debug!("Audio worker {} started", label);

        let mut errors: u32 = 0;
        while self.state.is_running() {
            if !self.state.wait_while_paused(self.config.pause_poll_interval) {
                break;
            }

            if let Some(target) = self.state.take_seek() {
                self.apply_seek(target);
                errors = 0;
                continue;
            }

            match self.source.next_chunk() {
                Ok(Some(chunk)) => {
                    errors = 0;
                    self.push(chunk);
                }
                Ok(None) => {
                    log::debug!("Audio {} reached end of stream", label);
                    self.state.mark_finished();
                    if !self.play_out() {
                        break;
                    }
                }
                Err(e) => {
                    errors += 1;
                    log::warn!("Audio decode error on {} (skipping): {}", label, e);
                    if errors >= self.config.max_consecutive_decode_errors {
                        log::error!("Giving up on {} after {} consecutive errors", label, errors);
                        self.state.mark_finished();
                        break;
                    }
                }
            }
        }

        if let Err(e) = stream.stop() {
            log::warn!("Failed to stop audio output {}: {}", label, e);
        }
        drop(stream);
        self.state.mark_exited();
        log::debug!("Audio worker {} stopped", label);
    }

    fn apply_seek(&mut self, target: f64) {
        if let Err(e) = self.source.seek(target) {
            log::warn!("Audio seek to {:.3}s failed: {}", target, e);
        }
        self.queue.drain();
        self.position.store(target.to_bits(), Ordering::Relaxed);
        self.state.clear_finished();
        self.state.bump_generation();
    }

    /// Keep the output alive until queued audio has been heard. Returns true
    /// if a seek arrived and decoding should go on.
    fn play_out(&self) -> bool {
        while self.state.is_running() && !self.queue.is_empty() {
            if self.state.seek_pending() {
                return true;
            }
            thread::sleep(self.config.pause_poll_interval);
        }
        self.state.is_running() && self.state.seek_pending()
    }

    fn push(&self, chunk: AudioChunk) {
        let mut chunk = chunk;
        loop {
            if !self.state.is_running() || self.state.seek_pending() {
                return;
            }
            if self.state.is_paused() {
                thread::sleep(self.config.pause_poll_interval);
                continue;
            }
            match self.queue.offer(chunk, self.config.queue_put_timeout) {
                Ok(()) => return,
                Err(back) => chunk = back,
            }
        }
    }
}
