//! Player facade
//!
//! [`MediaPlayer`] is the inbound command surface: it owns one playback
//! session at a time (video worker, audio tracks, clock, sync controller and
//! frame stepper) and fans commands out to them in a fixed order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::{CacheStatistics, FrameStepper};
use crate::clock::PlaybackClock;
use crate::config::PlayerConfig;
use crate::decoder::{frame_duration, MediaBackend, StreamMetadata, VideoFrame};
use crate::error::{Error, Result};
use crate::events::{NoopObserver, PlayerObserver};
use crate::output::AudioOutput;
use crate::sync::{SyncController, SyncStats};
use crate::threading::{TrackManager, TrackStatus, VideoDecodeWorker, VideoPipe};

/// Everything belonging to one opened file
struct Session {
    path: PathBuf,
    metadata: StreamMetadata,
    clock: Arc<PlaybackClock>,
    pipe: VideoPipe,
    video: VideoDecodeWorker,
    sync: SyncController,
    tracks: TrackManager,
    stepper: FrameStepper,
    started: bool,
    playing: bool,
    /// Workers must be re-seeked to the clock before playback continues
    needs_resync: bool,
    /// Pts of the frame on screen while paused, if known
    current_pts: Option<f64>,
    /// Displayed-frame count at the last seek
    displayed_at_seek: u64,
}

/// Playback core for one media file at a time
pub struct MediaPlayer {
    backend: Arc<dyn MediaBackend>,
    output: Arc<dyn AudioOutput>,
    observer: Arc<dyn PlayerObserver>,
    config: PlayerConfig,
    session: Option<Session>,
}

impl MediaPlayer {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        output: Arc<dyn AudioOutput>,
        observer: Arc<dyn PlayerObserver>,
        config: PlayerConfig,
    ) -> Self {
        Self {
            backend,
            output,
            observer,
            config,
            session: None,
        }
    }

    /// Player on the FFmpeg backend and the default sound device
    #[cfg(all(feature = "ffmpeg", feature = "cpal-output"))]
    pub fn with_defaults(observer: Arc<dyn PlayerObserver>) -> Self {
        let config = PlayerConfig::default();
        Self::new(
            Arc::new(crate::decoder::FfmpegBackend::new(config.decoder.clone())),
            Arc::new(crate::output::CpalOutput::new()),
            observer,
            config,
        )
    }

    /// Open `path`, replacing any current session. Playback starts paused at
    /// position 0. Audio tracks that cannot be opened are left out.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<StreamMetadata> {
        let path = path.as_ref();
        if self.session.is_some() {
            self.stop();
        }
        log::info!("Opening {:?}", path);

        let pipe = VideoPipe::new(self.config.video_queue_capacity);
        let video = VideoDecodeWorker::open(
            self.backend.as_ref(),
            path,
            pipe.clone(),
            &self.config,
            self.observer.as_ref(),
        )?;
        let info = video.info().clone();

        let mut tracks = TrackManager::new(
            Arc::clone(&self.backend),
            path,
            Arc::clone(&self.output),
            &self.config,
        );
        let audio_tracks = match tracks.discover_tracks() {
            Ok(found) => found.to_vec(),
            Err(e) => {
                log::warn!("Audio discovery failed, playing without audio: {}", e);
                Vec::new()
            }
        };
        tracks.initialize_all_tracks();

        let metadata = StreamMetadata {
            duration: info.duration,
            fps: info.fps,
            width: info.width,
            height: info.height,
            audio_tracks,
        };

        let clock = Arc::new(PlaybackClock::new());
        let sync = SyncController::new(
            pipe.clone(),
            Arc::clone(&clock),
            Arc::clone(&self.observer),
            &self.config,
        );
        sync.set_fps(metadata.fps);
        let stepper = FrameStepper::new(Arc::clone(&self.backend), path, metadata.fps, &self.config);

        log::info!(
            "Opened {:?}: {:.3}s, {}x{} @ {:.3} fps, {} audio track(s)",
            path,
            metadata.duration,
            metadata.width,
            metadata.height,
            metadata.fps,
            metadata.audio_tracks.len()
        );

        self.session = Some(Session {
            path: path.to_path_buf(),
            metadata: metadata.clone(),
            clock,
            pipe,
            video,
            sync,
            tracks,
            stepper,
            started: false,
            playing: false,
            needs_resync: false,
            current_pts: Some(0.0),
            displayed_at_seek: 0,
        });
        Ok(metadata)
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or(Error::NotOpen)
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(Error::NotOpen)
    }

    /// Start or resume playback from the current position
    pub fn play(&mut self) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let config = self.config.clone();
        let session = self.session_mut()?;
        if session.playing {
            return Ok(());
        }

        let position = session.clock.get_time();
        if session.needs_resync {
            log::debug!("Re-anchoring workers at {:.3}s", position);
            session.sync.seek(position);
            session.video.seek(position);
            session.tracks.seek_all(position);
            session.needs_resync = false;
        }

        if !session.started {
            session.video.start()?;
            session.tracks.start_all();
            session.sync.start(position)?;
            session.started = true;
        } else {
            session.replace_video_if_exited(backend.as_ref(), &config, position, false)?;
            session.video.resume();
            session.tracks.resume_all(position);
            session.sync.resume();
        }

        session.playing = true;
        session.current_pts = None;
        log::info!("Playing from {:.3}s", position);
        Ok(())
    }

    /// Pause playback. The clock is frozen before the workers so presentation
    /// stops consuming first.
    pub fn pause(&mut self) -> Result<()> {
        let session = self.session_mut()?;
        session.sync.pause();
        session.video.pause();
        session.tracks.pause_all();

        if session.playing {
            let stats = session.sync.stats();
            if stats.frames_displayed > session.displayed_at_seek {
                session.current_pts = stats.last_pts;
            }
        }
        session.playing = false;
        log::info!("Paused at {:.3}s", session.clock.get_time());
        Ok(())
    }

    /// Seek to `position` seconds, clamped to the media duration
    pub fn seek(&mut self, position: f64) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let config = self.config.clone();
        let session = self.session_mut()?;

        let position = clamp_position(position, session.metadata.duration);
        log::info!("Seeking to {:.3}s", position);

        // Hold the clock at the target while workers re-anchor, so frames
        // decoded meanwhile are not judged against the old position.
        let paused = !session.playing;
        session.sync.pause();
        session.sync.seek(position);
        let replaced = session.replace_video_if_exited(backend.as_ref(), &config, position, paused);
        if let Ok(false) = replaced {
            session.video.seek(position);
        }
        session.tracks.seek_all(position);
        session.stepper.clear_frame_cache();
        if !paused {
            session.sync.resume();
        }

        session.needs_resync = false;
        session.current_pts = Some(position);
        session.displayed_at_seek = session.sync.stats().frames_displayed;
        replaced.map(|_| ())
    }

    /// Stop every thread and discard the session. A new `open` is required
    /// afterwards.
    pub fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        log::info!("Stopping playback of {:?}", session.path);

        let mut joined = session.sync.stop();
        joined &= session.video.stop();
        joined &= session.tracks.stop_all();
        session.pipe.queue().drain();
        session.stepper.close();
        session.clock.stop();

        if !joined {
            log::warn!("Some worker threads did not stop in time and were detached");
        }
    }

    /// Show the frame one step forward (`direction > 0`) or back
    /// (`direction < 0`) from the frame on screen. Pauses playback first.
    pub fn step_frame(&mut self, direction: i32) -> Result<Option<VideoFrame>> {
        if self.session()?.playing {
            self.pause()?;
        }
        let observer = Arc::clone(&self.observer);
        let session = self.session_mut()?;

        let step = frame_duration(session.metadata.fps);
        let current = session
            .current_pts
            .unwrap_or_else(|| session.clock.get_time());
        let target = clamp_position(
            current + direction.signum() as f64 * step,
            session.metadata.duration,
        );

        let frame = session
            .stepper
            .get_frame_at_position(target, Some(current), direction.signum())?;
        if let Some(frame) = &frame {
            log::debug!("Stepped to frame {} at {:.3}s", frame.frame_number, frame.pts);
            session.clock.seek(frame.pts);
            session.current_pts = Some(frame.pts);
            session.needs_resync = true;
            observer.on_frame_ready(frame.clone());
            observer.on_position_update(frame.pts);
        }
        Ok(frame)
    }

    /// Frame at `position` for previews, without moving playback
    pub fn frame_at(&mut self, position: f64) -> Result<Option<VideoFrame>> {
        let session = self.session_mut()?;
        let position = clamp_position(position, session.metadata.duration);
        session.stepper.get_frame_at_position(position, None, 0)
    }

    pub fn set_track_volume(&mut self, track_id: usize, volume: f32) -> Result<()> {
        self.session()?.tracks.set_track_volume(track_id, volume)
    }

    pub fn set_track_muted(&mut self, track_id: usize, muted: bool) -> Result<()> {
        self.session()?.tracks.set_track_muted(track_id, muted)
    }

    /// Current playback position in seconds, 0 without a session
    pub fn position(&self) -> f64 {
        self.session.as_ref().map_or(0.0, |s| s.clock.get_time())
    }

    pub fn is_playing(&self) -> bool {
        self.session.as_ref().map_or(false, |s| s.playing)
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn metadata(&self) -> Option<&StreamMetadata> {
        self.session.as_ref().map(|s| &s.metadata)
    }

    pub fn tracks(&self) -> Vec<TrackStatus> {
        self.session.as_ref().map_or_else(Vec::new, |s| s.tracks.tracks())
    }

    /// Last rendered pts of an audio track
    pub fn track_position(&self, track_id: usize) -> Result<Option<f64>> {
        self.session()?.tracks.track_position(track_id)
    }

    /// Audio position minus clock position, for monitoring
    pub fn audio_drift(&self, track_id: usize) -> Result<Option<f64>> {
        let session = self.session()?;
        let clock = session.clock.get_time();
        Ok(session.tracks.track_position(track_id)?.map(|pts| pts - clock))
    }

    pub fn stats(&self) -> SyncStats {
        self.session
            .as_ref()
            .map_or_else(SyncStats::default, |s| s.sync.stats())
    }

    pub fn cache_statistics(&self) -> Option<CacheStatistics> {
        self.session.as_ref().map(|s| s.stepper.statistics())
    }

    /// Number of core threads still executing
    pub fn live_threads(&self) -> usize {
        self.session.as_ref().map_or(0, |s| {
            usize::from(s.sync.is_alive()) + usize::from(s.video.is_alive()) + s.tracks.live_threads()
        })
    }
}

impl Drop for MediaPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Map a requested position into the media. NaN goes to 0; the upper bound
/// applies only when the duration is known.
fn clamp_position(position: f64, duration: f64) -> f64 {
    if position.is_nan() {
        0.0
    } else if duration > 0.0 {
        position.clamp(0.0, duration)
    } else {
        position.max(0.0)
    }
}

impl Session {
    /// Swap an exited video worker for a fresh one seeked to `position`.
    /// Returns whether a replacement happened.
    fn replace_video_if_exited(
        &mut self,
        backend: &dyn MediaBackend,
        config: &PlayerConfig,
        position: f64,
        paused: bool,
    ) -> Result<bool> {
        if !self.video.has_exited() {
            return Ok(false);
        }
        log::debug!("Replacing finished video worker at {:.3}s", position);

        let mut worker =
            VideoDecodeWorker::open(backend, &self.path, self.pipe.clone(), config, &NoopObserver)?;
        worker.seek(position);
        if paused {
            worker.pause();
        }
        if self.started {
            worker.start()?;
        }
        let mut old = std::mem::replace(&mut self.video, worker);
        old.stop();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::synthetic::{SyntheticBackend, SyntheticMedia, SyntheticTrack};
    use crate::events::{ChannelObserver, PlayerEvent};
    use crate::output::NullOutput;
    use std::thread;
    use std::time::Duration;

    fn config() -> PlayerConfig {
        PlayerConfig {
            pause_poll_interval: Duration::from_millis(5),
            queue_get_timeout: Duration::from_millis(10),
            queue_put_timeout: Duration::from_millis(5),
            ..PlayerConfig::default()
        }
    }

    fn player(media: SyntheticMedia) -> (MediaPlayer, crossbeam_channel::Receiver<PlayerEvent>) {
        let (observer, rx) = ChannelObserver::new();
        let player = MediaPlayer::new(
            Arc::new(SyntheticBackend::new(media)),
            Arc::new(NullOutput::new()),
            Arc::new(observer),
            config(),
        );
        (player, rx)
    }

    #[test]
    fn test_commands_need_session() {
        let (mut player, _) = player(SyntheticMedia::new(1.0, 30.0));
        assert!(matches!(player.play(), Err(Error::NotOpen)));
        assert!(matches!(player.seek(1.0), Err(Error::NotOpen)));
        assert!(matches!(player.set_track_volume(0, 1.0), Err(Error::NotOpen)));
        assert_eq!(player.position(), 0.0);
        player.stop();
    }

    #[test]
    fn test_open_reports_metadata() {
        let media = SyntheticMedia::new(3.0, 24.0).with_track(SyntheticTrack::tone(440.0));
        let (mut player, rx) = player(media);
        let meta = player.open("clip.mkv").unwrap();

        assert_eq!(meta.duration, 3.0);
        assert_eq!(meta.fps, 24.0);
        assert_eq!(meta.audio_tracks.len(), 1);
        assert!(!player.is_playing());
        assert_eq!(player.position(), 0.0);

        let events: Vec<_> = rx.try_iter().collect();
        assert!(matches!(events[0], PlayerEvent::Duration(d) if d == 3.0));
        assert!(matches!(events[1], PlayerEvent::Fps(f) if f == 24.0));
    }

    #[test]
    fn test_open_without_video_is_an_open_error() {
        let mut media = SyntheticMedia::new(1.0, 30.0);
        media.has_video = false;
        let (mut player, _) = player(media);
        let err = player.open("audio-only.m4a").unwrap_err();
        assert!(err.is_open_error());
        assert!(!player.is_open());
    }

    #[test]
    fn test_seek_is_clamped() {
        let (mut player, _) = player(SyntheticMedia::new(4.0, 30.0));
        player.open("clip").unwrap();
        player.seek(10.0).unwrap();
        assert_eq!(player.position(), 4.0);
        player.seek(-3.0).unwrap();
        assert_eq!(player.position(), 0.0);
    }

    #[test]
    fn test_clamp_position() {
        assert_eq!(clamp_position(f64::NAN, 4.0), 0.0);
        assert_eq!(clamp_position(-1.0, 4.0), 0.0);
        assert_eq!(clamp_position(9.0, 4.0), 4.0);
        // unknown duration keeps the target
        assert_eq!(clamp_position(9.0, 0.0), 9.0);
        assert_eq!(clamp_position(f64::NAN, 0.0), 0.0);
    }

    #[test]
    fn test_frame_at_nan_reads_first_frame() {
        let (mut player, _) = player(SyntheticMedia::new(4.0, 30.0));
        player.open("clip").unwrap();
        let frame = player.frame_at(f64::NAN).unwrap().unwrap();
        assert_eq!(frame.frame_number, 0);
        assert_eq!(player.cache_statistics().unwrap().entries, 1);
    }

    #[test]
    fn test_step_while_paused() {
        let (mut player, rx) = player(SyntheticMedia::new(4.0, 30.0));
        player.open("clip").unwrap();
        player.seek(1.0).unwrap();
        let _ = rx.try_iter().count();

        let frame = player.step_frame(1).unwrap().unwrap();
        assert_eq!(frame.frame_number, 31);
        assert!((player.position() - frame.pts).abs() < 1e-9);

        let back = player.step_frame(-1).unwrap().unwrap();
        assert_eq!(back.frame_number, 30);

        let shown: Vec<_> = rx
            .try_iter()
            .filter_map(|e| match e {
                PlayerEvent::FrameReady(f) => Some(f.frame_number),
                _ => None,
            })
            .collect();
        assert_eq!(shown, vec![31, 30]);
    }

    #[test]
    fn test_frame_at_does_not_move_clock() {
        let (mut player, _) = player(SyntheticMedia::new(4.0, 30.0));
        player.open("clip").unwrap();
        let frame = player.frame_at(2.0).unwrap().unwrap();
        assert_eq!(frame.frame_number, 60);
        assert_eq!(player.position(), 0.0);
        assert!(player.cache_statistics().unwrap().entries > 0);
    }

    #[test]
    fn test_play_after_end_restarts_video() {
        let (mut player, rx) = player(SyntheticMedia::new(0.3, 30.0));
        player.open("clip").unwrap();
        player.play().unwrap();
        thread::sleep(Duration::from_millis(500));
        assert!(rx.try_iter().any(|e| matches!(e, PlayerEvent::EndOfStream)));

        player.pause().unwrap();
        player.seek(0.0).unwrap();
        player.play().unwrap();
        thread::sleep(Duration::from_millis(150));
        assert!(rx.try_iter().any(|e| matches!(e, PlayerEvent::FrameReady(_))));
        player.stop();
        assert_eq!(player.live_threads(), 0);
    }
}
