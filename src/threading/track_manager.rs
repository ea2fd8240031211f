//! Audio track manager
//!
//! Maps track ids (discovery order) to workers and fans commands out to all
//! of them. Volume and mute live with the track, not the worker, so they
//! survive worker replacement.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::PlayerConfig;
use crate::decoder::{AudioTrackInfo, MediaBackend};
use crate::error::{Error, Result};
use crate::output::AudioOutput;

use super::{AudioTrackWorker, TrackControls, WorkerPhase};

/// Snapshot of one audio track
#[derive(Debug, Clone)]
pub struct TrackStatus {
    pub track_id: usize,
    pub info: AudioTrackInfo,
    pub volume: f32,
    pub muted: bool,
    /// `None` if the track has no worker (it failed to open or start)
    pub phase: Option<WorkerPhase>,
    pub position: Option<f64>,
}

/// Owner of every audio track worker of a session
pub struct TrackManager {
    backend: Arc<dyn MediaBackend>,
    path: PathBuf,
    output: Arc<dyn AudioOutput>,
    config: PlayerConfig,
    tracks: Vec<AudioTrackInfo>,
    controls: Vec<Arc<TrackControls>>,
    workers: BTreeMap<usize, AudioTrackWorker>,
    started: bool,
    paused: bool,
}

impl TrackManager {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        path: &Path,
        output: Arc<dyn AudioOutput>,
        config: &PlayerConfig,
    ) -> Self {
        Self {
            backend,
            path: path.to_path_buf(),
            output,
            config: config.clone(),
            tracks: Vec::new(),
            controls: Vec::new(),
            workers: BTreeMap::new(),
            started: false,
            paused: true,
        }
    }

    /// Enumerate the audio streams of the container. Running workers are not
    /// touched.
    pub fn discover_tracks(&mut self) -> Result<&[AudioTrackInfo]> {
        let metadata = self.backend.probe(&self.path)?;
        log::info!("Discovered {} audio track(s)", metadata.audio_tracks.len());
        for track in &metadata.audio_tracks {
            log::debug!(
                "  {} (stream {}): {} Hz, {} ch, {}",
                track.label,
                track.index,
                track.sample_rate,
                track.channels,
                track.codec
            );
        }

        if self.controls.len() < metadata.audio_tracks.len() {
            self.controls
                .resize_with(metadata.audio_tracks.len(), || Arc::new(TrackControls::new()));
        }
        self.tracks = metadata.audio_tracks;
        Ok(&self.tracks)
    }

    /// Open one worker per discovered track that has none yet. Tracks that
    /// fail to open are skipped. Returns the number of tracks with a worker.
    pub fn initialize_all_tracks(&mut self) -> usize {
        for track_id in 0..self.tracks.len() {
            if self.workers.contains_key(&track_id) {
                continue;
            }
            match self.open_worker(track_id) {
                Ok(worker) => {
                    self.workers.insert(track_id, worker);
                }
                Err(e) => log::warn!("Dropping audio track {}: {}", track_id, e),
            }
        }
        log::info!("{} of {} audio track(s) ready", self.workers.len(), self.tracks.len());
        self.workers.len()
    }

    fn open_worker(&self, track_id: usize) -> Result<AudioTrackWorker> {
        let info = self.tracks.get(track_id).ok_or(Error::TrackNotFound(track_id))?;
        AudioTrackWorker::open(
            self.backend.as_ref(),
            &self.path,
            track_id,
            info,
            Arc::clone(&self.controls[track_id]),
            Arc::clone(&self.output),
            &self.config,
        )
    }

    /// Start every opened worker. A track whose output cannot start is
    /// dropped.
    pub fn start_all(&mut self) {
        self.started = true;
        self.paused = false;
        self.start_pending();
    }

    fn start_pending(&mut self) {
        let mut failed = Vec::new();
        for (track_id, worker) in self.workers.iter_mut() {
            if worker.is_started() {
                continue;
            }
            if let Err(e) = worker.start() {
                log::warn!("Dropping audio track {}: {}", track_id, e);
                failed.push(*track_id);
            }
        }
        for track_id in failed {
            self.workers.remove(&track_id);
        }
    }

    pub fn pause_all(&mut self) {
        self.paused = true;
        for worker in self.workers.values() {
            worker.pause();
        }
    }

    /// Resume every worker at `position`. Workers whose thread already
    /// exited are replaced by fresh ones seeked to `position`.
    pub fn resume_all(&mut self, position: f64) {
        if !self.started {
            for worker in self.workers.values() {
                worker.seek(position);
            }
            self.start_all();
            return;
        }

        self.paused = false;
        self.replace_exited(position);
        self.start_pending();
        for worker in self.workers.values() {
            worker.resume();
        }
    }

    /// Seek every worker. Exited workers are replaced so that the seek
    /// brings their audio back.
    pub fn seek_all(&mut self, position: f64) {
        self.replace_exited(position);
        for worker in self.workers.values() {
            worker.seek(position);
        }
        if self.started && !self.paused {
            self.start_pending();
        }
    }

    fn replace_exited(&mut self, position: f64) {
        let exited: Vec<usize> = self
            .workers
            .iter()
            .filter(|(_, w)| w.has_exited())
            .map(|(id, _)| *id)
            .collect();

        for track_id in exited {
            if let Some(mut old) = self.workers.remove(&track_id) {
                old.stop();
            }
            match self.open_worker(track_id) {
                Ok(worker) => {
                    log::debug!("Replacing finished audio track {} at {:.3}s", track_id, position);
                    worker.seek(position);
                    self.workers.insert(track_id, worker);
                }
                Err(e) => log::warn!("Could not reopen audio track {}: {}", track_id, e),
            }
        }
    }

    /// Stop and join every worker. Returns whether all threads were joined.
    pub fn stop_all(&mut self) -> bool {
        let mut joined = true;
        for worker in self.workers.values_mut() {
            joined &= worker.stop();
            worker.queue().drain();
        }
        self.workers.clear();
        self.started = false;
        self.paused = true;
        joined
    }

    pub fn set_track_volume(&self, track_id: usize, volume: f32) -> Result<()> {
        self.track_controls(track_id)?.set_volume(volume);
        Ok(())
    }

    pub fn set_track_muted(&self, track_id: usize, muted: bool) -> Result<()> {
        self.track_controls(track_id)?.set_muted(muted);
        Ok(())
    }

    fn track_controls(&self, track_id: usize) -> Result<&Arc<TrackControls>> {
        if track_id >= self.tracks.len() {
            return Err(Error::TrackNotFound(track_id));
        }
        self.controls.get(track_id).ok_or(Error::TrackNotFound(track_id))
    }

    /// Last rendered pts of a track, `None` if it has no worker
    pub fn track_position(&self, track_id: usize) -> Result<Option<f64>> {
        if track_id >= self.tracks.len() {
            return Err(Error::TrackNotFound(track_id));
        }
        Ok(self.workers.get(&track_id).map(|w| w.current_pts()))
    }

    /// Discovered tracks
    pub fn track_infos(&self) -> &[AudioTrackInfo] {
        &self.tracks
    }

    pub fn tracks(&self) -> Vec<TrackStatus> {
        self.tracks
            .iter()
            .enumerate()
            .map(|(track_id, info)| {
                let worker = self.workers.get(&track_id);
                let controls = &self.controls[track_id];
                TrackStatus {
                    track_id,
                    info: info.clone(),
                    volume: controls.volume(),
                    muted: controls.is_muted(),
                    phase: worker.map(|w| w.phase()),
                    position: worker.map(|w| w.current_pts()),
                }
            })
            .collect()
    }

    /// Number of tracks with a worker
    pub fn active_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of worker threads still executing
    pub fn live_threads(&self) -> usize {
        self.workers.values().filter(|w| w.is_alive()).count()
    }

    /// Whether every track queue is empty
    pub fn queues_empty(&self) -> bool {
        self.workers.values().all(|w| w.queue().is_empty())
    }
}

impl Drop for TrackManager {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::synthetic::{SyntheticBackend, SyntheticMedia, SyntheticTrack};
    use crate::output::NullOutput;
    use std::thread;
    use std::time::{Duration, Instant};

    fn config() -> PlayerConfig {
        PlayerConfig {
            audio_queue_capacity: 8,
            pause_poll_interval: Duration::from_millis(5),
            queue_put_timeout: Duration::from_millis(5),
            output_block_size: 256,
            ..PlayerConfig::default()
        }
    }

    fn manager(media: SyntheticMedia, output: NullOutput) -> (TrackManager, Arc<NullOutput>) {
        let output = Arc::new(output);
        let manager = TrackManager::new(
            Arc::new(SyntheticBackend::new(media)),
            Path::new("clip"),
            output.clone(),
            &config(),
        );
        (manager, output)
    }

    fn two_tracks(duration: f64) -> SyntheticMedia {
        SyntheticMedia::new(duration, 30.0)
            .with_track(SyntheticTrack::tone(440.0))
            .with_track(SyntheticTrack::tone(660.0))
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_discover_has_no_side_effects() {
        let (mut manager, _) = manager(two_tracks(2.0), NullOutput::new());
        let tracks = manager.discover_tracks().unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.live_threads(), 0);
    }

    #[test]
    fn test_partial_open_keeps_other_tracks() {
        let mut media = two_tracks(2.0);
        media.broken_audio_streams.push(1);
        let (mut manager, _) = manager(media, NullOutput::new());
        manager.discover_tracks().unwrap();
        assert_eq!(manager.initialize_all_tracks(), 1);

        let status = manager.tracks();
        assert!(status[0].phase.is_none());
        assert_eq!(status[1].phase, Some(WorkerPhase::Opened));
    }

    #[test]
    fn test_device_failure_drops_track() {
        let (mut manager, _) = manager(two_tracks(2.0), NullOutput::failing(["track-0"]));
        manager.discover_tracks().unwrap();
        assert_eq!(manager.initialize_all_tracks(), 2);
        manager.start_all();
        assert_eq!(manager.active_count(), 1);
        assert_eq!(manager.live_threads(), 1);
        assert!(manager.stop_all());
    }

    #[test]
    fn test_unknown_track_id() {
        let (mut manager, _) = manager(two_tracks(1.0), NullOutput::new());
        manager.discover_tracks().unwrap();
        assert!(matches!(manager.set_track_volume(5, 0.5), Err(Error::TrackNotFound(5))));
        assert!(matches!(manager.set_track_muted(2, true), Err(Error::TrackNotFound(2))));
        assert!(manager.track_position(3).is_err());
    }

    #[test]
    fn test_volume_and_mute_per_track() {
        let (mut manager, output) = manager(two_tracks(5.0), NullOutput::new());
        manager.discover_tracks().unwrap();
        manager.initialize_all_tracks();
        manager.set_track_muted(0, true).unwrap();
        manager.set_track_volume(1, 0.5).unwrap();
        manager.start_all();

        assert!(wait_for(|| manager.track_position(1).unwrap().unwrap_or(0.0) > 0.1));
        let muted = output.last_block("track-0").unwrap();
        let loud = output.last_block("track-1").unwrap();
        assert!(muted.iter().all(|s| *s == 0.0));
        assert!(loud.iter().any(|s| *s != 0.0));
        assert!(loud.iter().all(|s| s.abs() <= 0.25 + 1e-4));
        // muted track still advances
        assert!(manager.track_position(0).unwrap().unwrap_or(0.0) > 0.0);
        manager.stop_all();
    }

    #[test]
    fn test_resume_replaces_finished_workers() {
        let (mut manager, _) = manager(two_tracks(0.2), NullOutput::new());
        manager.discover_tracks().unwrap();
        manager.initialize_all_tracks();
        manager.set_track_volume(0, 0.4).unwrap();
        manager.start_all();
        assert!(wait_for(|| manager.live_threads() == 0));

        manager.pause_all();
        manager.resume_all(0.05);
        assert_eq!(manager.active_count(), 2);
        assert_eq!(manager.live_threads(), 2);
        // settings carry over to the replacement
        assert!((manager.tracks()[0].volume - 0.4).abs() < 1e-4);
        assert!(manager.stop_all());
        assert_eq!(manager.live_threads(), 0);
    }

    #[test]
    fn test_stop_all_empties_queues() {
        let (mut manager, _) = manager(two_tracks(5.0), NullOutput::new());
        manager.discover_tracks().unwrap();
        manager.initialize_all_tracks();
        manager.start_all();
        manager.pause_all();
        thread::sleep(Duration::from_millis(30));

        assert!(manager.stop_all());
        assert_eq!(manager.live_threads(), 0);
        assert!(manager.queues_empty());
        assert_eq!(manager.active_count(), 0);
    }
}
