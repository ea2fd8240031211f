//! Synthetic media backend
//!
//! Generates deterministic media without touching the filesystem: a gradient
//! test pattern for video and sine tones for audio. Keyframes are placed every
//! `keyframe_interval` frames and seeks snap to them, so random access behaves
//! like a real long-GOP stream. Decode counters are shared between all sources
//! opened from one backend.

use std::f64::consts::TAU;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{
    track_label, AudioChunk, AudioFormat, AudioSource, AudioTrackInfo, MediaBackend, PixelFormat,
    RawFrame, StreamMetadata, VideoSource, VideoStreamInfo,
};
use crate::error::{Error, Result};

/// Samples per channel in each generated audio chunk
pub const CHUNK_FRAMES: usize = 1024;

/// One generated audio track
#[derive(Debug, Clone)]
pub struct SyntheticTrack {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Source channel count (output is clamped to stereo)
    pub channels: u16,

    /// Tone frequency in Hz
    pub frequency: f64,

    /// Peak amplitude
    pub amplitude: f32,

    /// Language tag
    pub language: Option<String>,
}

impl SyntheticTrack {
    /// Stereo 48 kHz tone
    pub fn tone(frequency: f64) -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            frequency,
            amplitude: 0.5,
            language: None,
        }
    }
}

/// Description of the generated media
#[derive(Debug, Clone)]
pub struct SyntheticMedia {
    /// Duration in seconds
    pub duration: f64,

    /// Frame rate
    pub fps: f64,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Distance between keyframes, in frames
    pub keyframe_interval: u64,

    /// Whether the container has a video stream
    pub has_video: bool,

    /// Leave pts unset on every frame
    pub omit_pts: bool,

    /// Fail every Nth frame decode (the frame is skipped)
    pub decode_error_every: Option<u64>,

    /// Audio tracks, stream indices 1..=n
    pub audio_tracks: Vec<SyntheticTrack>,

    /// Stream indices whose `open_audio` fails
    pub broken_audio_streams: Vec<usize>,
}

impl SyntheticMedia {
    /// Video-only media of the given length and rate
    pub fn new(duration: f64, fps: f64) -> Self {
        Self {
            duration,
            fps,
            width: 32,
            height: 18,
            keyframe_interval: 12,
            has_video: true,
            omit_pts: false,
            decode_error_every: None,
            audio_tracks: Vec::new(),
            broken_audio_streams: Vec::new(),
        }
    }

    /// Add a tone track
    pub fn with_track(mut self, track: SyntheticTrack) -> Self {
        self.audio_tracks.push(track);
        self
    }

    /// Total number of video frames
    pub fn frame_count(&self) -> u64 {
        (self.duration * self.fps).floor() as u64
    }

    fn metadata(&self) -> StreamMetadata {
        StreamMetadata {
            duration: self.duration,
            fps: self.fps,
            width: self.width,
            height: self.height,
            audio_tracks: self
                .audio_tracks
                .iter()
                .enumerate()
                .map(|(i, t)| AudioTrackInfo {
                    index: i + 1,
                    channels: t.channels,
                    sample_rate: t.sample_rate,
                    codec: "pcm_f32le".to_string(),
                    label: track_label(t.language.as_deref(), i),
                })
                .collect(),
        }
    }
}

/// Decode activity shared by every source of a backend
#[derive(Debug, Default)]
pub struct DecodeCounters {
    video_frames: AtomicU64,
    audio_chunks: AtomicU64,
    video_seeks: AtomicU64,
    video_opens: AtomicU64,
}

impl DecodeCounters {
    /// Video frames decoded so far
    pub fn video_frames(&self) -> u64 {
        self.video_frames.load(Ordering::Relaxed)
    }

    /// Audio chunks decoded so far
    pub fn audio_chunks(&self) -> u64 {
        self.audio_chunks.load(Ordering::Relaxed)
    }

    /// Video seeks performed so far
    pub fn video_seeks(&self) -> u64 {
        self.video_seeks.load(Ordering::Relaxed)
    }

    /// Video sources opened so far
    pub fn video_opens(&self) -> u64 {
        self.video_opens.load(Ordering::Relaxed)
    }
}

/// Backend serving [`SyntheticMedia`] for any path
pub struct SyntheticBackend {
    media: SyntheticMedia,
    counters: Arc<DecodeCounters>,
}

impl SyntheticBackend {
    /// Create a backend for `media`
    pub fn new(media: SyntheticMedia) -> Self {
        Self {
            media,
            counters: Arc::new(DecodeCounters::default()),
        }
    }

    /// Shared decode counters
    pub fn counters(&self) -> Arc<DecodeCounters> {
        Arc::clone(&self.counters)
    }
}

impl MediaBackend for SyntheticBackend {
    fn probe(&self, _path: &Path) -> Result<StreamMetadata> {
        Ok(self.media.metadata())
    }

    fn open_video(&self, path: &Path) -> Result<Box<dyn VideoSource>> {
        if !self.media.has_video {
            return Err(Error::NoVideoStream);
        }
        self.counters.video_opens.fetch_add(1, Ordering::Relaxed);
        log::debug!("Synthetic video opened for {:?}", path);

        let info = VideoStreamInfo {
            index: 0,
            duration: self.media.duration,
            fps: self.media.fps,
            width: self.media.width,
            height: self.media.height,
        };
        Ok(Box::new(SyntheticVideo {
            media: self.media.clone(),
            info,
            position: 0,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn open_audio(
        &self,
        _path: &Path,
        stream_index: usize,
        format: AudioFormat,
    ) -> Result<Box<dyn AudioSource>> {
        if self.media.broken_audio_streams.contains(&stream_index) {
            return Err(Error::Open(format!("audio stream {} unreadable", stream_index)));
        }
        let track = stream_index
            .checked_sub(1)
            .and_then(|i| self.media.audio_tracks.get(i))
            .ok_or_else(|| Error::Open(format!("audio stream {} not found", stream_index)))?;

        Ok(Box::new(SyntheticAudio {
            track: track.clone(),
            format,
            total_frames: (self.media.duration * format.sample_rate as f64) as usize,
            position: 0,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct SyntheticVideo {
    media: SyntheticMedia,
    info: VideoStreamInfo,
    position: u64,
    counters: Arc<DecodeCounters>,
}

impl SyntheticVideo {
    fn render(&self, index: u64) -> Vec<u8> {
        let format = PixelFormat::Rgba;
        let bpp = format.bytes_per_pixel() as usize;
        let width = self.media.width as usize;
        let mut data = vec![0u8; width * self.media.height as usize * bpp];
        for (i, px) in data.chunks_exact_mut(bpp).enumerate() {
            let x = (i % width) as u64;
            px[0] = (index % 256) as u8;
            px[1] = ((x * 255) / width.max(1) as u64) as u8;
            px[2] = ((index / 256) % 256) as u8;
            px[3] = 255;
        }
        data
    }
}

impl VideoSource for SyntheticVideo {
    fn info(&self) -> &VideoStreamInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.position >= self.media.frame_count() {
            return Ok(None);
        }
        let index = self.position;
        self.position += 1;

        if let Some(every) = self.media.decode_error_every {
            if every > 0 && index % every == every - 1 {
                return Err(Error::DecodeFailed(format!("synthetic corruption at frame {}", index)));
            }
        }

        self.counters.video_frames.fetch_add(1, Ordering::Relaxed);
        let pts = (!self.media.omit_pts).then(|| index as f64 / self.media.fps);
        Ok(Some(RawFrame {
            data: self.render(index),
            width: self.media.width,
            height: self.media.height,
            stride: self.media.width * PixelFormat::Rgba.bytes_per_pixel(),
            pts,
            is_keyframe: index % self.media.keyframe_interval.max(1) == 0,
            pixel_format: PixelFormat::Rgba,
        }))
    }

    fn seek(&mut self, pts: f64) -> Result<()> {
        if !pts.is_finite() || pts < 0.0 || pts > self.media.duration {
            return Err(Error::SeekFailed(pts));
        }
        self.counters.video_seeks.fetch_add(1, Ordering::Relaxed);
        let target = ((pts * self.media.fps) + 1e-9).floor() as u64;
        let gop = self.media.keyframe_interval.max(1);
        self.position = (target / gop) * gop;
        Ok(())
    }
}

struct SyntheticAudio {
    track: SyntheticTrack,
    format: AudioFormat,
    total_frames: usize,
    position: usize,
    counters: Arc<DecodeCounters>,
}

impl AudioSource for SyntheticAudio {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn next_chunk(&mut self) -> Result<Option<AudioChunk>> {
        if self.position >= self.total_frames {
            return Ok(None);
        }
        let frames = CHUNK_FRAMES.min(self.total_frames - self.position);
        let channels = self.format.channels as usize;
        let rate = self.format.sample_rate as f64;

        let mut samples = Vec::with_capacity(frames * channels);
        for n in 0..frames {
            let t = (self.position + n) as f64 / rate;
            let value = (TAU * self.track.frequency * t).sin() as f32 * self.track.amplitude;
            samples.extend(std::iter::repeat(value).take(channels));
        }

        let pts = self.position as f64 / rate;
        self.position += frames;
        self.counters.audio_chunks.fetch_add(1, Ordering::Relaxed);
        Ok(Some(AudioChunk::new(
            samples,
            pts,
            self.format.channels,
            self.format.sample_rate,
        )))
    }

    fn seek(&mut self, pts: f64) -> Result<()> {
        if !pts.is_finite() || pts < 0.0 {
            return Err(Error::SeekFailed(pts));
        }
        let target = (pts * self.format.sample_rate as f64) as usize;
        self.position = (target / CHUNK_FRAMES) * CHUNK_FRAMES;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SyntheticBackend {
        let media = SyntheticMedia::new(2.0, 30.0)
            .with_track(SyntheticTrack::tone(440.0))
            .with_track(SyntheticTrack::tone(660.0));
        SyntheticBackend::new(media)
    }

    #[test]
    fn test_probe_lists_tracks() {
        let meta = backend().probe(Path::new("any.mkv")).unwrap();
        assert_eq!(meta.audio_tracks.len(), 2);
        assert_eq!(meta.audio_tracks[1].index, 2);
        assert_eq!(meta.audio_tracks[1].label, "Track 2");
        assert_eq!(meta.fps, 30.0);
    }

    #[test]
    fn test_video_runs_to_end() {
        let backend = backend();
        let mut video = backend.open_video(Path::new("a")).unwrap();
        let mut count = 0;
        while let Some(frame) = video.next_frame().unwrap() {
            assert_eq!(frame.pts, Some(count as f64 / 30.0));
            count += 1;
        }
        assert_eq!(count, 60);
        assert_eq!(backend.counters().video_frames(), 60);
    }

    #[test]
    fn test_seek_snaps_to_keyframe() {
        let backend = backend();
        let mut video = backend.open_video(Path::new("a")).unwrap();
        // frame 20 lives in the GOP starting at frame 12
        video.seek(20.0 / 30.0).unwrap();
        let frame = video.next_frame().unwrap().unwrap();
        assert!(frame.is_keyframe);
        assert!((frame.pts.unwrap() - 12.0 / 30.0).abs() < 1e-9);
        assert!(video.seek(-1.0).is_err());
    }

    #[test]
    fn test_audio_chunks() {
        let backend = backend();
        let format = AudioFormat::for_track(48_000, 2);
        let mut audio = backend.open_audio(Path::new("a"), 1, format).unwrap();
        let first = audio.next_chunk().unwrap().unwrap();
        assert_eq!(first.frame_count(), CHUNK_FRAMES);
        assert_eq!(first.pts, 0.0);
        let second = audio.next_chunk().unwrap().unwrap();
        assert!((second.pts - CHUNK_FRAMES as f64 / 48_000.0).abs() < 1e-12);
        assert!(first.samples.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_missing_streams() {
        let mut media = SyntheticMedia::new(1.0, 24.0);
        media.has_video = false;
        let backend = SyntheticBackend::new(media);
        assert!(matches!(
            backend.open_video(Path::new("a")),
            Err(Error::NoVideoStream)
        ));
        assert!(backend
            .open_audio(Path::new("a"), 1, AudioFormat::for_track(48_000, 2))
            .is_err());
    }
}
