//! Media information types

/// Audio track information
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrackInfo {
    /// Container stream index
    pub index: usize,

    /// Number of channels
    pub channels: u16,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Codec short name
    pub codec: String,

    /// Language tag, or a generated "Track N" label
    pub label: String,
}

/// Video stream information
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStreamInfo {
    /// Container stream index
    pub index: usize,

    /// Duration in seconds
    pub duration: f64,

    /// Frame rate
    pub fps: f64,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,
}

/// Stream metadata, populated once at open time
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadata {
    /// Duration in seconds
    pub duration: f64,

    /// Frame rate
    pub fps: f64,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Audio tracks in container order
    pub audio_tracks: Vec<AudioTrackInfo>,
}

impl StreamMetadata {
    /// Duration of one video frame in seconds
    pub fn frame_duration(&self) -> f64 {
        frame_duration(self.fps)
    }

    /// Check if media has audio
    pub fn has_audio(&self) -> bool {
        !self.audio_tracks.is_empty()
    }
}

/// Default frame rate when a stream does not report one
pub const DEFAULT_FPS: f64 = 30.0;

/// Frame duration for `fps`, falling back to [`DEFAULT_FPS`]
pub fn frame_duration(fps: f64) -> f64 {
    if fps > 0.0 {
        1.0 / fps
    } else {
        1.0 / DEFAULT_FPS
    }
}

/// Label used when a track carries no language tag
pub fn track_label(language: Option<&str>, ordinal: usize) -> String {
    match language {
        Some(lang) if !lang.is_empty() && lang != "und" => lang.to_string(),
        _ => format!("Track {}", ordinal + 1),
    }
}
