//! Audio chunk types

/// Output sample layout for an audio track: packed f32 at `sample_rate`
/// with `channels` interleaved channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Number of interleaved channels
    pub channels: u16,
}

impl AudioFormat {
    /// Output format for a track: native sample rate, channels clamped to stereo
    pub fn for_track(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.clamp(1, 2),
        }
    }
}

/// Block of decoded, interleaved audio samples.
///
/// Volume and mute are applied when the chunk is rendered, never baked in.
#[derive(Clone)]
pub struct AudioChunk {
    /// Interleaved samples: [L0, R0, L1, R1, ...] for stereo
    pub samples: Vec<f32>,

    /// Presentation timestamp in seconds
    pub pts: f64,

    /// Duration in seconds
    pub duration: f64,

    /// Number of interleaved channels
    pub channels: u16,

    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Create a chunk, deriving its duration from the sample count
    pub fn new(samples: Vec<f32>, pts: f64, channels: u16, sample_rate: u32) -> Self {
        let duration = Self::calculate_duration(samples.len(), channels, sample_rate);
        Self {
            samples,
            pts,
            duration,
            channels,
            sample_rate,
        }
    }

    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Duration in seconds of `total_samples` interleaved samples
    pub fn calculate_duration(total_samples: usize, channels: u16, sample_rate: u32) -> f64 {
        if sample_rate == 0 || channels == 0 {
            return 0.0;
        }
        (total_samples / channels as usize) as f64 / sample_rate as f64
    }
}

impl std::fmt::Debug for AudioChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioChunk")
            .field("pts", &self.pts)
            .field("duration", &self.duration)
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("samples", &self.samples.len())
            .finish()
    }
}
