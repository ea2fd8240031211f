//! Error types for avsync-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for avsync-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for playback operations
#[derive(Error, Debug)]
pub enum Error {
    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Container could not be opened or read
    #[error("Cannot open media: {0}")]
    Open(String),

    /// Container has no video stream
    #[error("No video stream found")]
    NoVideoStream,

    /// Codec not supported
    #[error("Codec not supported: {0}")]
    CodecNotSupported(String),

    /// Decode error for a single frame or packet
    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    /// Container rejected a seek target
    #[error("Seek failed at {0:.3}s")]
    SeekFailed(f64),

    /// Audio output device unavailable or stream could not be built
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// Unknown audio track id
    #[error("Audio track {0} not found")]
    TrackNotFound(usize),

    /// Command issued without an open session
    #[error("No media is open")]
    NotOpen,

    /// Worker thread could not be spawned
    #[error("Thread error: {0}")]
    Thread(String),

    /// FFmpeg error with code
    #[error("FFmpeg error {code}: {message}")]
    FFmpeg { code: i32, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error belongs to the open-failure family (bad path,
    /// unreadable container, missing expected stream).
    pub fn is_open_error(&self) -> bool {
        matches!(
            self,
            Error::FileNotFound(_)
                | Error::Open(_)
                | Error::NoVideoStream
                | Error::CodecNotSupported(_)
                | Error::Io(_)
        )
    }
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for Error {
    fn from(e: ffmpeg_next::Error) -> Self {
        let message = e.to_string();
        Error::FFmpeg {
            code: i32::from(e),
            message,
        }
    }
}

/// Hand-off queue failures. These are expected backpressure signals used to
/// re-check running/pause/seek state, not errors surfaced to the controller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Queue stayed full for the whole put timeout
    #[error("queue put timed out")]
    Timeout,

    /// Nothing available to take
    #[error("queue empty")]
    Empty,
}
