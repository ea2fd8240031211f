//! Demux/decode capability
//!
//! The playback core never decodes by itself; it drives a [`MediaBackend`]
//! that opens containers and hands out per-stream sources. The FFmpeg
//! backend is the production implementation, the synthetic backend generates
//! deterministic media for tests and headless runs.

use std::path::Path;

use crate::error::Result;

mod audio_chunk;
pub(crate) mod config;
#[cfg(feature = "ffmpeg")]
pub(crate) mod ffmpeg_decoder;
mod frame;
mod info;
pub mod synthetic;

pub use audio_chunk::{AudioChunk, AudioFormat};
pub use config::{DecoderConfig, PixelFormat};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg_decoder::FfmpegBackend;
pub use frame::{RawFrame, VideoFrame};
pub use info::{
    frame_duration, track_label, AudioTrackInfo, StreamMetadata, VideoStreamInfo, DEFAULT_FPS,
};

/// Opens containers and hands out independent per-stream sources.
///
/// Every source owns its own container handle, so sources can be driven from
/// different threads without sharing demuxer state.
pub trait MediaBackend: Send + Sync {
    /// Read container and stream metadata without keeping anything open.
    fn probe(&self, path: &Path) -> Result<StreamMetadata>;

    /// Open the primary video stream. Fails with an open error if the
    /// container cannot be read or has no video stream.
    fn open_video(&self, path: &Path) -> Result<Box<dyn VideoSource>>;

    /// Open the audio stream at container index `stream_index`, converting
    /// to `format` on decode.
    fn open_audio(
        &self,
        path: &Path,
        stream_index: usize,
        format: AudioFormat,
    ) -> Result<Box<dyn AudioSource>>;
}

/// Sequential video decoder over one container handle
pub trait VideoSource: Send {
    /// Stream information
    fn info(&self) -> &VideoStreamInfo;

    /// Decode the next picture. `Ok(None)` is end of stream; an error is a
    /// single bad frame and the caller may keep decoding.
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;

    /// Seek to the keyframe at or before `pts` seconds.
    fn seek(&mut self, pts: f64) -> Result<()>;
}

/// Sequential audio decoder over one container handle
pub trait AudioSource: Send {
    /// Output format of produced chunks
    fn format(&self) -> AudioFormat;

    /// Decode the next chunk. `Ok(None)` is end of stream.
    fn next_chunk(&mut self) -> Result<Option<AudioChunk>>;

    /// Seek to the keyframe at or before `pts` seconds.
    fn seek(&mut self, pts: f64) -> Result<()>;
}
