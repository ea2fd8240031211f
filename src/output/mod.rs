//! Audio output capability
//!
//! A track worker opens one output stream at its track's native rate and
//! channel count and hands it a render callback. The device pulls blocks of
//! interleaved f32 samples from that callback on its own real-time thread.
//! An output may run the device with another channel layout, adapting the
//! track's blocks on the way.

use crate::error::Result;

#[cfg(feature = "cpal-output")]
mod cpal_output;
mod null;
mod remap;
mod render;

#[cfg(feature = "cpal-output")]
pub use cpal_output::CpalOutput;
pub use null::NullOutput;
pub use render::TrackRenderer;

/// Fills one block of interleaved samples. Runs on the device thread and
/// must never block.
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Parameters of one output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    /// Name of the stream, e.g. `track-0`
    pub label: String,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Interleaved channel count
    pub channels: u16,

    /// Preferred frames per callback
    pub block_size: u32,
}

/// An opened output stream. Streams are used only on the thread that
/// opened them.
pub trait OutputStream {
    /// Start pulling from the render callback
    fn start(&mut self) -> Result<()>;

    /// Stop pulling. Dropping the stream also stops it.
    fn stop(&mut self) -> Result<()>;
}

/// Opens output streams on some device
pub trait AudioOutput: Send + Sync {
    /// Open a stream for `config` fed by `render`. Fails with an audio
    /// device error if no suitable device exists.
    fn open(&self, config: &OutputConfig, render: RenderCallback) -> Result<Box<dyn OutputStream>>;
}
