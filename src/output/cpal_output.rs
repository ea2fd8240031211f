//! Sound device output through cpal

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, SampleFormat, SampleRate, Stream, StreamConfig, SupportedBufferSize,
    SupportedStreamConfigRange,
};

use super::remap::adapt_channels;
use super::{AudioOutput, OutputConfig, OutputStream, RenderCallback};
use crate::error::{Error, Result};

/// Output on the default device of the default host.
///
/// Streams run at the track's sample rate with f32 samples. The channel
/// layout falls back from the track's own to stereo, then mono, then
/// whatever the device offers at that rate; blocks are remapped to the
/// device layout in the callback. A device without the track's rate is an
/// audio device error, since resampling belongs to the decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutput;

impl CpalOutput {
    pub fn new() -> Self {
        Self
    }

    fn device() -> Result<Device> {
        cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::AudioDevice("no audio output device found".to_string()))
    }

    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;
        rate_in_range
            && config.channels == supported.channels()
            && supported.sample_format() == SampleFormat::F32
    }

    /// First supported f32 configuration at the track rate, in fallback order
    fn select_config(device: &Device, config: &OutputConfig) -> Result<(StreamConfig, SupportedBufferSize)> {
        let ranges: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map_err(|e| Error::AudioDevice(format!("cannot query output configs: {}", e)))?
            .collect();

        let mut preferred = vec![config.channels, 2, 1];
        preferred.extend(ranges.iter().map(|range| range.channels()));

        for channels in preferred {
            let candidate = StreamConfig {
                channels,
                sample_rate: SampleRate(config.sample_rate),
                buffer_size: BufferSize::Default,
            };
            if let Some(range) = ranges
                .iter()
                .find(|range| Self::is_config_compatible(&candidate, range))
            {
                if channels != config.channels {
                    log::warn!(
                        "{}: device has no {} ch output at {} Hz, using {} ch",
                        config.label,
                        config.channels,
                        config.sample_rate,
                        channels
                    );
                }
                return Ok((candidate, range.buffer_size().clone()));
            }
        }

        Err(Error::AudioDevice(format!(
            "device has no f32 output at {} Hz",
            config.sample_rate
        )))
    }
}

impl AudioOutput for CpalOutput {
    fn open(&self, config: &OutputConfig, render: RenderCallback) -> Result<Box<dyn OutputStream>> {
        let device = Self::device()?;
        log::debug!(
            "Opening {} on {}: {} Hz, {} ch",
            config.label,
            device.name().unwrap_or_default(),
            config.sample_rate,
            config.channels
        );

        let (mut stream_config, buffer_size) = Self::select_config(&device, config)?;
        if let SupportedBufferSize::Range { min, max } = buffer_size {
            if (min..=max).contains(&config.block_size) {
                stream_config.buffer_size = BufferSize::Fixed(config.block_size);
            }
        }

        let mut render = adapt_channels(
            config.channels,
            stream_config.channels,
            config.block_size as usize,
            render,
        );
        let label = config.label.clone();
        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| render(data),
                move |err| log::error!("Audio stream error on {}: {}", label, err),
                None,
            )
            .map_err(|e| Error::AudioDevice(format!("failed to build output stream: {}", e)))?;

        Ok(Box::new(CpalStream { stream }))
    }
}

struct CpalStream {
    stream: Stream,
}

impl OutputStream for CpalStream {
    fn start(&mut self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| Error::AudioDevice(format!("failed to start output stream: {}", e)))
    }

    fn stop(&mut self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| Error::AudioDevice(format!("failed to stop output stream: {}", e)))
    }
}
