//! FFmpeg backend implementation using ffmpeg-next
//!
//! Each source opens its own `Input` so the live decode workers and the
//! frame stepper never share demuxer state.

use std::path::Path;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::format::context::Input as FormatContext;
use ffmpeg_next::media::Type as MediaType;
use ffmpeg_next::software::resampling::Context as ResamplerContext;
use ffmpeg_next::software::scaling::{Context as ScalerContext, Flags as ScalerFlags};
use ffmpeg_next::util::frame::audio::Audio as AudioFrameFFmpeg;
use ffmpeg_next::util::frame::video::Video as VideoFrameFFmpeg;
use ffmpeg_next::Rational;

use super::config::{DecoderConfig, PixelFormat};
use super::{
    track_label, AudioChunk, AudioFormat, AudioSource, AudioTrackInfo, MediaBackend, RawFrame,
    StreamMetadata, VideoSource, VideoStreamInfo, DEFAULT_FPS,
};
use crate::error::{Error, Result};

/// Upper bound on packets read while looking for one decodable frame
const MAX_PACKETS_PER_FRAME: usize = 500;

/// Media backend over FFmpeg
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend {
    config: DecoderConfig,
}

impl FfmpegBackend {
    /// Create a backend with decoder configuration
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }
}

impl MediaBackend for FfmpegBackend {
    fn probe(&self, path: &Path) -> Result<StreamMetadata> {
        let input = open_input(path)?;

        let mut metadata = StreamMetadata {
            duration: container_duration(&input),
            fps: 0.0,
            width: 0,
            height: 0,
            audio_tracks: Vec::new(),
        };

        if let Some(stream) = input.streams().best(MediaType::Video) {
            let info = video_stream_info(&input, &stream)?;
            metadata.duration = info.duration;
            metadata.fps = info.fps;
            metadata.width = info.width;
            metadata.height = info.height;
        }

        for stream in input.streams() {
            let params = stream.parameters();
            if params.medium() != MediaType::Audio {
                continue;
            }
            let codec = ffmpeg::decoder::find(params.id())
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let decoder = match CodecContext::from_parameters(params).and_then(|c| c.decoder().audio()) {
                Ok(decoder) => decoder,
                Err(e) => {
                    log::warn!("Skipping audio stream {}: {}", stream.index(), e);
                    continue;
                }
            };
            let language = stream.metadata().get("language").map(|s| s.to_string());
            let ordinal = metadata.audio_tracks.len();
            metadata.audio_tracks.push(AudioTrackInfo {
                index: stream.index(),
                channels: decoder.channels(),
                sample_rate: decoder.rate(),
                codec,
                label: track_label(language.as_deref(), ordinal),
            });
        }

        log::debug!(
            "Probed {:?}: {:.2}s, {} audio track(s)",
            path,
            metadata.duration,
            metadata.audio_tracks.len()
        );
        Ok(metadata)
    }

    fn open_video(&self, path: &Path) -> Result<Box<dyn VideoSource>> {
        Ok(Box::new(FfmpegVideoSource::new(path, &self.config)?))
    }

    fn open_audio(
        &self,
        path: &Path,
        stream_index: usize,
        format: AudioFormat,
    ) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(FfmpegAudioSource::new(path, stream_index, format)?))
    }
}

/// Open an input container, mapping failures to open errors
fn open_input(path: &Path) -> Result<FormatContext> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }

    // Initialize FFmpeg (safe to call multiple times)
    ffmpeg::init().map_err(|e| Error::Open(format!("FFmpeg init failed: {}", e)))?;

    ffmpeg::format::input(path).map_err(|e| Error::Open(e.to_string()))
}

fn container_duration(input: &FormatContext) -> f64 {
    let duration = input.duration();
    if duration > 0 {
        duration as f64 / ffmpeg::ffi::AV_TIME_BASE as f64
    } else {
        0.0
    }
}

fn video_stream_info(input: &FormatContext, stream: &ffmpeg::Stream) -> Result<VideoStreamInfo> {
    let time_base = stream.time_base();
    let duration = if stream.duration() > 0 {
        pts_to_seconds(stream.duration(), time_base)
    } else {
        container_duration(input)
    };

    let rate = stream.avg_frame_rate();
    let fps = if rate.denominator() > 0 && rate.numerator() > 0 {
        rate.numerator() as f64 / rate.denominator() as f64
    } else {
        DEFAULT_FPS
    };

    let decoder = CodecContext::from_parameters(stream.parameters())?
        .decoder()
        .video()
        .map_err(|e| Error::CodecNotSupported(e.to_string()))?;

    Ok(VideoStreamInfo {
        index: stream.index(),
        duration,
        fps,
        width: decoder.width(),
        height: decoder.height(),
    })
}

/// Convert a stream timestamp to seconds
fn pts_to_seconds(pts: i64, time_base: Rational) -> f64 {
    if time_base.denominator() == 0 {
        return pts as f64;
    }
    pts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
}

/// Convert seconds to AV_TIME_BASE units for container-level seeks
fn seconds_to_av_time(seconds: f64) -> i64 {
    (seconds.max(0.0) * ffmpeg::ffi::AV_TIME_BASE as f64) as i64
}

/// Convert our PixelFormat to FFmpeg format
fn pixel_format_to_ffmpeg(format: PixelFormat) -> ffmpeg::format::Pixel {
    match format {
        PixelFormat::Rgb24 => ffmpeg::format::Pixel::RGB24,
        PixelFormat::Rgba => ffmpeg::format::Pixel::RGBA,
        PixelFormat::Bgra => ffmpeg::format::Pixel::BGRA,
    }
}

/// Video source over one FFmpeg input
pub struct FfmpegVideoSource {
    input: FormatContext,
    info: VideoStreamInfo,
    decoder: ffmpeg::decoder::Video,
    scaler: Option<ScalerContext>,
    target_format: PixelFormat,
    time_base: Rational,
    eof_sent: bool,
}

// The scaler holds a raw SwsContext; the source is only ever used by the
// single thread that currently owns it.
unsafe impl Send for FfmpegVideoSource {}

impl FfmpegVideoSource {
    /// Open the best video stream of `path`
    pub fn new(path: &Path, config: &DecoderConfig) -> Result<Self> {
        let input = open_input(path)?;

        let stream = input
            .streams()
            .best(MediaType::Video)
            .ok_or(Error::NoVideoStream)?;
        let info = video_stream_info(&input, &stream)?;
        let time_base = stream.time_base();

        let codec = ffmpeg::decoder::find(stream.parameters().id()).ok_or_else(|| {
            Error::CodecNotSupported(format!("No decoder for codec: {:?}", stream.parameters().id()))
        })?;
        log::info!("Using decoder: {} ({})", codec.name(), codec.description());

        let mut decoder_ctx = CodecContext::new_with_codec(codec);
        decoder_ctx
            .set_parameters(stream.parameters())
            .map_err(|e| Error::Open(format!("Failed to set codec parameters: {}", e)))?;

        if config.thread_count > 0 {
            unsafe {
                (*decoder_ctx.as_mut_ptr()).thread_count = config.thread_count as i32;
            }
        }

        let decoder = decoder_ctx
            .decoder()
            .video()
            .map_err(|e| Error::CodecNotSupported(format!("Failed to open video decoder: {}", e)))?;

        let target = pixel_format_to_ffmpeg(config.output_pixel_format);
        let scaler = if decoder.format() != target {
            let scaler = ScalerContext::get(
                decoder.format(),
                decoder.width(),
                decoder.height(),
                target,
                decoder.width(),
                decoder.height(),
                ScalerFlags::BILINEAR,
            )
            .map_err(|e| Error::Open(format!("Failed to create scaler: {}", e)))?;
            Some(scaler)
        } else {
            None
        };

        log::info!(
            "Video: {}x{} @ {:.2} fps, duration: {:.2}s",
            info.width,
            info.height,
            info.fps,
            info.duration
        );

        Ok(Self {
            input,
            info,
            decoder,
            scaler,
            target_format: config.output_pixel_format,
            time_base,
            eof_sent: false,
        })
    }

    fn receive_frame(&mut self) -> Result<Option<RawFrame>> {
        let mut decoded = VideoFrameFFmpeg::empty();

        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => {
                // Read the timestamp before scaling; the scaled frame has none
                let pts = decoded
                    .timestamp()
                    .or_else(|| decoded.pts())
                    .map(|ts| pts_to_seconds(ts, self.time_base));
                let is_keyframe = decoded.is_key();

                let output = match self.scaler.as_mut() {
                    Some(scaler) => {
                        let mut scaled = VideoFrameFFmpeg::empty();
                        scaler
                            .run(&decoded, &mut scaled)
                            .map_err(|e| Error::DecodeFailed(format!("Failed to scale frame: {}", e)))?;
                        scaled
                    }
                    None => decoded,
                };

                let stride = output.stride(0) as u32;
                let height = output.height();
                let size = (stride * height) as usize;
                let plane = output.data(0);
                if plane.len() < size {
                    return Err(Error::DecodeFailed(format!(
                        "short plane: {} < {} bytes",
                        plane.len(),
                        size
                    )));
                }

                Ok(Some(RawFrame {
                    data: plane[..size].to_vec(),
                    width: output.width(),
                    height,
                    stride,
                    pts,
                    is_keyframe,
                    pixel_format: self.target_format,
                }))
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(None),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(Error::DecodeFailed(format!("Failed to receive frame: {}", e))),
        }
    }
}

impl VideoSource for FfmpegVideoSource {
    fn info(&self) -> &VideoStreamInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        let stream_index = self.info.index;

        for _ in 0..MAX_PACKETS_PER_FRAME {
            // Drain anything the decoder already holds before feeding more
            if let Some(frame) = self.receive_frame()? {
                return Ok(Some(frame));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let next = self.input.packets().next();
            match next {
                Some((stream, packet)) => {
                    if stream.index() != stream_index {
                        continue;
                    }
                    self.decoder
                        .send_packet(&packet)
                        .map_err(|e| Error::DecodeFailed(format!("Failed to send packet: {}", e)))?;
                }
                None => {
                    log::debug!("Video end of stream, flushing decoder");
                    self.decoder.send_eof().ok();
                    self.eof_sent = true;
                }
            }
        }

        Err(Error::DecodeFailed(format!(
            "no frame after {} packets",
            MAX_PACKETS_PER_FRAME
        )))
    }

    fn seek(&mut self, pts: f64) -> Result<()> {
        let target = seconds_to_av_time(pts);
        self.input.seek(target, ..target).map_err(|e| {
            log::warn!("Video seek to {:.3}s failed: {}", pts, e);
            Error::SeekFailed(pts)
        })?;
        // Flush decoder buffers - stale references survive a seek otherwise
        self.decoder.flush();
        self.eof_sent = false;
        Ok(())
    }
}

/// Audio source over one FFmpeg input, resampled to packed f32
pub struct FfmpegAudioSource {
    input: FormatContext,
    stream_index: usize,
    decoder: ffmpeg::decoder::Audio,
    resampler: Option<ResamplerContext>,
    format: AudioFormat,
    time_base: Rational,
    eof_sent: bool,
}

// The resampler holds a raw SwrContext; see FfmpegVideoSource.
unsafe impl Send for FfmpegAudioSource {}

impl FfmpegAudioSource {
    /// Open audio stream `stream_index` of `path`
    pub fn new(path: &Path, stream_index: usize, format: AudioFormat) -> Result<Self> {
        let input = open_input(path)?;
        let stream = input
            .stream(stream_index)
            .ok_or_else(|| Error::Open(format!("Audio stream {} not found", stream_index)))?;
        if stream.parameters().medium() != MediaType::Audio {
            return Err(Error::Open(format!("Stream {} is not audio", stream_index)));
        }
        let time_base = stream.time_base();

        let decoder = CodecContext::from_parameters(stream.parameters())?
            .decoder()
            .audio()
            .map_err(|e| Error::CodecNotSupported(format!("Failed to open audio decoder: {}", e)))?;

        log::debug!(
            "Audio stream {}: {} Hz, {} ch -> {} Hz, {} ch",
            stream_index,
            decoder.rate(),
            decoder.channels(),
            format.sample_rate,
            format.channels
        );

        Ok(Self {
            input,
            stream_index,
            decoder,
            resampler: None,
            format,
            time_base,
            eof_sent: false,
        })
    }

    fn ensure_resampler(&mut self, frame: &AudioFrameFFmpeg) -> Result<()> {
        if self.resampler.is_some() {
            return Ok(());
        }

        let src_layout = if frame.channel_layout().is_empty() {
            ffmpeg::ChannelLayout::default(frame.channels() as i32)
        } else {
            frame.channel_layout()
        };
        let dst_layout = if self.format.channels == 1 {
            ffmpeg::ChannelLayout::MONO
        } else {
            ffmpeg::ChannelLayout::STEREO
        };

        let resampler = ResamplerContext::get(
            frame.format(),
            src_layout,
            frame.rate(),
            ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Packed),
            dst_layout,
            self.format.sample_rate,
        )
        .map_err(|e| Error::DecodeFailed(format!("Failed to create resampler: {}", e)))?;

        self.resampler = Some(resampler);
        Ok(())
    }

    fn convert(&mut self, frame: &AudioFrameFFmpeg) -> Result<Option<AudioChunk>> {
        self.ensure_resampler(frame)?;
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(None);
        };

        let mut output = AudioFrameFFmpeg::empty();
        resampler
            .run(frame, &mut output)
            .map_err(|e| Error::DecodeFailed(format!("Resampling failed: {}", e)))?;

        let channels = self.format.channels as usize;
        let count = output.samples() * channels;
        if count == 0 {
            return Ok(None);
        }

        let samples: Vec<f32> = output
            .data(0)
            .chunks_exact(4)
            .take(count)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let pts = frame
            .timestamp()
            .or_else(|| frame.pts())
            .map(|ts| pts_to_seconds(ts, self.time_base))
            .unwrap_or(0.0);

        Ok(Some(AudioChunk::new(
            samples,
            pts,
            self.format.channels,
            self.format.sample_rate,
        )))
    }

    fn receive_chunk(&mut self) -> Result<Option<AudioChunk>> {
        loop {
            let mut decoded = AudioFrameFFmpeg::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    // The resampler may buffer a whole frame; keep pulling
                    if let Some(chunk) = self.convert(&decoded)? {
                        return Ok(Some(chunk));
                    }
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    return Ok(None)
                }
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => {
                    return Err(Error::DecodeFailed(format!("Failed to receive audio: {}", e)))
                }
            }
        }
    }
}

impl AudioSource for FfmpegAudioSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn next_chunk(&mut self) -> Result<Option<AudioChunk>> {
        for _ in 0..MAX_PACKETS_PER_FRAME {
            if let Some(chunk) = self.receive_chunk()? {
                return Ok(Some(chunk));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let next = self.input.packets().next();
            match next {
                Some((stream, packet)) => {
                    if stream.index() != self.stream_index {
                        continue;
                    }
                    self.decoder
                        .send_packet(&packet)
                        .map_err(|e| Error::DecodeFailed(format!("Failed to send packet: {}", e)))?;
                }
                None => {
                    self.decoder.send_eof().ok();
                    self.eof_sent = true;
                }
            }
        }

        Err(Error::DecodeFailed(format!(
            "no audio after {} packets",
            MAX_PACKETS_PER_FRAME
        )))
    }

    fn seek(&mut self, pts: f64) -> Result<()> {
        let target = seconds_to_av_time(pts);
        self.input.seek(target, ..target).map_err(|e| {
            log::warn!("Audio seek to {:.3}s failed: {}", pts, e);
            Error::SeekFailed(pts)
        })?;
        self.decoder.flush();
        // Drop resampler history from the old position
        self.resampler = None;
        self.eof_sent = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_pts_conversion() {
        let time_base = Rational::new(1, 90000);
        assert!((pts_to_seconds(90000, time_base) - 1.0).abs() < 1e-12);
        assert!((pts_to_seconds(45000, time_base) - 0.5).abs() < 1e-12);
        assert_eq!(seconds_to_av_time(2.0), 2 * ffmpeg::ffi::AV_TIME_BASE as i64);
        assert_eq!(seconds_to_av_time(-1.0), 0);
    }

    #[test]
    fn test_pixel_format_conversion() {
        assert_eq!(pixel_format_to_ffmpeg(PixelFormat::Rgba), ffmpeg::format::Pixel::RGBA);
        assert_eq!(pixel_format_to_ffmpeg(PixelFormat::Rgb24), ffmpeg::format::Pixel::RGB24);
    }

    #[test]
    fn test_missing_file_is_open_error() {
        let backend = FfmpegBackend::default();
        let err = backend
            .open_video(Path::new("/nonexistent/file.mp4"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::FileNotFound(_)));
        assert!(err.is_open_error());
    }

    #[test]
    fn test_garbage_container_is_open_error() {
        let mut file = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
        file.write_all(&[0x5au8; 4096]).unwrap();
        file.flush().unwrap();

        let backend = FfmpegBackend::default();
        let err = backend.open_video(file.path()).err().unwrap();
        assert!(err.is_open_error(), "unexpected error: {}", err);
    }
}
