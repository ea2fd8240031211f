//! Decoder configuration

/// Pixel format for output frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PixelFormat {
    /// RGB24 (24-bit packed)
    Rgb24 = 0,
    /// RGBA (32-bit packed)
    #[default]
    Rgba = 1,
    /// BGRA (32-bit packed)
    Bgra = 2,
}

impl PixelFormat {
    /// Bytes per pixel for the packed layout
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgba | PixelFormat::Bgra => 4,
        }
    }
}

/// Decoder configuration
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Output pixel format for video frames
    pub output_pixel_format: PixelFormat,

    /// Number of codec threads (0 = auto)
    pub thread_count: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            output_pixel_format: PixelFormat::Rgba,
            thread_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DecoderConfig::default();
        assert_eq!(config.output_pixel_format, PixelFormat::Rgba);
        assert_eq!(config.thread_count, 0);
    }

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(PixelFormat::Rgb24.bytes_per_pixel(), 3);
        assert_eq!(PixelFormat::Bgra.bytes_per_pixel(), 4);
    }
}
