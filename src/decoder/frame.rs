//! Video frame types

use std::sync::Arc;

use super::config::PixelFormat;

/// Decoded picture as produced by a [`VideoSource`](super::VideoSource),
/// before the worker assigns its final pts and frame number.
#[derive(Clone)]
pub struct RawFrame {
    /// Packed pixel data
    pub data: Vec<u8>,

    /// Frame width
    pub width: u32,

    /// Frame height
    pub height: u32,

    /// Bytes per row (stride)
    pub stride: u32,

    /// Presentation timestamp in seconds, if the codec provided one
    pub pts: Option<f64>,

    /// Whether this is a keyframe
    pub is_keyframe: bool,

    /// Pixel format
    pub pixel_format: PixelFormat,
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts", &self.pts)
            .field("is_keyframe", &self.is_keyframe)
            .field("data_size", &self.data.len())
            .finish()
    }
}

/// Decoded video frame, immutable once created.
///
/// Pixel data is shared, so clones handed to the cache and to the display
/// callback do not copy the image.
#[derive(Clone)]
pub struct VideoFrame {
    /// Packed pixel data
    pub data: Arc<[u8]>,

    /// Frame width
    pub width: u32,

    /// Frame height
    pub height: u32,

    /// Bytes per row (stride)
    pub stride: u32,

    /// Presentation timestamp in seconds
    pub pts: f64,

    /// Sequential frame number
    pub frame_number: u64,

    /// Whether this is a keyframe
    pub is_keyframe: bool,

    /// Pixel format
    pub pixel_format: PixelFormat,
}

impl VideoFrame {
    /// Wrap a decoded picture with its resolved pts and frame number
    pub fn from_raw(raw: RawFrame, pts: f64, frame_number: u64) -> Self {
        Self {
            data: raw.data.into(),
            width: raw.width,
            height: raw.height,
            stride: raw.stride,
            pts,
            frame_number,
            is_keyframe: raw.is_keyframe,
            pixel_format: raw.pixel_format,
        }
    }

    /// Get data size in bytes
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Calculate expected data size for a tightly packed frame
    pub fn expected_size(width: u32, height: u32, format: PixelFormat) -> usize {
        (width * height * format.bytes_per_pixel()) as usize
    }

    /// Create a test frame (for testing only)
    #[cfg(test)]
    pub fn test_frame(pts: f64, frame_number: u64) -> Self {
        Self {
            data: vec![0u8; 16].into(),
            width: 2,
            height: 2,
            stride: 8,
            pts,
            frame_number,
            is_keyframe: frame_number == 0,
            pixel_format: PixelFormat::Rgba,
        }
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts", &self.pts)
            .field("frame_number", &self.frame_number)
            .field("is_keyframe", &self.is_keyframe)
            .field("data_size", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw() {
        let raw = RawFrame {
            data: vec![7u8; 2 * 2 * 4],
            width: 2,
            height: 2,
            stride: 8,
            pts: None,
            is_keyframe: true,
            pixel_format: PixelFormat::Rgba,
        };
        let frame = VideoFrame::from_raw(raw, 1.25, 37);
        assert_eq!(frame.pts, 1.25);
        assert_eq!(frame.frame_number, 37);
        assert_eq!(frame.data_size(), 16);
        assert!(frame.is_keyframe);
    }

    #[test]
    fn test_expected_size() {
        // 1080p RGBA = 1920 * 1080 * 4 = 8,294,400 bytes
        let size = VideoFrame::expected_size(1920, 1080, PixelFormat::Rgba);
        assert_eq!(size, 8_294_400);

        let size = VideoFrame::expected_size(1920, 1080, PixelFormat::Rgb24);
        assert_eq!(size, 6_220_800);
    }

    #[test]
    fn test_clone_shares_pixels() {
        let frame = VideoFrame::test_frame(0.0, 0);
        let copy = frame.clone();
        assert!(Arc::ptr_eq(&frame.data, &copy.data));
    }
}
