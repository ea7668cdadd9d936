//! Frame type representing a captured image with metadata.

use std::sync::Arc;
use std::time::Instant;

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Single-channel 8-bit luminance.
    Gray8,
    /// Packed 8-bit RGB.
    Rgb8,
    /// Packed 8-bit BGR (OpenCV/V4L2 native order).
    Bgr8,
}

impl PixelFormat {
    /// Bytes per pixel for this layout.
    #[inline]
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }
}

/// A single captured frame.
///
/// The pixel buffer is shared (`Arc`) so that the default and motion
/// streams can both hold on to a frame without copying it. A frame is
/// immutable once constructed.
#[derive(Clone)]
pub struct Frame {
    /// Raw pixel data, row-major, tightly packed.
    pixels: Arc<[u8]>,
    /// Frame width in pixels.
    width: u32,
    /// Frame height in pixels.
    height: u32,
    /// Layout of `pixels`.
    format: PixelFormat,
    /// Capture timestamp. All segment and session timing is derived from it.
    timestamp: Instant,
    /// Monotonic sequence number assigned by the source.
    sequence: u64,
}

impl Frame {
    /// Creates a new frame stamped with the current instant.
    pub fn new(
        pixels: impl Into<Arc<[u8]>>,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
    ) -> Self {
        Self::with_timestamp(pixels, width, height, format, sequence, Instant::now())
    }

    /// Creates a frame with an explicit capture timestamp.
    ///
    /// Replayed and synthetic sources use this to lay frames out on the
    /// stream timeline rather than on the wall clock.
    pub fn with_timestamp(
        pixels: impl Into<Arc<[u8]>>,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
        timestamp: Instant,
    ) -> Self {
        Self {
            pixels: pixels.into(),
            width,
            height,
            format,
            timestamp,
            sequence,
        }
    }

    /// Creates a grayscale frame.
    pub fn gray(pixels: impl Into<Arc<[u8]>>, width: u32, height: u32, sequence: u64) -> Self {
        Self::new(pixels, width, height, PixelFormat::Gray8, sequence)
    }

    /// Returns a reference to the raw pixel data.
    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Returns the frame width.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the frame height.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the pixel layout.
    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Returns the capture timestamp.
    #[inline]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Returns the sequence number.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the total number of pixels (width * height).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Expected buffer length for the frame's dimensions and format.
    #[inline]
    pub fn expected_len(&self) -> usize {
        self.pixel_count() * self.format.channels()
    }

    /// Validates that the pixel buffer size matches dimensions.
    pub fn is_valid(&self) -> bool {
        self.pixels.len() == self.expected_len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("sequence", &self.sequence)
            .field("pixel_bytes", &self.pixels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let frame = Frame::gray(vec![0u8; 640 * 480], 640, 480, 1);

        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 480);
        assert_eq!(frame.sequence(), 1);
        assert_eq!(frame.format(), PixelFormat::Gray8);
        assert!(frame.is_valid());
    }

    #[test]
    fn test_frame_invalid_size() {
        let frame = Frame::gray(vec![0u8; 100], 640, 480, 1); // Wrong size
        assert!(!frame.is_valid());
    }

    #[test]
    fn test_colour_frame_expects_three_channels() {
        let frame = Frame::new(vec![0u8; 4 * 4 * 3], 4, 4, PixelFormat::Bgr8, 0);
        assert_eq!(frame.expected_len(), 48);
        assert!(frame.is_valid());
    }

    #[test]
    fn test_clone_shares_buffer() {
        let frame = Frame::gray(vec![7u8; 16], 4, 4, 3);
        let copy = frame.clone();
        assert!(std::ptr::eq(frame.pixels().as_ptr(), copy.pixels().as_ptr()));
    }
}
