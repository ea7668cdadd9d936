//! Adaptive background model.
//!
//! Keeps a per-pixel exponential moving average of luminance. Slow scene
//! changes (lighting drift) are absorbed into the model while sudden
//! changes stand out in the difference image.

use super::DetectionError;
use crate::capture::{Frame, PixelFormat};

/// Converts a frame to single-channel luminance.
///
/// Colour frames use BT.601 weights, matching what capture stacks call
/// "grayscale".
pub fn to_luma(frame: &Frame) -> Result<Vec<u8>, DetectionError> {
    if !frame.is_valid() {
        return Err(DetectionError::BufferSize {
            expected: frame.expected_len(),
            actual: frame.pixels().len(),
        });
    }

    let pixels = frame.pixels();
    let luma = match frame.format() {
        PixelFormat::Gray8 => pixels.to_vec(),
        PixelFormat::Rgb8 => pixels
            .chunks_exact(3)
            .map(|px| weighted(px[0], px[1], px[2]))
            .collect(),
        PixelFormat::Bgr8 => pixels
            .chunks_exact(3)
            .map(|px| weighted(px[2], px[1], px[0]))
            .collect(),
    };
    Ok(luma)
}

#[inline]
fn weighted(r: u8, g: u8, b: u8) -> u8 {
    // 0.299 R + 0.587 G + 0.114 B in fixed point
    ((299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b) + 500) / 1000) as u8
}

/// Running average of scene luminance.
#[derive(Debug, Clone, Default)]
pub struct BackgroundModel {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl BackgroundModel {
    /// Creates an unseeded model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the model has been seeded.
    pub fn is_seeded(&self) -> bool {
        !self.values.is_empty()
    }

    /// Returns true when the model was seeded at these dimensions.
    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.is_seeded() && self.width == width && self.height == height
    }

    /// Replaces the model with the given luminance image.
    pub fn seed(&mut self, luma: &[u8], width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.values = luma.iter().map(|&v| f32::from(v)).collect();
    }

    /// Absolute difference between `luma` and the model.
    ///
    /// The model is rounded and saturated to 8 bits before differencing.
    pub fn difference(&self, luma: &[u8]) -> Vec<u8> {
        luma.iter()
            .zip(&self.values)
            .map(|(&l, &bg)| l.abs_diff(bg.round().clamp(0.0, 255.0) as u8))
            .collect()
    }

    /// Blends `luma` into the model: `bg = (1 - weight) * bg + weight * luma`.
    pub fn update(&mut self, luma: &[u8], weight: f32) {
        let keep = 1.0 - weight;
        for (bg, &l) in self.values.iter_mut().zip(luma) {
            *bg = keep * *bg + weight * f32::from(l);
        }
    }

    /// Drops the model; the next frame reseeds it.
    pub fn reset(&mut self) {
        self.values.clear();
        self.width = 0;
        self.height = 0;
    }

    /// Model value at a pixel index, for inspection.
    pub fn value(&self, index: usize) -> Option<f32> {
        self.values.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gray_passthrough() {
        let frame = Frame::gray(vec![1, 2, 3, 4], 2, 2, 0);
        assert_eq!(to_luma(&frame).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_bgr_and_rgb_agree() {
        let rgb = Frame::new(vec![255, 0, 0], 1, 1, PixelFormat::Rgb8, 0);
        let bgr = Frame::new(vec![0, 0, 255], 1, 1, PixelFormat::Bgr8, 0);
        assert_eq!(to_luma(&rgb).unwrap(), vec![76]);
        assert_eq!(to_luma(&bgr).unwrap(), vec![76]);

        let white = Frame::new(vec![255; 3], 1, 1, PixelFormat::Rgb8, 0);
        assert_eq!(to_luma(&white).unwrap(), vec![255]);
    }

    #[test]
    fn test_bad_buffer_rejected() {
        let frame = Frame::new(vec![0; 5], 2, 2, PixelFormat::Rgb8, 0);
        assert!(matches!(
            to_luma(&frame),
            Err(DetectionError::BufferSize {
                expected: 12,
                actual: 5
            })
        ));
    }

    #[test]
    fn test_update_is_weighted_average() {
        let mut model = BackgroundModel::new();
        model.seed(&[100, 100], 2, 1);
        model.update(&[200, 100], 0.6);

        assert!((model.value(0).unwrap() - 160.0).abs() < 1e-4);
        assert!((model.value(1).unwrap() - 100.0).abs() < 1e-4);
        assert_eq!(model.difference(&[160, 90]), vec![0, 10]);
    }

    #[test]
    fn test_matches_dimensions() {
        let mut model = BackgroundModel::new();
        assert!(!model.matches(2, 2));
        model.seed(&[0; 4], 2, 2);
        assert!(model.matches(2, 2));
        assert!(!model.matches(4, 1));
        model.reset();
        assert!(!model.is_seeded());
    }
}
