//! Background-subtraction motion detection.
//!
//! Each frame is reduced to luminance and compared against an adaptive
//! background model:
//!
//! ```text
//! luma → |luma - background| → threshold → dilate → components → filter
//!                                                         ↓
//!                                                 background update
//! ```
//!
//! A connected region counts as motion only when its bounding box is both
//! wide enough and large enough; this suppresses sensor noise and flicker.
//! Detection never fails the pipeline: a frame that cannot be analysed is
//! logged and treated as motionless.

mod background;
mod regions;

pub use background::{to_luma, BackgroundModel};
pub use regions::{binarize, components, dilate, BoundingBox};

use crate::capture::Frame;
use crate::config::{ConfigError, DetectionConfig};
use thiserror::Error;

/// Per-frame analysis failures. Always recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectionError {
    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("frame has zero area")]
    EmptyFrame,
}

/// Outcome of analysing one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    /// True when at least one region qualified.
    pub motion: bool,
    /// Qualifying regions, for visualisation.
    pub regions: Vec<BoundingBox>,
}

impl Detection {
    /// A motionless result.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Detects motion against a running background model.
///
/// Owned and driven by a single thread; the background model is never
/// shared.
pub struct MotionDetector {
    config: DetectionConfig,
    background: BackgroundModel,
    frames_analyzed: u64,
    error_count: u64,
}

impl MotionDetector {
    /// Creates a detector after validating its tuning.
    pub fn new(config: DetectionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            background: BackgroundModel::new(),
            frames_analyzed: 0,
            error_count: 0,
        })
    }

    /// Analyses a frame, treating any failure as "no motion".
    pub fn detect(&mut self, frame: &Frame) -> Detection {
        match self.try_detect(frame) {
            Ok(detection) => detection,
            Err(e) => {
                self.error_count += 1;
                tracing::warn!(
                    sequence = frame.sequence(),
                    error = %e,
                    "Motion detection failed; treating frame as motionless"
                );
                Detection::none()
            }
        }
    }

    /// Analyses a frame, surfacing failures.
    ///
    /// The first frame (and the first frame after a resolution change)
    /// seeds the background and never reports motion.
    pub fn try_detect(&mut self, frame: &Frame) -> Result<Detection, DetectionError> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Err(DetectionError::EmptyFrame);
        }

        let luma = to_luma(frame)?;
        self.frames_analyzed += 1;

        if !self.background.matches(width, height) {
            if self.background.is_seeded() {
                tracing::info!(width, height, "Frame size changed; reseeding background");
            }
            self.background.seed(&luma, width, height);
            return Ok(Detection::none());
        }

        let (w, h) = (width as usize, height as usize);
        let diff = self.background.difference(&luma);
        let mask = binarize(&diff, self.config.threshold);
        let mask = dilate(&mask, w, h, self.config.dilate_iterations);

        let regions: Vec<BoundingBox> = components(&mask, w, h)
            .into_iter()
            .filter(|b| self.qualifies(b))
            .collect();

        self.background.update(&luma, self.config.background_weight);

        if !regions.is_empty() {
            tracing::trace!(
                sequence = frame.sequence(),
                regions = regions.len(),
                "Motion regions detected"
            );
        }

        Ok(Detection {
            motion: !regions.is_empty(),
            regions,
        })
    }

    fn qualifies(&self, region: &BoundingBox) -> bool {
        region.width >= self.config.min_box_width
            && region.area() >= u64::from(self.config.min_box_area)
    }

    /// Returns the background model.
    pub fn background(&self) -> &BackgroundModel {
        &self.background
    }

    /// Frames successfully converted and analysed.
    pub fn frames_analyzed(&self) -> u64 {
        self.frames_analyzed
    }

    /// Frames that failed analysis.
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Forgets the background; the next frame reseeds it.
    pub fn reset(&mut self) {
        self.background.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;

    const W: u32 = 160;
    const H: u32 = 120;

    fn flat(value: u8, seq: u64) -> Frame {
        Frame::gray(vec![value; (W * H) as usize], W, H, seq)
    }

    fn with_block(base: u8, value: u8, x0: u32, y0: u32, size: u32, seq: u64) -> Frame {
        let mut pixels = vec![base; (W * H) as usize];
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                pixels[(y * W + x) as usize] = value;
            }
        }
        Frame::gray(pixels, W, H, seq)
    }

    fn detector() -> MotionDetector {
        MotionDetector::new(DetectionConfig::default()).unwrap()
    }

    #[test]
    fn test_first_frame_seeds_without_motion() {
        let mut detector = detector();
        let result = detector.detect(&with_block(50, 250, 10, 10, 40, 0));

        assert!(!result.motion);
        assert!(detector.background().is_seeded());
    }

    #[test]
    fn test_sudden_block_is_motion() {
        let mut detector = detector();

        for seq in 0..10 {
            assert!(!detector.detect(&flat(50, seq)).motion, "frame {seq}");
        }

        let result = detector.detect(&with_block(50, 200, 60, 40, 40, 10));
        assert!(result.motion);
        assert_eq!(result.regions.len(), 1);

        let region = result.regions[0];
        // Two dilation passes grow the block by two pixels per side
        assert_eq!((region.x, region.y), (58, 38));
        assert_eq!((region.width, region.height), (44, 44));
    }

    #[test]
    fn test_small_flicker_is_ignored() {
        let mut detector = detector();
        detector.detect(&flat(50, 0));

        // 8x8 blob: dilated to 12x12, narrower than 30px
        let result = detector.detect(&with_block(50, 200, 20, 20, 8, 1));
        assert!(!result.motion);
        assert!(result.regions.is_empty());
    }

    #[test]
    fn test_wide_but_thin_region_fails_area() {
        let mut detector = MotionDetector::new(DetectionConfig {
            dilate_iterations: 0,
            ..Default::default()
        })
        .unwrap();
        detector.detect(&flat(50, 0));

        let mut pixels = vec![50u8; (W * H) as usize];
        for x in 10..110 {
            pixels[(60 * W + x) as usize] = 200;
        }
        let result = detector.detect(&Frame::gray(pixels, W, H, 1));
        assert!(!result.motion); // 100x1 box: area 100 < 1000
    }

    #[test]
    fn test_below_threshold_change_ignored() {
        let mut at_threshold = detector();
        at_threshold.detect(&flat(50, 0));
        assert!(!at_threshold.detect(&flat(60, 1)).motion);

        let mut above_threshold = detector();
        above_threshold.detect(&flat(50, 0));
        assert!(above_threshold.detect(&flat(61, 1)).motion);
    }

    #[test]
    fn test_bad_frame_is_not_fatal() {
        let mut detector = detector();
        detector.detect(&flat(50, 0));

        let broken = Frame::new(vec![0u8; 10], W, H, PixelFormat::Rgb8, 1);
        let result = detector.detect(&broken);

        assert!(!result.motion);
        assert_eq!(detector.error_count(), 1);
        assert!(matches!(
            detector.try_detect(&broken),
            Err(DetectionError::BufferSize { .. })
        ));

        // The model is untouched and detection continues
        assert!(!detector.detect(&flat(50, 2)).motion);
    }

    #[test]
    fn test_resolution_change_reseeds() {
        let mut detector = detector();
        detector.detect(&flat(50, 0));

        let small = Frame::gray(vec![200u8; 64 * 48], 64, 48, 1);
        assert!(!detector.detect(&small).motion);
        assert!(detector.background().matches(64, 48));
    }

    #[test]
    fn test_background_absorbs_static_change() {
        let mut detector = detector();
        detector.detect(&flat(50, 0));

        let changed = with_block(50, 200, 60, 40, 40, 1);
        assert!(detector.detect(&changed).motion);

        // A block that stays put fades into the background
        let mut still_moving = true;
        for seq in 2..12 {
            still_moving = detector.detect(&with_block(50, 200, 60, 40, 40, seq)).motion;
        }
        assert!(!still_moving);
    }

    #[test]
    fn test_invalid_weight_rejected() {
        let result = MotionDetector::new(DetectionConfig {
            background_weight: 0.0,
            ..Default::default()
        });
        assert!(matches!(result, Err(ConfigError::InvalidBackgroundWeight(_))));
    }
}
