//! Synthetic frame generator.
//!
//! Produces a flat grayscale scene with a bright square that sweeps across
//! the frame during scripted motion windows. Frames are stamped on a
//! regular stream timeline (`origin + n / fps`), so the recording state
//! machines see deterministic time regardless of how fast the generator is
//! drained.

use super::source::{FrameSource, SourceError};
use super::{Frame, PixelFormat};
use std::ops::Range;
use std::time::{Duration, Instant};

/// Luma of the static background.
const BACKGROUND_LUMA: u8 = 40;
/// Luma of the moving block.
const BLOCK_LUMA: u8 = 220;
/// Default side length of the moving block.
const DEFAULT_BLOCK_SIZE: u32 = 40;

/// Deterministic test-pattern source.
#[derive(Debug)]
pub struct SyntheticSource {
    width: u32,
    height: u32,
    fps: u32,
    block_size: u32,
    motion: Vec<Range<u64>>,
    limit: Option<u64>,
    fail_at: Option<u64>,
    pace: bool,
    origin: Instant,
    next_index: u64,
    open: bool,
}

impl SyntheticSource {
    /// Creates an endless, motionless source.
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps,
            block_size: DEFAULT_BLOCK_SIZE,
            motion: Vec::new(),
            limit: None,
            fail_at: None,
            pace: false,
            origin: Instant::now(),
            next_index: 0,
            open: true,
        }
    }

    /// Adds a window of frame indices during which the block is drawn.
    pub fn with_motion(mut self, frames: Range<u64>) -> Self {
        self.motion.push(frames);
        self
    }

    /// Ends the stream after `frames` frames.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    /// Makes the read of frame `index` fail with [`SourceError::ReadFailed`].
    pub fn failing_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Sets the side length of the moving block.
    pub fn with_block_size(mut self, size: u32) -> Self {
        self.block_size = size.max(1);
        self
    }

    /// Sleeps between frames to emulate a live device.
    pub fn paced(mut self, pace: bool) -> Self {
        self.pace = pace;
        self
    }

    /// Returns true while the source has not been closed.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Timeline offset of frame `index`.
    fn offset(&self, index: u64) -> Duration {
        Duration::from_nanos(index * 1_000_000_000 / u64::from(self.fps.max(1)))
    }

    fn in_motion(&self, index: u64) -> bool {
        self.motion.iter().any(|window| window.contains(&index))
    }

    fn render(&self, index: u64) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = vec![BACKGROUND_LUMA; w * h];

        if self.in_motion(index) {
            let block = (self.block_size as usize).min(w).min(h);
            // Sweep by a quarter block per frame so consecutive frames differ
            let travel = (w - block).max(1);
            let x0 = (index as usize * block.div_ceil(4)) % travel;
            let y0 = (h - block) / 2;
            for row in pixels.chunks_exact_mut(w).skip(y0).take(block) {
                row[x0..x0 + block].fill(BLOCK_LUMA);
            }
        }

        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if !self.open {
            return Err(SourceError::NotOpen);
        }

        let index = self.next_index;
        if self.limit.is_some_and(|limit| index >= limit) {
            return Ok(None);
        }
        if self.fail_at == Some(index) {
            return Err(SourceError::ReadFailed(format!(
                "injected failure at frame {index}"
            )));
        }

        let timestamp = self.origin + self.offset(index);
        if self.pace {
            let now = Instant::now();
            if timestamp > now {
                std::thread::sleep(timestamp - now);
            }
        }

        self.next_index += 1;
        Ok(Some(Frame::with_timestamp(
            self.render(index),
            self.width,
            self.height,
            PixelFormat::Gray8,
            index,
            timestamp,
        )))
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn nominal_fps(&self) -> u32 {
        self.fps
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            tracing::info!(frames = self.next_index, "Synthetic source closed");
        }
    }
}
