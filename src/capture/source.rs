//! Frame source abstraction.
//!
//! The pipeline consumes any [`FrameSource`]: a live camera, a replayed
//! file, or the synthetic generator used by tests and the demo.

use super::Frame;
use crate::config::SourceConfig;
use thiserror::Error;

/// Substituted when a source reports a nominal frame rate of 0.
pub const DEFAULT_FPS: u32 = 30;

/// Errors that can occur while opening or reading a source.
///
/// Any of these ending the stream is fatal to the pipeline.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open source {identifier}: {reason}")]
    OpenFailed { identifier: String, reason: String },
    #[error("unrecognised source identifier: {0}")]
    UnknownIdentifier(String),
    #[error("failed to read frame: {0}")]
    ReadFailed(String),
    #[error("source not opened")]
    NotOpen,
    #[error("unsupported source: {0}")]
    Unsupported(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A producer of raw frames.
///
/// Sources are opened by their constructors and owned by the capture
/// thread for the duration of a run. Implementations must also release
/// their underlying handle on `Drop`; `close` is the explicit path the
/// orchestrator takes at shutdown.
pub trait FrameSource: Send {
    /// Reads the next frame. `Ok(None)` signals end of stream.
    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Frame width in pixels.
    fn width(&self) -> u32;

    /// Frame height in pixels.
    fn height(&self) -> u32;

    /// Nominal frame rate as reported by the device or container.
    /// May be 0 when unknown.
    fn nominal_fps(&self) -> u32;

    /// Releases the underlying device or file. Must be idempotent.
    fn close(&mut self);

    /// Nominal frame rate with the unknown case replaced by [`DEFAULT_FPS`].
    fn effective_fps(&self) -> u32 {
        effective_fps(self.nominal_fps(), DEFAULT_FPS)
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        (**self).read_frame()
    }

    fn width(&self) -> u32 {
        (**self).width()
    }

    fn height(&self) -> u32 {
        (**self).height()
    }

    fn nominal_fps(&self) -> u32 {
        (**self).nominal_fps()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn effective_fps(&self) -> u32 {
        (**self).effective_fps()
    }
}

/// Returns `nominal`, or `fallback` (itself at least 1) when `nominal` is 0.
pub fn effective_fps(nominal: u32, fallback: u32) -> u32 {
    if nominal == 0 {
        fallback.max(1)
    } else {
        nominal
    }
}

/// Parsed form of a source identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Camera device by index.
    Camera(u32),
    /// YUV4MPEG2 file on disk.
    Y4mFile(std::path::PathBuf),
    /// Synthetic generator with optional `WxH` dimensions.
    Synthetic { width: u32, height: u32 },
}

impl SourceKind {
    /// Interprets an identifier string.
    ///
    /// Decimal numbers are device indices, `*.y4m` paths are files and
    /// `synthetic` / `synthetic:WxH` selects the generator.
    pub fn parse(identifier: &str) -> Result<Self, SourceError> {
        let trimmed = identifier.trim();

        if let Ok(index) = trimmed.parse::<u32>() {
            return Ok(SourceKind::Camera(index));
        }

        if let Some(rest) = trimmed.strip_prefix("synthetic") {
            let (width, height) = match rest.strip_prefix(':') {
                None if rest.is_empty() => (320, 240),
                Some(dims) => parse_dimensions(dims)
                    .ok_or_else(|| SourceError::UnknownIdentifier(identifier.to_string()))?,
                None => return Err(SourceError::UnknownIdentifier(identifier.to_string())),
            };
            return Ok(SourceKind::Synthetic { width, height });
        }

        if trimmed.to_ascii_lowercase().ends_with(".y4m") {
            return Ok(SourceKind::Y4mFile(trimmed.into()));
        }

        Err(SourceError::UnknownIdentifier(identifier.to_string()))
    }
}

fn parse_dimensions(dims: &str) -> Option<(u32, u32)> {
    let (w, h) = dims.split_once('x')?;
    let width = w.parse().ok()?;
    let height = h.parse().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

/// Opens the source named by `config.identifier`.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>, SourceError> {
    let kind = SourceKind::parse(&config.identifier)?;
    tracing::info!(identifier = %config.identifier, ?kind, "Opening frame source");

    match kind {
        SourceKind::Synthetic { width, height } => Ok(Box::new(
            super::SyntheticSource::new(width, height, config.fallback_fps).paced(config.pace),
        )),
        SourceKind::Y4mFile(path) => Ok(Box::new(
            super::Y4mSource::open(&path, config.fallback_fps)?.paced(config.pace),
        )),
        SourceKind::Camera(index) => open_camera(index),
    }
}

#[cfg(feature = "camera")]
fn open_camera(index: u32) -> Result<Box<dyn FrameSource>, SourceError> {
    Ok(Box::new(super::CameraSource::open(index)?))
}

#[cfg(not(feature = "camera"))]
fn open_camera(index: u32) -> Result<Box<dyn FrameSource>, SourceError> {
    Err(SourceError::Unsupported(format!(
        "camera device {index}: rebuild with `--features camera`"
    )))
}
