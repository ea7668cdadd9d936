//! Frame sources and frame handling.
//!
//! This module provides the [`FrameSource`] abstraction the pipeline
//! consumes, the [`Frame`] type that flows through it, and the concrete
//! sources: a synthetic generator, a YUV4MPEG2 file replayer and, with the
//! `camera` feature, live devices through `nokhwa`.

#[cfg(feature = "camera")]
mod camera;
mod frame;
mod source;
mod synthetic;
mod y4m;

#[cfg(feature = "camera")]
pub use camera::CameraSource;
pub use frame::{Frame, PixelFormat};
pub use source::{effective_fps, open_source, FrameSource, SourceError, SourceKind, DEFAULT_FPS};
pub use synthetic::SyntheticSource;
pub use y4m::Y4mSource;
