//! Video sink abstraction.
//!
//! Segment writers do not encode video themselves; they drive an encoder
//! created per segment file by an [`EncoderFactory`].

use crate::capture::Frame;
use crate::config::ConfigError;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which logical stream a writer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Continuous archive.
    Default,
    /// Motion-triggered recording.
    Motion,
}

impl StreamKind {
    /// Lower-case label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Default => "default",
            StreamKind::Motion => "motion",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while opening or writing segment files.
///
/// Fatal to the affected writer, never directly to the pipeline.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("segment {0} already exists")]
    AlreadyExists(PathBuf),
    #[error("failed to create segment {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write segment {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("frame {sequence} is {actual}, stream expects {expected}")]
    FrameMismatch {
        sequence: u64,
        expected: String,
        actual: String,
    },
    #[error("invalid writer configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("segment writer is closed")]
    Closed,
    #[error("segment writer failed earlier and accepts no frames")]
    Failed,
}

/// Stream parameters an encoder is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second, at least 1.
    pub fps: u32,
}

/// An open output file accepting frames.
pub trait VideoEncoder: Send {
    /// Encodes one frame.
    fn encode_frame(&mut self, frame: &Frame) -> Result<(), EncodeError>;

    /// Bytes handed to the output so far, including container overhead.
    fn bytes_written(&self) -> u64;

    /// Bytes `frames` would add to the output if encoded now, in order.
    fn encoded_len(&self, frames: &[Frame]) -> u64 {
        frames.iter().map(|f| f.pixels().len() as u64).sum()
    }

    /// Flushes and closes the output, returning the final byte count.
    fn finalize(self: Box<Self>) -> Result<u64, EncodeError>;
}

/// Creates encoders for new segment files.
///
/// Implementations must refuse to overwrite an existing file and report
/// [`EncodeError::AlreadyExists`] instead.
pub trait EncoderFactory: Send + Sync {
    /// File extension (without the dot) for segments this factory writes.
    fn extension(&self) -> &str;

    /// Creates an encoder writing to `path`.
    fn create(&self, path: &Path, spec: &StreamSpec) -> Result<Box<dyn VideoEncoder>, EncodeError>;
}
