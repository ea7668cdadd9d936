//! Segment recording.
//!
//! Two streams are written from the same frames:
//! - the continuous archive, one [`SegmentWriter`] for the whole run
//! - motion recordings, a [`SegmentWriter`] per motion session managed by
//!   the [`MotionSessionController`]
//!
//! Encoding is delegated to an [`EncoderFactory`]; the crate ships a
//! YUV4MPEG2 implementation.

mod encoder;
mod naming;
mod segment;
mod session;
mod y4m;

pub use encoder::{EncodeError, EncoderFactory, StreamKind, StreamSpec, VideoEncoder};
pub use naming::{PathTemplate, MOTION_PREFIX, TIMESTAMP_FORMAT};
pub use segment::{CloseReason, SegmentConfig, SegmentSummary, SegmentWriter, WriterState};
pub use session::{MotionSessionController, SessionEvent, SessionSummary};
pub use y4m::{Y4mEncoder, Y4mEncoderFactory};
