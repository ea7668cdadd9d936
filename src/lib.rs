//! Motion Sentry Library
//!
//! Continuous video archiving with motion-triggered recordings and
//! throttled operator notification.
//!
//! # Architecture
//!
//! A run splits work between a capture thread and a processing thread:
//!
//! ```text
//! capture → queue → detection → motion sessions → motion segments
//!                       ↓              ↓
//!                    archive      notification
//! ```
//!
//! # Design Principles
//!
//! - **Capture never blocks**: a full queue drops the newest frame
//! - **Frame time, not wall time**: durations and cooldowns use frame timestamps
//! - **Ordered shutdown**: queued frames are drained before writers close
//! - **Notifications never stop recording**: dispatch failures are logged and retried
//!
//! # Example
//!
//! ```no_run
//! use motion_sentry::{
//!     capture::SyntheticSource,
//!     config::MonitorConfig,
//!     notify::LogNotifier,
//!     pipeline::{Pipeline, PipelineConfig},
//!     recording::Y4mEncoderFactory,
//! };
//! use std::sync::Arc;
//!
//! let config = MonitorConfig::default();
//! let pipeline = Pipeline::new(
//!     PipelineConfig::from(&config),
//!     Arc::new(Y4mEncoderFactory),
//!     Box::new(LogNotifier),
//! )
//! .unwrap();
//!
//! let source = SyntheticSource::new(320, 240, 15)
//!     .with_motion(30..60)
//!     .with_limit(300);
//!
//! let report = pipeline.run(source).unwrap();
//! println!("{} motion sessions", report.processing.sessions_started);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod config;
pub mod detection;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod recording;
pub mod y4m;

// Re-export commonly used types at crate root
pub use capture::{open_source, Frame, FrameSource, SourceError, SyntheticSource, Y4mSource};
pub use config::{ConfigError, MonitorConfig};
pub use detection::{Detection, MotionDetector};
pub use notify::{build_notifier, DispatchError, NotificationThrottle, Notifier};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, PipelineReport, StopHandle};
pub use recording::{EncoderFactory, MotionSessionController, SegmentWriter, Y4mEncoderFactory};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
