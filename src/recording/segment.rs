//! Size- and duration-bounded segment writer.
//!
//! A [`SegmentWriter`] owns at most one open segment file. After every
//! write it checks the segment's budgets (duration first, then size) and,
//! when one is met, finalizes the file. The next file is opened by the next
//! write, so a stream never leaves an empty trailing segment behind.
//!
//! Buffered frames count toward the size budget, so batched and immediate
//! writers rotate at the same frame.

use super::encoder::{EncodeError, EncoderFactory, StreamKind, StreamSpec, VideoEncoder};
use super::naming::PathTemplate;
use crate::capture::Frame;
use crate::config::{BufferMode, ConfigError, RecordingConfig};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How many successive indices are tried when a segment path is taken.
const MAX_NAME_ATTEMPTS: u32 = 16;

/// Geometry, rate and budgets of one writer.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Stream frame rate; clamped to at least 1.
    pub fps: u32,
    /// Rotate once a segment spans this long. `None` disables.
    pub max_duration: Option<Duration>,
    /// Rotate once a segment reaches this many bytes. `None` disables.
    pub max_size: Option<u64>,
    /// Encoder hand-off strategy.
    pub buffering: BufferMode,
}

impl SegmentConfig {
    /// Builds a writer configuration from the recording section and the
    /// source geometry.
    pub fn from_recording(recording: &RecordingConfig, width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps: fps.max(1),
            max_duration: recording.max_duration(),
            max_size: recording.max_size_bytes,
            buffering: recording.buffering,
        }
    }

    /// Validates geometry and budgets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.max_duration == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidRotationBudget("max_duration"));
        }
        if self.max_size == Some(0) {
            return Err(ConfigError::InvalidRotationBudget("max_size"));
        }
        Ok(())
    }

    fn stream_spec(&self) -> StreamSpec {
        StreamSpec {
            width: self.width,
            height: self.height,
            fps: self.fps.max(1),
        }
    }
}

/// Why a segment was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Duration budget reached.
    Duration,
    /// Size budget reached.
    Size,
    /// Writer closed by its owner.
    Closed,
    /// Writer failed while the segment was open.
    Failed,
}

/// A finished segment.
#[derive(Debug, Clone)]
pub struct SegmentSummary {
    /// File the segment was written to.
    pub path: PathBuf,
    /// Wall-clock time the file was opened.
    pub opened_at: DateTime<Local>,
    /// Frames written into the file.
    pub frames: u64,
    /// Encoded size in bytes.
    pub bytes: u64,
    /// Timeline distance between the first and last frame.
    pub span: Duration,
    /// What ended the segment.
    pub reason: CloseReason,
}

/// Lifecycle of a writer. `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Created; no file opened yet.
    Ready,
    /// A segment file is open.
    Open,
    /// Closed by its owner.
    Closed,
    /// An encoder error stopped the writer.
    Failed,
}

struct OpenSegment {
    path: PathBuf,
    encoder: Box<dyn VideoEncoder>,
    opened_at: DateTime<Local>,
    first_ts: Option<Instant>,
    last_ts: Option<Instant>,
    frames: u64,
    pending: Vec<Frame>,
    /// Encoded size of `pending`.
    pending_bytes: u64,
}

impl OpenSegment {
    fn span(&self) -> Duration {
        match (self.first_ts, self.last_ts) {
            (Some(first), Some(last)) => last.saturating_duration_since(first),
            _ => Duration::ZERO,
        }
    }

    fn flush(&mut self) -> Result<(), EncodeError> {
        for frame in self.pending.drain(..) {
            self.encoder.encode_frame(&frame)?;
        }
        self.pending_bytes = 0;
        Ok(())
    }

    /// Size of the file once buffered frames are encoded.
    fn projected_bytes(&self) -> u64 {
        self.encoder.bytes_written() + self.pending_bytes
    }

    fn finish(mut self, reason: CloseReason) -> Result<SegmentSummary, EncodeError> {
        self.flush()?;
        let span = self.span();
        let bytes = self.encoder.finalize()?;
        Ok(SegmentSummary {
            path: self.path,
            opened_at: self.opened_at,
            frames: self.frames,
            bytes,
            span,
            reason,
        })
    }

    /// Best-effort release after an error; pending frames are discarded.
    fn abandon(self) -> SegmentSummary {
        let span = self.span();
        let bytes = self.encoder.bytes_written();
        if let Err(e) = self.encoder.finalize() {
            tracing::debug!(path = %self.path.display(), error = %e, "Finalize after failure also failed");
        }
        SegmentSummary {
            path: self.path,
            opened_at: self.opened_at,
            frames: self.frames,
            bytes,
            span,
            reason: CloseReason::Failed,
        }
    }
}

/// Writes frames into a sequence of bounded segment files.
///
/// Owned and mutated by a single thread.
pub struct SegmentWriter {
    stream: StreamKind,
    config: SegmentConfig,
    template: PathTemplate,
    factory: Arc<dyn EncoderFactory>,
    state: WriterState,
    current: Option<OpenSegment>,
    index: u32,
    completed: Vec<SegmentSummary>,
    frames_written: u64,
}

impl SegmentWriter {
    /// Creates a writer. No file is opened until [`open`](Self::open) or
    /// the first [`write`](Self::write).
    pub fn new(
        stream: StreamKind,
        config: SegmentConfig,
        template: PathTemplate,
        factory: Arc<dyn EncoderFactory>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            stream,
            config: SegmentConfig {
                fps: config.fps.max(1),
                ..config
            },
            template,
            factory,
            state: WriterState::Ready,
            current: None,
            index: 0,
            completed: Vec::new(),
            frames_written: 0,
        })
    }

    /// Opens a segment and returns its path.
    ///
    /// Returns the current path when a segment is already open.
    pub fn open(&mut self) -> Result<PathBuf, EncodeError> {
        match self.state {
            WriterState::Open => {
                if let Some(path) = self.current_path() {
                    return Ok(path.to_path_buf());
                }
                let opened = self.open_segment();
                if let Err(e) = &opened {
                    self.fail(e);
                }
                opened
            }
            WriterState::Closed => Err(EncodeError::Closed),
            WriterState::Failed => Err(EncodeError::Failed),
            WriterState::Ready => match self.open_segment() {
                Ok(path) => {
                    self.state = WriterState::Open;
                    Ok(path)
                }
                Err(e) => {
                    self.fail(&e);
                    Err(e)
                }
            },
        }
    }

    /// Writes a frame, rotating afterwards if a budget was reached.
    pub fn write(&mut self, frame: &Frame) -> Result<(), EncodeError> {
        match self.state {
            WriterState::Ready => {
                self.open()?;
            }
            WriterState::Open => {}
            WriterState::Closed => return Err(EncodeError::Closed),
            WriterState::Failed => return Err(EncodeError::Failed),
        }

        if let Err(e) = self.write_and_rotate(frame) {
            self.fail(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Closes the open segment. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<Option<SegmentSummary>, EncodeError> {
        match self.state {
            WriterState::Closed | WriterState::Failed => Ok(None),
            WriterState::Ready => {
                self.state = WriterState::Closed;
                Ok(None)
            }
            WriterState::Open => {
                let Some(segment) = self.current.take() else {
                    self.state = WriterState::Closed;
                    return Ok(None);
                };
                match segment.finish(CloseReason::Closed) {
                    Ok(summary) => {
                        self.state = WriterState::Closed;
                        tracing::info!(
                            stream = %self.stream,
                            path = %summary.path.display(),
                            frames = summary.frames,
                            bytes = summary.bytes,
                            "Segment closed"
                        );
                        self.completed.push(summary.clone());
                        Ok(Some(summary))
                    }
                    Err(e) => {
                        self.state = WriterState::Failed;
                        tracing::error!(stream = %self.stream, error = %e, "Failed to close segment");
                        Err(e)
                    }
                }
            }
        }
    }

    fn write_and_rotate(&mut self, frame: &Frame) -> Result<(), EncodeError> {
        let batch = self.config.fps as usize;
        if self.current.is_none() {
            self.open_segment()?;
        }
        let segment = self.current.as_mut().ok_or(EncodeError::Closed)?;

        let ts = frame.timestamp();
        segment.first_ts.get_or_insert(ts);
        segment.last_ts = Some(ts);
        segment.frames += 1;
        self.frames_written += 1;

        match self.config.buffering {
            BufferMode::Immediate => segment.encoder.encode_frame(frame)?,
            BufferMode::Batched => {
                segment.pending.push(frame.clone());
                if segment.pending.len() >= batch {
                    segment.flush()?;
                } else {
                    segment.pending_bytes = segment.encoder.encoded_len(&segment.pending);
                }
            }
        }

        if let Some(reason) = self.rotation_due() {
            self.rotate(reason)?;
        }
        Ok(())
    }

    fn rotation_due(&self) -> Option<CloseReason> {
        let segment = self.current.as_ref()?;

        if let Some(max) = self.config.max_duration {
            if segment.span() >= max {
                return Some(CloseReason::Duration);
            }
        }
        if let Some(max) = self.config.max_size {
            if segment.projected_bytes() >= max {
                return Some(CloseReason::Size);
            }
        }
        None
    }

    fn rotate(&mut self, reason: CloseReason) -> Result<(), EncodeError> {
        let Some(segment) = self.current.take() else {
            return Ok(());
        };
        let summary = segment.finish(reason)?;
        tracing::info!(
            stream = %self.stream,
            path = %summary.path.display(),
            frames = summary.frames,
            bytes = summary.bytes,
            span_ms = summary.span.as_millis() as u64,
            reason = ?reason,
            "Segment rotated"
        );
        self.completed.push(summary);
        self.index += 1;
        Ok(())
    }

    fn open_segment(&mut self) -> Result<PathBuf, EncodeError> {
        let dir = self.template.dir().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| EncodeError::Create {
            path: dir.clone(),
            source,
        })?;

        let spec = self.config.stream_spec();
        let mut attempts = 0;
        loop {
            let path = self.template.path(self.index);
            match self.factory.create(&path, &spec) {
                Ok(encoder) => {
                    tracing::info!(
                        stream = %self.stream,
                        path = %path.display(),
                        index = self.index,
                        "Segment opened"
                    );
                    self.current = Some(OpenSegment {
                        path: path.clone(),
                        encoder,
                        opened_at: Local::now(),
                        first_ts: None,
                        last_ts: None,
                        frames: 0,
                        pending: Vec::new(),
                        pending_bytes: 0,
                    });
                    return Ok(path);
                }
                Err(EncodeError::AlreadyExists(taken)) if attempts + 1 < MAX_NAME_ATTEMPTS => {
                    tracing::debug!(path = %taken.display(), "Segment path taken; trying next index");
                    attempts += 1;
                    self.index += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fail(&mut self, error: &EncodeError) {
        self.state = WriterState::Failed;
        tracing::error!(stream = %self.stream, error = %error, "Segment writer failed");
        if let Some(segment) = self.current.take() {
            self.completed.push(segment.abandon());
        }
    }

    /// Stream this writer records.
    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Path of the open segment, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|s| s.path.as_path())
    }

    /// Index of the open (or next) segment.
    pub fn segment_index(&self) -> u32 {
        self.index
    }

    /// Bytes handed to the current segment's encoder, excluding frames
    /// still buffered.
    pub fn current_bytes(&self) -> u64 {
        self.current
            .as_ref()
            .map_or(0, |s| s.encoder.bytes_written())
    }

    /// Frames accepted over the writer's lifetime.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Segments finished so far, oldest first.
    pub fn completed_segments(&self) -> &[SegmentSummary] {
        &self.completed
    }

    /// Moves the finished-segment summaries out of the writer.
    pub fn take_completed(&mut self) -> Vec<SegmentSummary> {
        std::mem::take(&mut self.completed)
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if self.state == WriterState::Open {
            if let Err(e) = self.close() {
                tracing::warn!(stream = %self.stream, error = %e, "Segment close on drop failed");
            }
        }
    }
}
