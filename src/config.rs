//! Monitor configuration.
//!
//! A single [`MonitorConfig`] is loaded once (from TOML or defaults) and
//! handed by reference to each component constructor. Nothing in the crate
//! reads configuration from global state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("invalid rotation budget: {0} must be greater than zero")]
    InvalidRotationBudget(&'static str),
    #[error("invalid background weight {0} (must be strictly between 0 and 1)")]
    InvalidBackgroundWeight(f32),
    #[error("invalid queue capacity (must be at least 1)")]
    InvalidQueueCapacity,
    #[error("invalid poll interval (must be at least 1ms)")]
    InvalidPollInterval,
    #[error("unknown notification method {0:?}")]
    UnknownNotifier(String),
    #[error("notification method {backend} requires {field}")]
    MissingNotifierSetting {
        backend: &'static str,
        field: &'static str,
    },
    #[error("notification method {0} was not compiled in")]
    NotifierUnavailable(&'static str),
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
    #[error("failed to serialize config: {0}")]
    SerializeError(String),
}

/// Source used when none is configured.
#[cfg(feature = "camera")]
pub const DEFAULT_SOURCE: &str = "0";
/// Source used when none is configured.
#[cfg(not(feature = "camera"))]
pub const DEFAULT_SOURCE: &str = "synthetic";

/// Frame source selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Device index, `.y4m` path or `synthetic[:WxH]`.
    ///
    /// Defaults to camera `0` when built with the `camera` feature and to
    /// the synthetic scene otherwise.
    pub identifier: String,
    /// Frame rate assumed when the source reports none.
    pub fallback_fps: u32,
    /// Replay files and synthetic streams in real time.
    pub pace: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            identifier: DEFAULT_SOURCE.into(),
            fallback_fps: 30,
            pace: true,
        }
    }
}

/// How a segment writer hands frames to its encoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferMode {
    /// Encode every frame as it is written.
    #[default]
    Immediate,
    /// Collect one second of frames and encode them together.
    Batched,
}

/// Segment output and rotation budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Directory for the continuous archive.
    pub output_dir: PathBuf,
    /// Directory for motion recordings.
    pub motion_dir: PathBuf,
    /// Rotate a segment once it spans this many seconds. `None` disables.
    pub max_duration_secs: Option<u64>,
    /// Rotate a segment once it reaches this many bytes. `None` disables.
    pub max_size_bytes: Option<u64>,
    /// Encoder hand-off strategy.
    pub buffering: BufferMode,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            motion_dir: PathBuf::from("motion-detected"),
            max_duration_secs: Some(30 * 60),
            max_size_bytes: Some(100 * 1024 * 1024),
            buffering: BufferMode::Immediate,
        }
    }
}

impl RecordingConfig {
    /// Validates the rotation budgets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_duration_secs == Some(0) {
            return Err(ConfigError::InvalidRotationBudget("max_duration_secs"));
        }
        if self.max_size_bytes == Some(0) {
            return Err(ConfigError::InvalidRotationBudget("max_size_bytes"));
        }
        Ok(())
    }

    /// Duration budget as a [`Duration`].
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }
}

/// Motion detector tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Per-pixel luminance difference above which a pixel is foreground.
    pub threshold: u8,
    /// Minimum bounding-box width for a region to count as motion.
    pub min_box_width: u32,
    /// Minimum bounding-box area for a region to count as motion.
    pub min_box_area: u32,
    /// Exponential moving average weight of the newest frame.
    pub background_weight: f32,
    /// Number of 3x3 dilation passes over the foreground mask.
    pub dilate_iterations: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            min_box_width: 30,
            min_box_area: 1000,
            background_weight: 0.6,
            dilate_iterations: 2,
        }
    }
}

impl DetectionConfig {
    /// Validates the detector parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = self.background_weight;
        if !(w > 0.0 && w < 1.0) {
            return Err(ConfigError::InvalidBackgroundWeight(w));
        }
        Ok(())
    }
}

/// Motion session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Seconds a motion recording stays open after the last detection.
    pub cooldown_secs: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 10 * 60,
        }
    }
}

impl MotionConfig {
    /// Cooldown as a [`Duration`].
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Capture/processing orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Queue capacity in frames. `None` sizes it to two seconds of stream.
    pub queue_capacity: Option<usize>,
    /// How long the processing thread waits on an empty queue before
    /// re-checking the stop flag.
    pub poll_interval_ms: u64,
    /// How long shutdown waits for a blocked capture read.
    pub shutdown_grace_secs: u64,
    /// Keep running after the continuous archive writer fails.
    pub tolerate_default_failure: bool,
    /// Keep running after a motion writer fails.
    pub tolerate_motion_failure: bool,
    /// Minimum frame time between notification attempts within one session
    /// after a failure. 0 retries on the first motion event after the
    /// failed attempt completes.
    pub notification_retry_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            poll_interval_ms: 50,
            shutdown_grace_secs: 5,
            tolerate_default_failure: false,
            tolerate_motion_failure: true,
            notification_retry_secs: 0,
        }
    }
}

impl PipelineSettings {
    /// Validates the orchestration settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(())
    }

    /// Queue capacity for a stream running at `fps`.
    pub fn queue_capacity_for(&self, fps: u32) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| 2 * fps.max(1) as usize)
            .max(1)
    }

    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Shutdown grace as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Notification retry interval as a [`Duration`].
    pub fn notification_retry(&self) -> Duration {
        Duration::from_secs(self.notification_retry_secs)
    }
}

/// LINE Notify credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    /// Personal access token.
    pub token: String,
    /// API endpoint.
    pub endpoint: String,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            endpoint: "https://notify-api.line.me/api/notify".into(),
        }
    }
}

/// Generic JSON webhook target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// URL that receives `{"text": message}`.
    pub url: String,
}

/// SMTP settings for e-mail notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// SMTP relay host.
    pub smtp_server: String,
    /// SMTP submission port.
    pub smtp_port: u16,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Sender address.
    pub from: String,
    /// Operator address.
    pub to: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_server: "smtp.gmail.com".into(),
            smtp_port: 587,
            username: String::new(),
            password: String::new(),
            from: String::new(),
            to: String::new(),
        }
    }
}

/// Notification backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Backend name: `line`, `webhook`, `email` or `log`.
    pub method: String,
    /// Request timeout for network backends.
    pub timeout_secs: u64,
    /// Settings for `line`.
    pub line: LineConfig,
    /// Settings for `webhook`.
    pub webhook: WebhookConfig,
    /// Settings for `email`.
    pub email: EmailConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            method: "log".into(),
            timeout_secs: 10,
            line: LineConfig::default(),
            webhook: WebhookConfig::default(),
            email: EmailConfig::default(),
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Exporter port (0 to disable).
    pub port: u16,
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MonitorConfig {
    /// Frame source selection.
    #[serde(default)]
    pub source: SourceConfig,
    /// Segment output and rotation.
    #[serde(default)]
    pub recording: RecordingConfig,
    /// Detector tuning.
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Motion session tuning.
    #[serde(default)]
    pub motion: MotionConfig,
    /// Capture/processing orchestration.
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Operator notification.
    #[serde(default)]
    pub notification: NotificationConfig,
    /// Prometheus exporter.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl MonitorConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: MonitorConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.recording.validate()?;
        self.detection.validate()?;
        self.pipeline.validate()?;
        crate::notify::NotifierKind::from_name(&self.notification.method)?;
        Ok(())
    }
}
