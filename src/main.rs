//! Motion Sentry CLI
//!
//! Runs the monitor against a configured source, or a self-contained demo
//! against a synthetic scene.

use clap::{Parser, Subcommand};
use motion_sentry::{
    build_notifier,
    capture::{open_source, FrameSource, SyntheticSource},
    config::{MetricsConfig, MonitorConfig},
    metrics::MetricsRegistry,
    pipeline::{Pipeline, PipelineConfig, PipelineError, PipelineReport},
    recording::Y4mEncoderFactory,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "motion-sentry")]
#[command(version, about = "Motion-triggered video archiving")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor a camera, file or synthetic source until it ends or Ctrl-C
    Run {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the source identifier (device index, .y4m path, synthetic[:WxH])
        #[arg(short, long)]
        source: Option<String>,

        /// Override the base output directory for both streams
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Record a synthetic scene with two motion bursts
    Demo {
        /// Number of frames to generate
        #[arg(long, default_value_t = 450)]
        frames: u64,

        /// Directory for the demo recordings
        #[arg(short, long, default_value = "demo-output")]
        output_dir: PathBuf,
    },
    /// Print the effective configuration as TOML
    PrintConfig {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Run {
            config,
            source,
            output_dir,
        } => load_config(config.as_deref()).and_then(|mut config| {
            if let Some(source) = source {
                config.source.identifier = source;
            }
            if let Some(dir) = output_dir {
                redirect_output(&mut config, &dir);
            }
            run(config)
        }),
        Command::Demo { frames, output_dir } => demo(frames, &output_dir),
        Command::PrintConfig { config } => load_config(config.as_deref()).and_then(|config| {
            let text = config.to_toml().map_err(|e| e.to_string())?;
            print!("{text}");
            Ok(())
        }),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<MonitorConfig, String> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            MonitorConfig::from_file(path).map_err(|e| e.to_string())
        }
        None => Ok(MonitorConfig::default()),
    }
}

fn redirect_output(config: &mut MonitorConfig, dir: &Path) {
    config.recording.output_dir = dir.join("recordings");
    config.recording.motion_dir = dir.join("motion-detected");
}

fn run(config: MonitorConfig) -> Result<(), String> {
    info!("Motion Sentry v{}", motion_sentry::VERSION);

    let source = open_source(&config.source).map_err(|e| e.to_string())?;
    monitor(&config, source).map_err(|e| e.to_string())?;
    Ok(())
}

fn demo(frames: u64, output_dir: &Path) -> Result<(), String> {
    info!("Motion Sentry v{}", motion_sentry::VERSION);
    info!("This is a demonstration using a synthetic scene");

    let mut config = MonitorConfig::default();
    redirect_output(&mut config, output_dir);
    config.motion.cooldown_secs = 3;
    config.recording.max_duration_secs = Some(10);

    let fps = 15;
    let source = SyntheticSource::new(320, 240, fps)
        .with_motion(45..90)
        .with_motion(300..330)
        .with_limit(frames);

    let report = monitor(&config, Box::new(source)).map_err(|e| e.to_string())?;

    println!(
        "Archive segments: {}, motion sessions: {}, notifications: {}",
        report.processing.default_segments.len(),
        report.processing.sessions.len(),
        report.processing.notifications_sent
    );
    Ok(())
}

/// Runs one pipeline with Ctrl-C wired to its stop handle.
fn monitor(
    config: &MonitorConfig,
    source: Box<dyn FrameSource>,
) -> Result<PipelineReport, PipelineError> {
    let notifier = build_notifier(&config.notification)?;
    let mut pipeline = Pipeline::new(
        PipelineConfig::from(config),
        Arc::new(Y4mEncoderFactory),
        notifier,
    )?;

    if let Some(registry) = metrics_registry(&config.metrics) {
        pipeline = pipeline.with_metrics(registry);
    }

    let stop = pipeline.stop_handle();
    if let Err(e) = ctrlc::set_handler(move || stop.stop()) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    let report = pipeline.run(source)?;

    info!(
        "Captured {} frames ({} dropped), {} with motion",
        report.frames_captured, report.frames_dropped, report.processing.motion_frames
    );
    for failure in &report.processing.stream_failures {
        warn!(
            stream = %failure.stream,
            count = failure.count,
            error = %failure.last_error,
            "Writer failures during run"
        );
    }
    if let Some(error) = &report.processing.last_dispatch_error {
        warn!(
            failed = report.processing.notifications_failed,
            error = %error,
            "Most recent notification failure"
        );
    }

    Ok(report)
}

#[cfg(feature = "metrics")]
fn metrics_registry(config: &MetricsConfig) -> Option<MetricsRegistry> {
    use motion_sentry::metrics::{MetricsServer, MetricsServerConfig};

    if config.port == 0 {
        return None;
    }

    let registry = match MetricsRegistry::new() {
        Ok(registry) => registry,
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            return None;
        }
    };

    let server = MetricsServer::new(MetricsServerConfig::with_port(config.port), registry.clone());
    if let Err(e) = server.spawn() {
        warn!(error = %e, "Failed to start metrics server");
    }
    Some(registry)
}

#[cfg(not(feature = "metrics"))]
fn metrics_registry(config: &MetricsConfig) -> Option<MetricsRegistry> {
    if config.port != 0 {
        warn!(
            port = config.port,
            "Metrics port configured but the metrics feature is not enabled"
        );
    }
    None
}
