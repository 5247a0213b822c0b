use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;

use browtap_core::action::domain::action_dispatcher::SinkHandle;
use browtap_core::action::infrastructure::logging_trigger_sink::LoggingTriggerSink;
use browtap_core::capture::infrastructure::image_sequence_source::{
    ImageSequenceSource, ReplaySettings,
};
use browtap_core::inference::domain::engine_options::ComputeBackend;
use browtap_core::inference::domain::inference_gate::GateState;
use browtap_core::inference::infrastructure::onnx_expression_engine::OnnxExpressionEngineFactory;
use browtap_core::pipeline::perception_pipeline::{
    PerceptionPipeline, PipelineNotice, PipelineStats,
};
use browtap_core::pipeline::pipeline_config::{PipelineConfig, SurfaceSize};
use browtap_core::pipeline::pipeline_logger::LogPipelineLogger;
use browtap_core::shared::clock::{Clock, MonotonicClock};
use browtap_core::shared::frame::Rotation;

/// Longest wait for the last in-flight inference after capture ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const NOTICE_POLL: Duration = Duration::from_millis(50);

/// Replays camera frames through the expression trigger pipeline and taps a
/// surface whenever the watched expression is detected.
#[derive(Parser)]
#[command(name = "browtap")]
struct Cli {
    /// Directory of still images replayed as camera frames.
    frames: PathBuf,

    /// JSON pipeline config; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Expression model (.onnx). Resolved from the cache when omitted.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Download URL for the expression model if it is not cached.
    #[arg(long)]
    model_url: Option<String>,

    /// Directory shipped alongside the binary that may hold the model.
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Newline-separated category labels matching the model's outputs.
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Expression category that triggers taps.
    #[arg(long)]
    category: Option<String>,

    /// Score at or above which a tap fires (0.0-1.0).
    #[arg(long)]
    threshold: Option<f32>,

    /// Minimum milliseconds between taps.
    #[arg(long)]
    cooldown_ms: Option<u64>,

    /// Do not mirror frames (rear-facing capture).
    #[arg(long)]
    no_mirror: bool,

    /// Sensor rotation hint stamped on each frame: 0, 90, 180 or 270.
    #[arg(long, default_value = "0")]
    rotation: u32,

    /// Replay rate in frames per second.
    #[arg(long, default_value = "30")]
    fps: f64,

    /// Compute backend: cpu or accelerated.
    #[arg(long)]
    backend: Option<ComputeBackend>,

    /// Tap surface size, e.g. 800x600. Taps land at its center.
    #[arg(long)]
    surface: Option<SurfaceSize>,

    /// Replay the sequence endlessly. The run never reaches its summary
    /// and only ends when the process is killed.
    #[arg(long = "loop")]
    looping: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;
    let rotation = Rotation::from_degrees(cli.rotation).ok_or_else(|| {
        format!(
            "Rotation must be one of 0, 90, 180, 270, got {}",
            cli.rotation
        )
    })?;

    let source = ImageSequenceSource::open(&cli.frames)?;
    log::info!(
        "Replaying {} frames at {} fps (rotation {}°{})",
        source.len(),
        cli.fps,
        rotation.degrees(),
        if cli.looping { ", looping" } else { "" }
    );

    let mut factory = OnnxExpressionEngineFactory::new();
    if let Some(ref url) = cli.model_url {
        factory = factory.with_model_url(url.clone());
    }
    if let Some(ref dir) = cli.models_dir {
        factory = factory.with_bundled_dir(dir.clone());
    }

    let surface = config.surface;
    let sink = SinkHandle::attached(Box::new(LoggingTriggerSink::new(format!(
        "{}x{} surface",
        surface.width, surface.height
    ))));
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::default());

    let pipeline = PerceptionPipeline::start(
        config,
        &factory,
        sink,
        Box::new(LogPipelineLogger::default()),
        clock.clone(),
    )?;
    let notices = pipeline.notifications();
    let intake = pipeline.intake();

    let settings = ReplaySettings {
        fps: cli.fps,
        rotation,
        looping: cli.looping,
    };
    let capture = source.start(move |frame| intake.offer(frame), settings, clock)?;

    while !capture.is_finished() {
        if let Ok(notice) = notices.recv_timeout(NOTICE_POLL) {
            report(&notice);
        }
    }
    capture.join();

    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while pipeline.gate_state() == GateState::Detecting && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    let stats = pipeline.shutdown();
    for notice in notices.try_iter() {
        report(&notice);
    }
    print_stats(&stats);
    Ok(())
}

fn build_config(cli: &Cli) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match cli.config {
        Some(ref path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(ref category) = cli.category {
        config.category_name = category.clone();
    }
    if let Some(threshold) = cli.threshold {
        config.threshold = threshold;
    }
    if let Some(cooldown_ms) = cli.cooldown_ms {
        config.cooldown_ms = cooldown_ms;
    }
    if cli.no_mirror {
        config.mirror = false;
    }
    if let Some(surface) = cli.surface {
        config.surface = surface;
    }
    if let Some(backend) = cli.backend {
        config.engine.backend = backend;
    }
    if cli.model.is_some() {
        config.engine.model_path = cli.model.clone();
    }
    if cli.labels.is_some() {
        config.engine.labels_path = cli.labels.clone();
    }

    config.validate()?;
    Ok(config)
}

fn report(notice: &PipelineNotice) {
    match notice {
        PipelineNotice::Triggered(_) => eprintln!("{notice}"),
        _ => eprintln!("Warning: {notice}"),
    }
}

fn print_stats(stats: &PipelineStats) {
    eprintln!(
        "Frames: {} offered, {} dropped, {} rejected, {} inferred",
        stats.frames_offered, stats.frames_dropped, stats.frames_rejected, stats.frames_submitted
    );
    eprintln!(
        "Results: {} ({} without a face, {} errors)",
        stats.results, stats.empty_results, stats.inference_errors
    );
    eprintln!(
        "Taps: {} fired, {} suppressed by cooldown, {} delivered, {} dropped",
        stats.triggers_fired,
        stats.triggers_suppressed,
        stats.triggers_delivered,
        stats.triggers_dropped
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("browtap").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_come_from_config() {
        let cli = parse(&["frames/"]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(cli.rotation, 0);
        assert!(!cli.looping);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = parse(&[
            "frames/",
            "--category",
            "jawOpen",
            "--threshold",
            "0.8",
            "--cooldown-ms",
            "750",
            "--no-mirror",
            "--surface",
            "1080x1920",
            "--backend",
            "gpu",
            "--loop",
        ]);
        let config = build_config(&cli).unwrap();

        assert_eq!(config.category_name, "jawOpen");
        assert!((config.threshold - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.cooldown_ms, 750);
        assert!(!config.mirror);
        assert_eq!(config.surface, SurfaceSize { width: 1080, height: 1920 });
        assert_eq!(config.engine.backend, ComputeBackend::Accelerated);
        assert!(cli.looping);
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let cli = parse(&["frames/", "--threshold", "1.2"]);
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn test_loop_help_states_run_never_finishes() {
        let command = Cli::command();
        let looping = command
            .get_arguments()
            .find(|arg| arg.get_long() == Some("loop"))
            .unwrap();
        let help = looping.get_help().unwrap().to_string();
        assert!(help.contains("killed"));
        assert!(!help.contains("interrupted"));
    }

    #[test]
    fn test_bad_surface_rejected_by_parser() {
        let args = ["browtap", "frames/", "--surface", "wide"];
        assert!(Cli::try_parse_from(args).is_err());
    }
}
