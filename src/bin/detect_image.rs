//! detect_image - Run object detection on one image file and print the batch as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use yolo_gateway::config::GatewayConfig;
use yolo_gateway::detect::{
    preprocess::encode_image, BackendCapability, CancelToken, Detector, DetectorMode,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect objects in an image file")]
struct Args {
    /// Image file to analyze.
    image: PathBuf,

    /// Minimum confidence for reported detections, in [0, 1].
    #[arg(long, default_value_t = 0.5)]
    confidence: f32,

    /// JSON configuration file.
    #[arg(long, env = "YOLO_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Use the simulated detector even if a backend is available.
    #[arg(long)]
    simulate: bool,

    /// Fail instead of falling back to simulation.
    #[arg(long, conflicts_with = "simulate")]
    require_backend: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut config = GatewayConfig::load_from(args.config.as_deref())?;
    if args.simulate {
        config.detector.simulate = true;
    }
    config.validate()?;

    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("failed to read image {}", args.image.display()))?;
    let descriptor = config.backend_descriptor_for(BackendCapability::ImageDetection)?;
    if descriptor.name != config.detector.backend {
        log::info!(
            "backend '{}' has no still-image detection, using '{}'",
            config.detector.backend,
            descriptor.name
        );
    }
    let detector = Detector::new(
        descriptor,
        config.detector_settings(),
        CancelToken::new(),
    );
    let mode = detector.load();
    if args.require_backend && mode != DetectorMode::Real {
        let reason = detector
            .model_info()
            .load_error
            .unwrap_or_else(|| "unknown reason".to_string());
        anyhow::bail!("detection backend unavailable: {}", reason);
    }

    let batch = detector.detect(&encode_image(&bytes), args.confidence)?;
    println!("{}", serde_json::to_string_pretty(&batch)?);
    Ok(())
}
