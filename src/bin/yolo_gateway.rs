//! yolo_gateway - HTTP gateway for LLM providers and YOLO object detection
//!
//! This daemon:
//! 1. Loads configuration (file, environment, flags)
//! 2. Serves the HTTP API
//! 3. Probes the detection backend in the background, falling back to simulation

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use yolo_gateway::{
    api::{ApiConfig, ApiServer, AppState},
    config::GatewayConfig,
    detect::{BackendRegistry, CancelToken, Detector},
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "HTTP gateway for LLM providers and YOLO object detection"
)]
struct Args {
    /// JSON configuration file.
    #[arg(long, env = "YOLO_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration.
    #[arg(long)]
    addr: Option<String>,

    /// Skip the backend probe and serve simulated detections.
    #[arg(long)]
    simulate: bool,

    /// Print the built-in detection backends and exit.
    #[arg(long)]
    list_backends: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_backends {
        let registry = BackendRegistry::with_builtin();
        for name in registry.list() {
            if let Some(descriptor) = registry.get(&name) {
                println!(
                    "{}\t{} {}\t{:?}",
                    name,
                    descriptor.program,
                    descriptor.script.display(),
                    descriptor.capabilities
                );
            }
        }
        return Ok(());
    }

    let mut config = GatewayConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.api.addr = addr;
    }
    if args.simulate {
        config.detector.simulate = true;
    }
    config.validate()?;

    let descriptor = config.backend_descriptor()?;
    log::info!(
        "detection backend '{}' ({} {})",
        descriptor.name,
        descriptor.program,
        descriptor.script.display()
    );
    let detector = Arc::new(Detector::new(
        descriptor,
        config.detector_settings(),
        CancelToken::new(),
    ));
    let state = Arc::new(AppState::from_config(&config, detector.clone())?);
    log::info!(
        "providers: claude={} codex={}",
        if state.claude.is_configured() { "configured" } else { "not configured" },
        if state.codex.is_configured() { "configured" } else { "not configured" }
    );

    let api_handle = ApiServer::new(ApiConfig::from(&config.api), state).spawn()?;
    log::info!("health check: http://{}/api/health", api_handle.addr);

    // The port is already open while the probe runs; routes answer "not loaded" until it settles.
    let loader = detector.clone();
    std::thread::Builder::new()
        .name("detector-load".to_string())
        .spawn(move || {
            let mode = loader.load();
            log::info!("detector ready in {:?} mode", mode);
        })
        .context("failed to spawn detector load thread")?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("yolo_gateway waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
