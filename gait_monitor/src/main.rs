//! SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::Context;
use docopt::Docopt;
use log::{error, info};
use neurogait_core::capture::DirectorySource;
use neurogait_core::config::MonitorConfig;
use neurogait_core::display::LogSink;
use neurogait_core::logic::monitor::Monitor;
use serde_derive::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const USAGE: &str = "
Gait monitor: streams still frames to a gait inference service and reports risk scores and alerts.

Usage:
  gait-monitor [--config=<path>] [--frames=<dir>] [--server=<url>] [--user=<id>] [--duration=<secs>] [--trace]
  gait-monitor (--version | -v)
  gait-monitor (--help | -h)

Options:
    --config=<path>     TOML configuration file
    --frames=<dir>      Directory of still images used as the capture device
    --server=<url>      Inference service WebSocket URL (ws:// or wss://)
    --user=<id>         User id attached to every frame
    --duration=<secs>   Stop monitoring after this many seconds
    --trace             Write a JSON-lines session trace
    --version, -v       Show version
    --help, -h          Show help
";

#[derive(Debug, Clone, Deserialize)]
struct Args {
    flag_config: Option<String>,
    flag_frames: Option<String>,
    flag_server: Option<String>,
    flag_user: Option<String>,
    flag_duration: Option<u64>,
    flag_trace: bool,
}

fn main() -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_NAME").to_string() + ", version: " + env!("CARGO_PKG_VERSION");
    env_logger::init();

    let args: Args = Docopt::new(USAGE)
        .map(|d| d.help(true))
        .map(|d| d.version(Some(version)))
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let cfg = load_config(&args)?;
    let source = DirectorySource::open(
        &cfg.capture.frames_dir,
        cfg.capture.width,
        cfg.capture.height,
    )
    .with_context(|| format!("opening frames in {}", cfg.capture.frames_dir.display()))?;
    info!(
        "Streaming {} frames from {} to {}",
        source.len(),
        cfg.capture.frames_dir.display(),
        cfg.server_url
    );

    let mut monitor = Monitor::new(cfg, Box::new(source), Box::new(LogSink::default()))?;
    if let Some(path) = monitor.telemetry().path() {
        info!("Session trace: {}", path.display());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    let duration = args.flag_duration.map(Duration::from_secs);
    let last = runtime.block_on(monitor.run(duration));

    info!(
        "Session ended: {} frames sent, {} dropped, {} samples, overall risk {}%",
        last.frames_sent,
        last.dropped_frames,
        last.sample_count,
        last.overall_risk.round()
    );
    if !last.status.is_empty() {
        info!("Last status: {}", last.status);
    }
    if monitor.telemetry().dropped_count() > 0 {
        error!(
            "{} trace records were lost to a full queue",
            monitor.telemetry().dropped_count()
        );
    }
    Ok(())
}

/// Config file first (if any), then command-line overrides.
fn load_config(args: &Args) -> anyhow::Result<MonitorConfig> {
    let mut cfg = match &args.flag_config {
        Some(path) => MonitorConfig::load(&PathBuf::from(path))?,
        None => MonitorConfig::default(),
    };

    if let Some(frames) = &args.flag_frames {
        cfg.capture.frames_dir = PathBuf::from(frames);
    }
    if let Some(server) = &args.flag_server {
        cfg.server_url = server.clone();
    }
    if let Some(user) = &args.flag_user {
        cfg.user_id = user.clone();
    }
    if args.flag_trace {
        cfg.trace.enabled = true;
    }

    cfg.validate().context("validating configuration")?;
    Ok(cfg)
}
