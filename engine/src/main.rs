//! handpilot: hand-landmark gesture engine for freehand drawing and
//! gesture scrolling, driven over an s-expression IPC socket.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use handpilot::backend::{self, BackendType, IpcConfig, RunConfig};
use handpilot::tracking::engine::{EngineConfig, Mode};

#[derive(Parser, Debug)]
#[command(name = "handpilot", version, about = "Hand-landmark gesture engine")]
struct Cli {
    /// Deployment mode: draw or scroll
    #[arg(long, default_value = "draw", value_parser = parse_mode)]
    mode: Mode,

    /// Canvas size in pixels, WxH
    #[arg(long, default_value = "1280x720", value_parser = parse_canvas)]
    canvas: (u32, u32),

    /// Scroll speed, 1-10
    #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u8).range(1..=10))]
    scroll_speed: u8,

    /// IPC socket path (default: $XDG_RUNTIME_DIR/handpilot-ipc.sock)
    #[arg(long)]
    ipc_socket: Option<PathBuf>,

    /// Log all IPC messages
    #[arg(long)]
    ipc_trace: bool,

    /// Replay a recorded frame file instead of waiting for a provider
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Interval between replayed messages in milliseconds
    #[arg(long, default_value_t = 33)]
    frame_interval_ms: u64,

    /// Exit after N seconds
    #[arg(long)]
    exit_after: Option<u64>,
}

fn parse_mode(s: &str) -> Result<Mode, String> {
    Mode::parse(s).ok_or_else(|| format!("unknown mode: {s} (use draw or scroll)"))
}

/// Parse a "WxH" canvas size.
fn parse_canvas(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| format!("expected WxH, got {s}"))?;
    let w = w.parse::<u32>().map_err(|e| format!("bad width: {e}"))?;
    let h = h.parse::<u32>().map_err(|e| format!("bad height: {e}"))?;
    if w == 0 || h == 0 {
        return Err(format!("canvas must be non-empty, got {s}"));
    }
    Ok((w, h))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "handpilot=info".into()),
        )
        .init();

    info!("handpilot v{} starting", env!("CARGO_PKG_VERSION"));

    let engine = EngineConfig {
        mode: cli.mode,
        canvas_width: cli.canvas.0,
        canvas_height: cli.canvas.1,
        scroll_speed: cli.scroll_speed,
        ..Default::default()
    };
    let config = RunConfig {
        engine,
        ipc: IpcConfig {
            socket_path: cli.ipc_socket,
            trace: cli.ipc_trace,
        },
        exit_after: cli.exit_after,
        ..Default::default()
    };

    let backend_type = match cli.replay {
        Some(path) => BackendType::Replay {
            path,
            frame_interval_ms: cli.frame_interval_ms,
        },
        None => BackendType::Socket,
    };
    info!("backend: {:?}, mode: {}", backend_type, cli.mode.as_str());

    backend::run(backend_type, config)
}
