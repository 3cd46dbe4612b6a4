//! Backends: live IPC socket and headless replay.  Both run the same calloop
//! event loop over `HandpilotState`.

pub mod replay;
pub mod socket;

use std::path::PathBuf;

use crate::tracking::engine::EngineConfig;

/// IPC socket configuration.
#[derive(Debug, Clone, Default)]
pub struct IpcConfig {
    /// Override socket path (default: `$XDG_RUNTIME_DIR/handpilot-ipc.sock`).
    pub socket_path: Option<PathBuf>,
    /// Log every message at info level.
    pub trace: bool,
}

/// Settings shared by every backend.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub engine: EngineConfig,
    pub ipc: IpcConfig,
    /// Exit after N seconds.
    pub exit_after: Option<u64>,
    /// Upper bound on one event loop dispatch, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            ipc: IpcConfig::default(),
            exit_after: None,
            poll_interval_ms: 5,
        }
    }
}

/// Backend type selector.
#[derive(Debug, Clone)]
pub enum BackendType {
    /// Frames and commands from IPC clients.
    Socket,
    /// Frames from a recorded file, one message per tick.
    Replay { path: PathBuf, frame_interval_ms: u64 },
}

/// Run the engine with the selected backend.
pub fn run(backend: BackendType, config: RunConfig) -> anyhow::Result<()> {
    match backend {
        BackendType::Socket => socket::run(config),
        BackendType::Replay {
            path,
            frame_interval_ms,
        } => replay::run(&path, frame_interval_ms, config),
    }
}
