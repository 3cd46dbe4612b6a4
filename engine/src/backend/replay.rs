//! Replay backend: feed a recorded frame file through the event loop at a
//! fixed interval, for headless runs and diagnosis.
//!
//! The file holds one IPC message per line, normally `frame` messages but
//! any host command is accepted.  Blank lines and lines starting with `;`
//! are skipped.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use calloop::timer::{TimeoutAction, Timer};
use calloop::{LoopHandle, RegistrationToken};
use tracing::{info, warn};

use super::{socket, RunConfig};
use crate::ipc::dispatch;
use crate::state::HandpilotState;

/// Read a replay file into its message lines.
pub fn load_replay(path: &Path) -> anyhow::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read replay file {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(';'))
        .map(str::to_string)
        .collect())
}

/// Feed one message per `interval`.  Stops the loop after the last one.
pub fn schedule(
    handle: &LoopHandle<'static, HandpilotState>,
    lines: Vec<String>,
    interval: Duration,
) -> anyhow::Result<RegistrationToken> {
    let mut pending: VecDeque<String> = lines.into();
    let mut line_no = 0usize;
    handle
        .insert_source(
            Timer::from_duration(interval),
            move |_, _, state: &mut HandpilotState| {
                let Some(line) = pending.pop_front() else {
                    info!("Replay finished after {} message(s)", line_no);
                    state.running = false;
                    return TimeoutAction::Drop;
                };
                line_no += 1;
                if let Some(response) = dispatch::handle_local(state, &line) {
                    if response.contains(":status :error") {
                        warn!(line_no, "replay message rejected: {}", response);
                    }
                }
                TimeoutAction::ToDuration(interval)
            },
        )
        .map_err(|e| anyhow::anyhow!("failed to register replay timer: {}", e.error))
}

/// Replay `path` and exit when it runs out.  IPC clients may still connect
/// to observe the broadcast events.
pub fn run(path: &Path, frame_interval_ms: u64, config: RunConfig) -> anyhow::Result<()> {
    let lines = load_replay(path)?;
    info!(
        "Replaying {} message(s) from {} every {}ms",
        lines.len(),
        path.display(),
        frame_interval_ms
    );

    let (mut event_loop, mut state) = socket::setup(&config)?;
    schedule(
        &event_loop.handle(),
        lines,
        Duration::from_millis(frame_interval_ms.max(1)),
    )?;

    let result = socket::drive(
        &mut event_loop,
        &mut state,
        config.exit_after,
        Duration::from_millis(config.poll_interval_ms),
    );

    let _ = std::fs::remove_file(&state.ipc_server.socket_path);
    info!("Final state: {}", state.status_sexp());
    result
}
