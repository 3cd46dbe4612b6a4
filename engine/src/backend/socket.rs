//! Socket backend: landmark frames and host commands arrive from IPC
//! clients.
//!
//! Graceful signal handling and periodic status logging live here and are
//! shared with the replay backend through `drive`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use calloop::EventLoop;
use tracing::info;

use super::{IpcConfig, RunConfig};
use crate::ipc::{self, IpcServer};
use crate::state::HandpilotState;

/// Global flag set by SIGTERM/SIGINT handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Install signal handlers for graceful shutdown (SIGTERM, SIGINT).
pub(crate) fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
    }
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Create the event loop and state, and bind the IPC listener.
pub(crate) fn setup(
    config: &RunConfig,
) -> anyhow::Result<(EventLoop<'static, HandpilotState>, HandpilotState)> {
    let event_loop = EventLoop::<HandpilotState>::try_new()?;

    let IpcConfig { socket_path, trace } = &config.ipc;
    let ipc_path = socket_path
        .clone()
        .unwrap_or_else(IpcServer::default_socket_path);
    let mut server = IpcServer::new(ipc_path.clone());
    server.ipc_trace = *trace;
    IpcServer::bind(&ipc_path, &event_loop.handle())?;

    let state = HandpilotState::new(event_loop.handle(), config.engine.clone(), server);
    Ok((event_loop, state))
}

/// Run the event loop until shutdown: a signal, the exit timer, or
/// `state.running` cleared by a source.
pub(crate) fn drive(
    event_loop: &mut EventLoop<'static, HandpilotState>,
    state: &mut HandpilotState,
    exit_after: Option<u64>,
    poll_interval: Duration,
) -> anyhow::Result<()> {
    install_signal_handlers();

    let start_time = Instant::now();
    let exit_duration = exit_after.map(Duration::from_secs);
    let mut last_status_log = Instant::now();
    let status_interval = Duration::from_secs(60);

    while state.running {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            info!("Shutdown signal received, exiting");
            state.running = false;
            break;
        }

        if let Some(dur) = exit_duration {
            if start_time.elapsed() >= dur {
                info!("Exit timer fired after {}s", dur.as_secs());
                state.running = false;
                break;
            }
        }

        if last_status_log.elapsed() >= status_interval {
            info!(
                "Status: tracking {}, {} frame(s), {} IPC client(s)",
                state.tracking.as_str(),
                state.landmarks.frames_received,
                state.ipc_server.clients.len()
            );
            last_status_log = Instant::now();
        }

        ipc::IpcServer::poll_clients(state);

        event_loop.dispatch(Some(poll_interval), state)?;
    }

    // Stop any running scroll and flush final events to clients.
    let events = state.engine.teardown();
    state.publish(events);
    ipc::IpcServer::poll_clients(state);
    Ok(())
}

/// Serve IPC clients until shutdown.
pub fn run(config: RunConfig) -> anyhow::Result<()> {
    let (mut event_loop, mut state) = setup(&config)?;
    info!(
        "Socket backend initialized (poll interval: {}ms), entering event loop",
        config.poll_interval_ms
    );

    let result = drive(
        &mut event_loop,
        &mut state,
        config.exit_after,
        Duration::from_millis(config.poll_interval_ms),
    );

    let _ = std::fs::remove_file(&state.ipc_server.socket_path);
    info!(
        "Socket backend shutting down ({} frame(s), {} IPC client(s))",
        state.landmarks.frames_received,
        state.ipc_server.clients.len()
    );
    result
}
