//! Host state: the single struct the event loop owns and hands to every
//! callback as `&mut HandpilotState`.
//!
//! Landmark frames arrive over IPC (or from a replay file), run through the
//! engine, and the resulting draw calls and transitions are broadcast to
//! IPC clients as events.  The scroll timer and the provider startup
//! timeout are calloop timers on the same loop.

use std::time::{Duration, Instant};

use calloop::timer::{TimeoutAction, Timer};
use calloop::{LoopHandle, RegistrationToken};
use tracing::{debug, info, warn};

use crate::ipc::dispatch::{escape_string, format_event};
use crate::ipc::IpcServer;
use crate::tracking::engine::{Engine, EngineConfig, EngineEvent};
use crate::tracking::landmarks::{LandmarkBuffer, LandmarkSample};
use crate::tracking::scroll::{CalloopScheduler, Viewport};
use crate::tracking::stroke::CanvasRecorder;

/// How long a started provider may stay silent before the session fails.
pub const PROVIDER_STARTUP_TIMEOUT: Duration = Duration::from_millis(5000);

/// Engine as deployed on the host loop.
pub type HostEngine = Engine<CalloopScheduler<HandpilotState>>;

/// Landmark provider session.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingStatus {
    /// No session requested.  Frames pushed anyway start one implicitly.
    Idle,
    /// Started, waiting for the first frame.
    Starting { since_ms: u64 },
    Running,
    /// Terminal until tracking is restarted.
    Failed { reason: String },
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting { .. } => "starting",
            Self::Running => "running",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn to_sexp(&self) -> String {
        match self {
            Self::Failed { reason } => {
                format!("(:state :failed :reason \"{}\")", escape_string(reason))
            }
            other => format!("(:state :{})", other.as_str()),
        }
    }
}

/// Which clock timestamps the frames of one session.  Chosen by the first
/// frame: provider time if it carries `:timestamp-ms`, host time otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClock {
    Host,
    Provider,
}

impl FrameClock {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Provider => "provider",
        }
    }
}

/// Host document scroll offsets as last driven by this process.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ViewportMirror {
    pub offset_x: f64,
    pub offset_y: f64,
}

impl ViewportMirror {
    /// Apply a delta.  Offsets never go negative.
    pub fn apply(&mut self, dx: f64, dy: f64) {
        self.offset_x = (self.offset_x + dx).max(0.0);
        self.offset_y = (self.offset_y + dy).max(0.0);
    }
}

/// Monotonic millisecond clock anchored at startup.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Wall-clock milliseconds since the Unix epoch.
    pub fn unix_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HandpilotState {
    pub engine: HostEngine,
    pub ipc_server: IpcServer,
    pub landmarks: LandmarkBuffer,
    pub viewport: ViewportMirror,
    /// Draw calls waiting to be broadcast.
    pub canvas: CanvasRecorder,
    pub tracking: TrackingStatus,
    /// Clock of the current session, unset until its first frame.
    pub frame_clock: Option<FrameClock>,
    pub provider_timeout: Duration,
    startup_timer: Option<RegistrationToken>,
    pub clock: Clock,
    pub loop_handle: LoopHandle<'static, HandpilotState>,
    pub running: bool,
}

impl HandpilotState {
    pub fn new(
        loop_handle: LoopHandle<'static, HandpilotState>,
        config: EngineConfig,
        ipc_server: IpcServer,
    ) -> Self {
        let scheduler = CalloopScheduler::new(loop_handle.clone());
        info!(
            "Engine created: mode {}, canvas {}x{}",
            config.mode.as_str(),
            config.canvas_width,
            config.canvas_height
        );
        Self {
            engine: Engine::new(config, scheduler),
            ipc_server,
            landmarks: LandmarkBuffer::new(),
            viewport: ViewportMirror::default(),
            canvas: CanvasRecorder::new(),
            tracking: TrackingStatus::Idle,
            frame_clock: None,
            provider_timeout: PROVIDER_STARTUP_TIMEOUT,
            startup_timer: None,
            clock: Clock::new(),
            loop_handle,
            running: true,
        }
    }

    // ── Frames ─────────────────────────────────────────────

    /// Run one provider frame through the engine.  `timestamp_ms` is read
    /// according to the session's `FrameClock`.
    pub fn handle_frame(
        &mut self,
        sample: Option<LandmarkSample>,
        timestamp_ms: Option<u64>,
    ) -> Result<(), String> {
        match &self.tracking {
            TrackingStatus::Failed { reason } => {
                return Err(format!("tracking failed: {}", reason));
            }
            TrackingStatus::Idle => {
                info!("Frames arriving without tracking-start, session running");
                self.tracking = TrackingStatus::Running;
            }
            TrackingStatus::Starting { .. } => {
                self.cancel_startup_timer();
                info!("Landmark provider delivered first frame");
                self.tracking = TrackingStatus::Running;
            }
            TrackingStatus::Running => {}
        }

        let now_ms = self.frame_time(timestamp_ms);
        self.landmarks.push(sample, now_ms);
        let events = self
            .engine
            .on_frame(self.landmarks.latest(), now_ms, &mut self.canvas);
        self.publish(events);
        Ok(())
    }

    /// Frame time on the session clock.  A provider-clock session never runs
    /// backwards: a missing or stale timestamp repeats the last one.  A
    /// host-clock session ignores provider timestamps.
    fn frame_time(&mut self, timestamp_ms: Option<u64>) -> u64 {
        let clock = *self.frame_clock.get_or_insert_with(|| {
            let clock = if timestamp_ms.is_some() {
                FrameClock::Provider
            } else {
                FrameClock::Host
            };
            debug!("Session frame clock: {}", clock.as_str());
            clock
        });
        match clock {
            FrameClock::Provider => {
                let last = self.landmarks.last_timestamp_ms.unwrap_or(0);
                match timestamp_ms {
                    Some(t) => t.max(last),
                    None => {
                        debug!("Frame without :timestamp-ms in a provider-clock session");
                        last
                    }
                }
            }
            FrameClock::Host => self.clock.now_ms(),
        }
    }

    /// Broadcast engine events and any queued draw calls.
    pub fn publish(&mut self, events: Vec<EngineEvent>) {
        for event in &events {
            match event {
                EngineEvent::Gesture(_) | EngineEvent::Scroll(_) | EngineEvent::TrackingLost => {
                    debug!("{}", event.to_sexp());
                }
                _ => {}
            }
            self.ipc_server.broadcast_event(&event.to_sexp());
        }
        for op in self.canvas.drain() {
            self.ipc_server.broadcast_event(&op.to_sexp());
        }
    }

    // ── Tracking session ───────────────────────────────────

    /// Begin (or restart) a provider session.  Fails the session if no frame
    /// arrives within `provider_timeout`.
    pub fn start_tracking(&mut self) -> Result<(), String> {
        self.cancel_startup_timer();
        let events = self.engine.teardown();
        self.publish(events);
        self.landmarks.reset();
        self.frame_clock = None;

        let token = self
            .loop_handle
            .insert_source(
                Timer::from_duration(self.provider_timeout),
                |_, _, state: &mut HandpilotState| {
                    state.startup_timer = None;
                    if matches!(state.tracking, TrackingStatus::Starting { .. }) {
                        let waited = state.provider_timeout.as_millis();
                        state.fail_tracking(&format!(
                            "landmark provider did not start within {}ms",
                            waited
                        ));
                    }
                    TimeoutAction::Drop
                },
            )
            .map_err(|e| format!("failed to register startup timer: {}", e.error))?;

        self.startup_timer = Some(token);
        self.tracking = TrackingStatus::Starting {
            since_ms: self.clock.now_ms(),
        };
        info!(
            "Tracking started, waiting up to {}ms for the provider",
            self.provider_timeout.as_millis()
        );
        self.ipc_server
            .broadcast_event(&format_event("tracking-started", &[]));
        Ok(())
    }

    /// End the session: scroll timer cancelled and all session state cleared.
    pub fn stop_tracking(&mut self) {
        self.cancel_startup_timer();
        let events = self.engine.teardown();
        self.publish(events);
        self.landmarks.reset();
        self.frame_clock = None;
        self.tracking = TrackingStatus::Idle;
        info!("Tracking stopped");
        self.ipc_server
            .broadcast_event(&format_event("tracking-stopped", &[]));
    }

    /// Mark the session failed.  Frames are refused until restarted.
    pub fn fail_tracking(&mut self, reason: &str) {
        self.cancel_startup_timer();
        let events = self.engine.teardown();
        self.publish(events);
        self.landmarks.reset();
        self.frame_clock = None;
        warn!("Tracking failed: {}", reason);
        self.tracking = TrackingStatus::Failed {
            reason: reason.to_string(),
        };
        let reason = format!("\"{}\"", escape_string(reason));
        self.ipc_server
            .broadcast_event(&format_event("tracking-failed", &[("reason", &reason)]));
    }

    fn cancel_startup_timer(&mut self) {
        if let Some(token) = self.startup_timer.take() {
            self.loop_handle.remove(token);
        }
    }

    /// Current time on the session clock, for status reports.
    fn session_now_ms(&self) -> u64 {
        match self.frame_clock {
            Some(FrameClock::Provider) => self.landmarks.last_timestamp_ms.unwrap_or(0),
            _ => self.clock.now_ms(),
        }
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        format!(
            "(:tracking {} :engine {} :landmarks {} :viewport (:x {:.1} :y {:.1}) :ipc {} :clock {})",
            self.tracking.to_sexp(),
            self.engine.status_sexp(self.session_now_ms()),
            self.landmarks.status_sexp(),
            self.viewport.offset_x,
            self.viewport.offset_y,
            self.ipc_server.status_sexp(),
            self.frame_clock
                .map(|c| format!(":{}", c.as_str()))
                .unwrap_or_else(|| "nil".to_string()),
        )
    }
}

impl Viewport for HandpilotState {
    fn scroll_by(&mut self, dx: f64, dy: f64) {
        self.viewport.apply(dx, dy);
        let event = format_event(
            "scroll",
            &[
                ("dx", &format!("{:.1}", dx)),
                ("dy", &format!("{:.1}", dy)),
                ("offset-x", &format!("{:.1}", self.viewport.offset_x)),
                ("offset-y", &format!("{:.1}", self.viewport.offset_y)),
            ],
        );
        self.ipc_server.broadcast_event(&event);
    }
}

// ── Test helpers ───────────────────────────────────────────

#[cfg(test)]
pub(crate) fn test_state(
    config: EngineConfig,
) -> (calloop::EventLoop<'static, HandpilotState>, HandpilotState) {
    let event_loop = calloop::EventLoop::try_new().unwrap();
    let server = IpcServer::new(std::path::PathBuf::from("/tmp/handpilot-test.sock"));
    let state = HandpilotState::new(event_loop.handle(), config, server);
    (event_loop, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::engine::Mode;
    use crate::tracking::gesture::{fist_thumb_tucked_points, open_hand_points};

    fn dispatch_for(
        event_loop: &mut calloop::EventLoop<'static, HandpilotState>,
        state: &mut HandpilotState,
        ms: u64,
    ) {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(ms) {
            event_loop
                .dispatch(Some(Duration::from_millis(5)), state)
                .unwrap();
        }
    }

    #[test]
    fn test_viewport_mirror_clamps() {
        let mut v = ViewportMirror::default();
        v.apply(0.0, -50.0);
        assert_eq!(v.offset_y, 0.0);
        v.apply(30.0, 100.0);
        assert_eq!((v.offset_x, v.offset_y), (30.0, 100.0));
    }

    #[test]
    fn test_frames_start_session_implicitly() {
        let (_loop, mut state) = test_state(EngineConfig::default());
        assert_eq!(state.tracking, TrackingStatus::Idle);
        state.handle_frame(None, Some(0)).unwrap();
        assert_eq!(state.tracking, TrackingStatus::Running);
        assert_eq!(state.landmarks.frames_received, 1);
    }

    #[test]
    fn test_draw_events_broadcast() {
        let (_loop, mut state) = test_state(EngineConfig::default());
        let (ours, _theirs) = std::os::unix::net::UnixStream::pair().unwrap();
        let id = state.ipc_server.add_client(ours);
        state.ipc_server.clients.get_mut(&id).unwrap().authenticated = true;

        for t in 0..3 {
            let sample = LandmarkSample::new(fist_thumb_tucked_points());
            state.handle_frame(Some(sample), Some(t * 33)).unwrap();
        }
        let sent = crate::ipc::server::unframe(&state.ipc_server.clients[&id].write_buf);
        assert!(sent.iter().any(|e| e.contains(":gesture-engaged")));
        assert!(sent.iter().any(|e| e.contains(":draw-dot")));
        assert!(state.canvas.ops().is_empty());
    }

    #[test]
    fn test_startup_timeout_fails_session() {
        let (mut event_loop, mut state) = test_state(EngineConfig::default());
        state.provider_timeout = Duration::from_millis(20);
        state.start_tracking().unwrap();
        assert!(matches!(state.tracking, TrackingStatus::Starting { .. }));

        dispatch_for(&mut event_loop, &mut state, 80);
        assert!(matches!(state.tracking, TrackingStatus::Failed { .. }));
        assert!(state.handle_frame(None, Some(0)).is_err());

        // Restart, and this time the provider answers in time.
        state.start_tracking().unwrap();
        state.handle_frame(None, Some(10)).unwrap();
        assert_eq!(state.tracking, TrackingStatus::Running);
        dispatch_for(&mut event_loop, &mut state, 60);
        assert_eq!(state.tracking, TrackingStatus::Running);
    }

    #[test]
    fn test_scroll_timer_moves_viewport_and_stop_cancels() {
        let config = EngineConfig {
            mode: Mode::Scroll,
            ..Default::default()
        };
        let (mut event_loop, mut state) = test_state(config);
        // Open hand scrolls up; start lower so the offset can decrease.
        state.viewport.offset_y = 10_000.0;
        for t in 0..3 {
            let sample = LandmarkSample::new(open_hand_points());
            state.handle_frame(Some(sample), Some(t * 33)).unwrap();
        }
        assert!(state.engine.scroll().is_scrolling());

        dispatch_for(&mut event_loop, &mut state, 100);
        let scrolled = state.viewport.offset_y;
        assert!(scrolled < 10_000.0);
        assert_eq!((10_000.0 - scrolled) % 10.0, 0.0);

        state.stop_tracking();
        assert!(!state.engine.scroll().is_scrolling());
        dispatch_for(&mut event_loop, &mut state, 50);
        assert_eq!(state.viewport.offset_y, scrolled);
        assert_eq!(state.tracking, TrackingStatus::Idle);
    }

    #[test]
    fn test_fail_tracking_tears_down() {
        let (_loop, mut state) = test_state(EngineConfig::default());
        for t in 0..3 {
            let sample = LandmarkSample::new(fist_thumb_tucked_points());
            state.handle_frame(Some(sample), Some(t * 33)).unwrap();
        }
        assert!(state.engine.is_engaged());
        state.fail_tracking("camera permission denied");
        assert!(!state.engine.is_engaged());
        assert_eq!(
            state.tracking.to_sexp(),
            "(:state :failed :reason \"camera permission denied\")"
        );
    }

    #[test]
    fn test_fail_reason_escaped_in_broadcast() {
        let (_loop, mut state) = test_state(EngineConfig::default());
        let (ours, _theirs) = std::os::unix::net::UnixStream::pair().unwrap();
        let id = state.ipc_server.add_client(ours);
        state.ipc_server.clients.get_mut(&id).unwrap().authenticated = true;

        state.fail_tracking("device \"cam0\" busy");
        let sent = crate::ipc::server::unframe(&state.ipc_server.clients[&id].write_buf);
        let event = sent
            .iter()
            .find(|e| e.contains(":tracking-failed"))
            .unwrap();
        let value = lexpr::from_str(event).unwrap();
        let reason = value.to_vec().unwrap()[5].as_str().unwrap().to_string();
        assert_eq!(reason, "device \"cam0\" busy");
        assert!(lexpr::from_str(&state.tracking.to_sexp()).is_ok());
    }

    #[test]
    fn test_provider_clock_holds_for_session() {
        let (_loop, mut state) = test_state(EngineConfig::default());
        state.handle_frame(None, Some(5_000)).unwrap();
        assert_eq!(state.frame_clock, Some(FrameClock::Provider));

        // A frame without a timestamp repeats the last provider time rather
        // than jumping to the host clock.
        state.handle_frame(None, None).unwrap();
        assert_eq!(state.landmarks.last_timestamp_ms, Some(5_000));
        state.handle_frame(None, Some(4_000)).unwrap();
        assert_eq!(state.landmarks.last_timestamp_ms, Some(5_000));
        state.handle_frame(None, Some(5_033)).unwrap();
        assert_eq!(state.landmarks.last_timestamp_ms, Some(5_033));
        assert!(state.status_sexp().ends_with(":clock :provider)"));
    }

    #[test]
    fn test_host_clock_ignores_provider_timestamps() {
        let (_loop, mut state) = test_state(EngineConfig::default());
        state.handle_frame(None, None).unwrap();
        assert_eq!(state.frame_clock, Some(FrameClock::Host));
        state.handle_frame(None, Some(10_000_000)).unwrap();
        assert!(state.landmarks.last_timestamp_ms.unwrap() < 10_000_000);

        // A new session picks its clock afresh.
        state.stop_tracking();
        assert_eq!(state.frame_clock, None);
        state.handle_frame(None, Some(10_000_000)).unwrap();
        assert_eq!(state.frame_clock, Some(FrameClock::Provider));
        assert_eq!(state.landmarks.last_timestamp_ms, Some(10_000_000));
    }

    #[test]
    fn test_status_sexp() {
        let (_loop, state) = test_state(EngineConfig::default());
        let status = state.status_sexp();
        assert!(status.starts_with("(:tracking (:state :idle) :engine (:mode :draw"));
        assert!(status.contains(":viewport (:x 0.0 :y 0.0)"));
        assert!(status.contains(":ipc (:clients 0"));
    }
}
