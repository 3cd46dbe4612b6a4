//! IPC message dispatch: parse s-expressions and route to handlers.

use lexpr::Value;
use tracing::{debug, info, warn};

use crate::state::HandpilotState;
use crate::tracking::engine::{DrawTrigger, Mode, Tool};
use crate::tracking::landmarks::{LandmarkSample, Point};
use crate::tracking::scroll::{nudge, ScrollDirection};

/// Parse an s-expression message and dispatch to the appropriate handler.
/// Returns an optional response string (s-expression).
pub fn handle_message(state: &mut HandpilotState, client_id: u64, raw: &str) -> Option<String> {
    let value = match lexpr::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(client_id, "malformed s-expression: {}", e);
            return Some(error_response(0, &format!("malformed s-expression: {e}")));
        }
    };

    let msg_type = get_keyword(&value, "type");
    let msg_id = get_int(&value, "id").unwrap_or(0);

    // hello must be first message
    let is_authenticated = state
        .ipc_server
        .clients
        .get(&client_id)
        .map(|c| c.authenticated)
        .unwrap_or(false);

    match msg_type.as_deref() {
        Some("hello") => handle_hello(state, client_id, msg_id, &value),
        _ if !is_authenticated => Some(error_response(msg_id, "hello handshake required")),
        other => route(state, other, msg_id, &value),
    }
}

/// Dispatch a message that did not come from a socket client (replay).
/// No handshake applies.
pub fn handle_local(state: &mut HandpilotState, raw: &str) -> Option<String> {
    let value = match lexpr::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("malformed s-expression: {}", e);
            return Some(error_response(0, &format!("malformed s-expression: {e}")));
        }
    };
    let msg_type = get_keyword(&value, "type");
    let msg_id = get_int(&value, "id").unwrap_or(0);
    route(state, msg_type.as_deref(), msg_id, &value)
}

fn route(
    state: &mut HandpilotState,
    msg_type: Option<&str>,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    match msg_type {
        Some("ping") => handle_ping(state, msg_id, value),
        // Landmark input
        Some("frame") => handle_frame(state, msg_id, value),
        Some("tracking-start") => handle_tracking_start(state, msg_id),
        Some("tracking-stop") => handle_tracking_stop(state, msg_id),
        Some("provider-error") => handle_provider_error(state, msg_id, value),
        // Queries
        Some("status") => handle_status(state, msg_id),
        Some("config") => handle_config(state, msg_id),
        Some("controls-layout") => handle_controls_layout(state, msg_id),
        // Host settings
        Some("config-set") => handle_config_set(state, msg_id, value),
        Some("canvas-resize") => handle_canvas_resize(state, msg_id, value),
        Some("clear-canvas") => handle_clear_canvas(state, msg_id),
        Some("manual-draw") => handle_manual_draw(state, msg_id, value),
        // Scrolling
        Some("scroll-nudge") => handle_scroll_nudge(state, msg_id, value),
        Some("scroll-speed-step") => handle_scroll_speed_step(state, msg_id, value),
        Some(other) => {
            debug!("unknown message type: {}", other);
            Some(error_response(msg_id, &format!("unknown message type: {other}")))
        }
        None => Some(error_response(msg_id, "missing :type")),
    }
}

// ── Handlers ────────────────────────────────────────────────

fn handle_hello(
    state: &mut HandpilotState,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let version = get_int(value, "version").unwrap_or(0);
    if version != 1 {
        return Some(error_response(
            msg_id,
            &format!("unsupported protocol version: {version}"),
        ));
    }

    // Peer must run as our UID.
    if let Some(client) = state.ipc_server.clients.get(&client_id) {
        if let Some(peer_uid) = client.peer_uid {
            let our_uid = unsafe { libc::getuid() };
            if peer_uid != our_uid {
                warn!(client_id, peer_uid, our_uid, "rejecting client: UID mismatch");
                return Some(error_response(msg_id, "authentication failed: UID mismatch"));
            }
        }
    }

    let client_name = get_string(value, "client");
    debug!(client_id, ?client_name, "hello handshake (authenticated)");

    let mut peer_pid = None;
    if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
        client.authenticated = true;
        client.name = client_name;
        peer_pid = client.peer_pid;
    }

    let pid_field = peer_pid
        .map(|p| format!(" :peer-pid {}", p))
        .unwrap_or_default();
    Some(format!(
        "(:type :hello :id {} :version 1 :server \"handpilot\" :features (:draw t :scroll t :replay t){})",
        msg_id, pid_field
    ))
}

fn handle_ping(state: &mut HandpilotState, msg_id: i64, value: &Value) -> Option<String> {
    let client_ts = get_int(value, "timestamp").unwrap_or(0);
    let server_ts = state.clock.unix_millis();

    Some(format!(
        "(:type :response :id {} :status :ok :client-timestamp {} :server-timestamp {})",
        msg_id, client_ts, server_ts
    ))
}

/// `(:type :frame :timestamp-ms N :landmarks ((x y) ...))`.  `:landmarks nil`
/// (or an empty list) reports no hand.  Frames are fire-and-forget: only
/// failures get a response.
fn handle_frame(state: &mut HandpilotState, msg_id: i64, value: &Value) -> Option<String> {
    let timestamp_ms = get_int(value, "timestamp-ms").and_then(|t| u64::try_from(t).ok());
    let sample = get_value(value, "landmarks").and_then(parse_landmarks);

    match state.handle_frame(sample, timestamp_ms) {
        Ok(()) => None,
        Err(e) => Some(error_response(msg_id, &e)),
    }
}

fn handle_tracking_start(state: &mut HandpilotState, msg_id: i64) -> Option<String> {
    match state.start_tracking() {
        Ok(()) => Some(ok_response(msg_id)),
        Err(e) => Some(error_response(msg_id, &e)),
    }
}

fn handle_tracking_stop(state: &mut HandpilotState, msg_id: i64) -> Option<String> {
    state.stop_tracking();
    Some(ok_response(msg_id))
}

fn handle_provider_error(state: &mut HandpilotState, msg_id: i64, value: &Value) -> Option<String> {
    let reason = get_string(value, "reason").unwrap_or_else(|| "provider error".to_string());
    state.fail_tracking(&reason);
    Some(ok_response(msg_id))
}

fn handle_status(state: &mut HandpilotState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :state {})",
        msg_id,
        state.status_sexp()
    ))
}

fn handle_config(state: &mut HandpilotState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :config {})",
        msg_id,
        state.engine.config_sexp()
    ))
}

fn handle_controls_layout(state: &mut HandpilotState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :layout {})",
        msg_id,
        state.engine.layout().to_sexp()
    ))
}

/// Settings parsed from a `config-set` message.  Every present field is
/// validated before any is applied.
#[derive(Debug, Default)]
struct ConfigUpdate {
    mode: Option<Mode>,
    canvas: Option<(u32, u32)>,
    brush_width: Option<f32>,
    eraser_width: Option<f32>,
    color: Option<String>,
    tool: Option<Tool>,
    scroll_speed: Option<i64>,
    draw_trigger: Option<DrawTrigger>,
}

impl ConfigUpdate {
    fn parse(value: &Value, current: (u32, u32)) -> Result<Self, String> {
        let mut update = Self::default();

        if let Some(s) = get_keyword(value, "mode") {
            update.mode = Some(Mode::parse(&s).ok_or_else(|| format!("invalid mode: {s}"))?);
        }
        let width = get_keyword(value, "canvas-width");
        let height = get_keyword(value, "canvas-height");
        if width.is_some() || height.is_some() {
            let w = match width {
                Some(s) => parse_dimension(&s)?,
                None => current.0,
            };
            let h = match height {
                Some(s) => parse_dimension(&s)?,
                None => current.1,
            };
            update.canvas = Some((w, h));
        }
        if let Some(s) = get_keyword(value, "brush-width") {
            update.brush_width = Some(parse_width(&s)?);
        }
        if let Some(s) = get_keyword(value, "eraser-width") {
            update.eraser_width = Some(parse_width(&s)?);
        }
        if let Some(s) = get_string(value, "color") {
            if !crate::tracking::engine::is_hex_color(&s) {
                return Err(format!("invalid color: {s}"));
            }
            update.color = Some(s);
        }
        if let Some(s) = get_keyword(value, "tool") {
            update.tool = Some(Tool::parse(&s).ok_or_else(|| format!("invalid tool: {s}"))?);
        }
        if let Some(s) = get_keyword(value, "scroll-speed") {
            update.scroll_speed = Some(
                s.parse()
                    .map_err(|_| format!("invalid scroll speed: {s}"))?,
            );
        }
        if let Some(s) = get_keyword(value, "draw-trigger") {
            update.draw_trigger = Some(
                DrawTrigger::parse(&s).ok_or_else(|| format!("invalid draw trigger: {s}"))?,
            );
        }
        Ok(update)
    }

    fn apply(self, state: &mut HandpilotState) -> Result<(), String> {
        let mut events = Vec::new();
        if let Some(mode) = self.mode {
            events.extend(state.engine.set_mode(mode));
        }
        if let Some(trigger) = self.draw_trigger {
            events.extend(state.engine.set_draw_trigger(trigger));
        }
        if let Some((w, h)) = self.canvas {
            state.engine.set_canvas_size(w, h);
        }
        if let Some(width) = self.brush_width {
            state.engine.set_brush_width(width)?;
        }
        if let Some(width) = self.eraser_width {
            state.engine.set_eraser_width(width)?;
        }
        if let Some(color) = self.color {
            state.engine.set_color(&color)?;
        }
        if let Some(tool) = self.tool {
            state.engine.set_tool(tool);
        }
        if let Some(speed) = self.scroll_speed {
            events.extend(state.engine.set_scroll_speed(speed));
        }
        state.publish(events);
        Ok(())
    }
}

fn parse_dimension(s: &str) -> Result<u32, String> {
    s.parse::<u32>()
        .map_err(|_| format!("invalid canvas dimension: {s}"))
}

fn parse_width(s: &str) -> Result<f32, String> {
    match s.parse::<f32>() {
        Ok(w) if w.is_finite() && w > 0.0 => Ok(w),
        _ => Err(format!("invalid width: {s}")),
    }
}

fn handle_config_set(state: &mut HandpilotState, msg_id: i64, value: &Value) -> Option<String> {
    let current = (
        state.engine.config().canvas_width,
        state.engine.config().canvas_height,
    );
    let result = ConfigUpdate::parse(value, current).and_then(|update| {
        debug!(?update, "config-set");
        update.apply(state)
    });
    match result {
        Ok(()) => {
            info!("Engine config updated");
            Some(format!(
                "(:type :response :id {} :status :ok :config {})",
                msg_id,
                state.engine.config_sexp()
            ))
        }
        Err(e) => Some(error_response(msg_id, &e)),
    }
}

fn handle_canvas_resize(state: &mut HandpilotState, msg_id: i64, value: &Value) -> Option<String> {
    let width = get_int(value, "width").and_then(|w| u32::try_from(w).ok());
    let height = get_int(value, "height").and_then(|h| u32::try_from(h).ok());
    let (Some(width), Some(height)) = (width, height) else {
        return Some(error_response(msg_id, "missing or invalid :width/:height"));
    };
    state.engine.set_canvas_size(width, height);
    Some(format!(
        "(:type :response :id {} :status :ok :layout {})",
        msg_id,
        state.engine.layout().to_sexp()
    ))
}

fn handle_clear_canvas(state: &mut HandpilotState, msg_id: i64) -> Option<String> {
    state.engine.clear_canvas(&mut state.canvas);
    state.publish(Vec::new());
    Some(ok_response(msg_id))
}

fn handle_manual_draw(state: &mut HandpilotState, msg_id: i64, value: &Value) -> Option<String> {
    let Some(drawing) = get_bool(value, "drawing") else {
        return Some(error_response(msg_id, "missing :drawing"));
    };
    if state.engine.config().draw_trigger != DrawTrigger::Manual {
        return Some(error_response(msg_id, "draw trigger is not manual"));
    }
    state.engine.set_manual_drawing(drawing);
    Some(ok_response(msg_id))
}

fn handle_scroll_nudge(state: &mut HandpilotState, msg_id: i64, value: &Value) -> Option<String> {
    let direction = get_keyword(value, "direction");
    let Some(direction) = direction.as_deref().and_then(ScrollDirection::parse) else {
        return Some(error_response(
            msg_id,
            &format!("invalid direction: {}", direction.unwrap_or_default()),
        ));
    };
    nudge(direction, &mut *state);
    Some(format!(
        "(:type :response :id {} :status :ok :offset-x {:.1} :offset-y {:.1})",
        msg_id, state.viewport.offset_x, state.viewport.offset_y
    ))
}

fn handle_scroll_speed_step(
    state: &mut HandpilotState,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let Some(delta) = get_int(value, "delta") else {
        return Some(error_response(msg_id, "missing :delta"));
    };
    let events = state.engine.step_scroll_speed(delta);
    state.publish(events);
    Some(format!(
        "(:type :response :id {} :status :ok :speed {})",
        msg_id,
        state.engine.config().scroll_speed
    ))
}

// ── Landmarks ──────────────────────────────────────────────

/// Parse `((x y) ...)` into a sample.  Points are kept up to the first
/// malformed entry; no usable points means no hand.
fn parse_landmarks(value: &Value) -> Option<LandmarkSample> {
    let mut points = Vec::new();
    let mut current = value;
    while let Value::Cons(pair) = current {
        match parse_point(pair.car()) {
            Some(p) => points.push(p),
            None => break,
        }
        current = pair.cdr();
    }
    if points.is_empty() {
        None
    } else {
        Some(LandmarkSample::new(points))
    }
}

fn parse_point(value: &Value) -> Option<Point> {
    let Value::Cons(pair) = value else {
        return None;
    };
    let x = as_number(pair.car())?;
    let Value::Cons(rest) = pair.cdr() else {
        return None;
    };
    let y = as_number(rest.car())?;
    Some(Point::new(x as f32, y as f32))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

// ── Helpers ────────────────────────────────────────────────

fn ok_response(id: i64) -> String {
    format!("(:type :response :id {} :status :ok)", id)
}

fn error_response(id: i64, reason: &str) -> String {
    format!(
        "(:type :response :id {} :status :error :reason \"{}\")",
        id,
        escape_string(reason)
    )
}

/// Escape a string for use inside an s-expression string literal.
pub fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Find the raw value following `:key` in a plist.
/// Handles both `Value::Keyword("key")` (elisp parser) and
/// `Value::Symbol(":key")` (default parser) forms.
fn get_value<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let prefixed = format!(":{}", key);
    let mut current = value;
    while let Value::Cons(pair) = current {
        let is_key = match pair.car() {
            Value::Keyword(k) => k.as_ref() == key,
            Value::Symbol(s) => s.as_ref() == prefixed,
            _ => false,
        };
        if is_key {
            return match pair.cdr() {
                Value::Cons(next) => Some(next.car()),
                _ => None,
            };
        }
        current = pair.cdr();
    }
    None
}

/// Extract a keyword value from an s-expression plist as a string.
fn get_keyword(value: &Value, key: &str) -> Option<String> {
    let val = get_value(value, key)?;
    match val {
        Value::Keyword(v) => Some(v.to_string()),
        Value::Symbol(v) => {
            let s = v.to_string();
            Some(s.strip_prefix(':').unwrap_or(&s).to_string())
        }
        Value::String(v) => Some(v.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "t" } else { "nil" }.to_string()),
        Value::Null | Value::Nil => Some("nil".to_string()),
        _ => Some(val.to_string()),
    }
}

/// Extract an integer value from an s-expression plist.
fn get_int(value: &Value, key: &str) -> Option<i64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// Extract a string value from an s-expression plist.
fn get_string(value: &Value, key: &str) -> Option<String> {
    get_keyword(value, key)
}

/// Extract a boolean value from an s-expression plist.
/// Treats "nil" as false, anything else as true.
fn get_bool(value: &Value, key: &str) -> Option<bool> {
    get_keyword(value, key).map(|s| s != "nil")
}

/// Format an IPC event s-expression.
pub fn format_event(event_type: &str, fields: &[(&str, &str)]) -> String {
    let mut s = format!("(:type :event :event :{}", event_type);
    for (key, val) in fields {
        s.push_str(&format!(" :{} {}", key, val));
    }
    s.push(')');
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::server::unframe;
    use crate::state::{test_state, TrackingStatus};
    use crate::tracking::engine::EngineConfig;
    use crate::tracking::gesture::fist_thumb_tucked_points;

    fn authed_state() -> (calloop::EventLoop<'static, HandpilotState>, HandpilotState, u64) {
        let (event_loop, mut state) = test_state(EngineConfig::default());
        let (ours, _theirs) = std::os::unix::net::UnixStream::pair().unwrap();
        let id = state.ipc_server.add_client(ours);
        let hello = handle_message(&mut state, id, "(:type :hello :id 1 :version 1 :client \"test\")");
        assert!(hello.unwrap().starts_with("(:type :hello :id 1"));
        (event_loop, state, id)
    }

    fn sent_events(state: &HandpilotState, id: u64) -> Vec<String> {
        unframe(&state.ipc_server.clients[&id].write_buf)
    }

    fn frame_message(points: &[Point], ts: u64) -> String {
        let body: Vec<String> = points
            .iter()
            .map(|p| format!("({} {})", p.x, p.y))
            .collect();
        format!(
            "(:type :frame :timestamp-ms {} :landmarks ({}))",
            ts,
            body.join(" ")
        )
    }

    // ── ok_response / error_response ────────────────────────

    #[test]
    fn test_ok_response_format() {
        let r = ok_response(42);
        assert_eq!(r, "(:type :response :id 42 :status :ok)");
    }

    #[test]
    fn test_error_response_escapes_quotes() {
        let r = error_response(1, "say \"hello\"");
        assert!(r.contains(":status :error"));
        assert!(r.contains("say \\\"hello\\\""));
    }

    #[test]
    fn test_escape_string_backslash() {
        assert_eq!(escape_string("a\\b"), "a\\\\b");
    }

    // ── plist accessors ─────────────────────────────────────

    #[test]
    fn test_get_keyword_from_plist() {
        let v = lexpr::from_str("(:type :hello :version 1 :client \"emacs\")").unwrap();
        assert_eq!(get_keyword(&v, "type"), Some("hello".to_string()));
        assert_eq!(get_int(&v, "version"), Some(1));
        assert_eq!(get_string(&v, "client"), Some("emacs".to_string()));
        assert_eq!(get_keyword(&v, "nonexistent"), None);
    }

    #[test]
    fn test_get_keyword_trailing_key() {
        let v = lexpr::from_str("(:type :ping :id)").unwrap();
        assert_eq!(get_keyword(&v, "id"), None);
    }

    #[test]
    fn test_get_bool() {
        let v = lexpr::from_str("(:a t :b nil)").unwrap();
        assert_eq!(get_bool(&v, "a"), Some(true));
        assert_eq!(get_bool(&v, "b"), Some(false));
    }

    #[test]
    fn test_format_event() {
        let e = format_event("scroll", &[("dx", "0.0"), ("dy", "10.0")]);
        assert_eq!(e, "(:type :event :event :scroll :dx 0.0 :dy 10.0)");
        assert!(lexpr::from_str(&e).is_ok());
    }

    // ── Landmark parsing ────────────────────────────────────

    #[test]
    fn test_parse_landmarks_list() {
        let v = lexpr::from_str("(:landmarks ((0.1 0.2) (0.3 0.4) (1 0)))").unwrap();
        let sample = get_value(&v, "landmarks").and_then(parse_landmarks).unwrap();
        assert_eq!(sample.len(), 3);
        assert_eq!(sample.points()[2], Point::new(1.0, 0.0));
    }

    #[test]
    fn test_parse_landmarks_stops_at_malformed() {
        let v = lexpr::from_str("(:landmarks ((0.1 0.2) (0.3) (0.5 0.5)))").unwrap();
        let sample = get_value(&v, "landmarks").and_then(parse_landmarks).unwrap();
        assert_eq!(sample.len(), 1);
    }

    #[test]
    fn test_parse_landmarks_absent_hand() {
        for raw in ["(:landmarks nil)", "(:landmarks ())", "(:landmarks ((a b)))"] {
            let v = lexpr::from_str(raw).unwrap();
            assert!(get_value(&v, "landmarks").and_then(parse_landmarks).is_none(), "{raw}");
        }
    }

    // ── Routing ─────────────────────────────────────────────

    #[test]
    fn test_handshake_required() {
        let (_loop, mut state) = test_state(EngineConfig::default());
        let (ours, _theirs) = std::os::unix::net::UnixStream::pair().unwrap();
        let id = state.ipc_server.add_client(ours);
        let r = handle_message(&mut state, id, "(:type :status :id 3)").unwrap();
        assert!(r.contains("hello handshake required"));

        let r = handle_message(&mut state, id, "(:type :hello :id 4 :version 2)").unwrap();
        assert!(r.contains("unsupported protocol version"));
    }

    #[test]
    fn test_malformed_and_unknown() {
        let (_loop, mut state, id) = authed_state();
        let r = handle_message(&mut state, id, "(:type :status").unwrap();
        assert!(r.contains("malformed s-expression"));
        let r = handle_message(&mut state, id, "(:type :bogus :id 9)").unwrap();
        assert!(r.contains(":id 9 :status :error"));
        assert!(r.contains("unknown message type: bogus"));
    }

    #[test]
    fn test_frames_drive_engine_and_broadcast() {
        let (_loop, mut state, id) = authed_state();
        let points = fist_thumb_tucked_points();
        for t in 0..3 {
            let r = handle_message(&mut state, id, &frame_message(&points, t * 33));
            assert!(r.is_none());
        }
        assert!(state.engine.is_engaged());
        let events = sent_events(&state, id);
        assert!(events.iter().any(|e| e.contains(":gesture-engaged :gesture :fist-thumb-tucked")));
        assert!(events.iter().any(|e| e.contains(":draw-dot")));

        let r = handle_message(&mut state, id, "(:type :frame :timestamp-ms 200 :landmarks nil)");
        assert!(r.is_none());
        assert!(!state.engine.is_engaged());
        assert!(sent_events(&state, id)
            .iter()
            .any(|e| e.contains(":tracking-lost")));
    }

    #[test]
    fn test_frame_refused_while_failed() {
        let (_loop, mut state, id) = authed_state();
        let r = handle_message(&mut state, id, "(:type :provider-error :id 2 :reason \"no camera\")");
        assert_eq!(r.unwrap(), ok_response(2));
        assert!(matches!(state.tracking, TrackingStatus::Failed { .. }));

        let r = handle_message(&mut state, id, "(:type :frame :id 3 :landmarks nil)").unwrap();
        assert!(r.contains(":status :error"));
        assert!(r.contains("no camera"));

        let r = handle_message(&mut state, id, "(:type :tracking-start :id 4)").unwrap();
        assert_eq!(r, ok_response(4));
        assert!(handle_message(&mut state, id, "(:type :frame :landmarks nil)").is_none());
        assert_eq!(state.tracking, TrackingStatus::Running);
    }

    #[test]
    fn test_config_set_validates_before_applying() {
        let (_loop, mut state, id) = authed_state();
        let r = handle_message(
            &mut state,
            id,
            "(:type :config-set :id 5 :brush-width 12 :color \"red\")",
        )
        .unwrap();
        assert!(r.contains("invalid color: red"));
        assert_eq!(state.engine.config().brush_width, 5.0);

        let r = handle_message(
            &mut state,
            id,
            "(:type :config-set :id 6 :brush-width 12 :color \"#00ff00\" :tool :eraser :scroll-speed 42)",
        )
        .unwrap();
        assert!(r.starts_with("(:type :response :id 6 :status :ok :config"));
        let config = state.engine.config();
        assert_eq!(config.brush_width, 12.0);
        assert_eq!(config.color, "#00ff00");
        assert_eq!(config.tool, Tool::Eraser);
        assert_eq!(config.scroll_speed, 10);
    }

    #[test]
    fn test_config_set_mode_and_canvas() {
        let (_loop, mut state, id) = authed_state();
        let r = handle_message(
            &mut state,
            id,
            "(:type :config-set :id 7 :mode :scroll :canvas-width 640)",
        )
        .unwrap();
        assert!(r.contains(":mode :scroll"));
        assert_eq!(state.engine.config().mode, Mode::Scroll);
        assert_eq!(state.engine.config().canvas_width, 640);
        assert_eq!(state.engine.config().canvas_height, 720);

        let r = handle_message(&mut state, id, "(:type :config-set :id 8 :mode :fly)").unwrap();
        assert!(r.contains("invalid mode: fly"));
    }

    #[test]
    fn test_queries() {
        let (_loop, mut state, id) = authed_state();
        let r = handle_message(&mut state, id, "(:type :status :id 10)").unwrap();
        assert!(r.starts_with("(:type :response :id 10 :status :ok :state (:tracking"));
        assert!(lexpr::from_str(&r).is_ok());

        let r = handle_message(&mut state, id, "(:type :config :id 11)").unwrap();
        assert!(r.contains(":brush-width 5.0"));
        assert!(lexpr::from_str(&r).is_ok());

        let r = handle_message(&mut state, id, "(:type :controls-layout :id 12)").unwrap();
        assert!(r.contains(":layout"));
        assert!(lexpr::from_str(&r).is_ok());

        let r = handle_message(&mut state, id, "(:type :ping :id 13 :timestamp 99)").unwrap();
        assert!(r.contains(":client-timestamp 99"));
    }

    #[test]
    fn test_canvas_resize() {
        let (_loop, mut state, id) = authed_state();
        let r = handle_message(&mut state, id, "(:type :canvas-resize :id 1 :width 800 :height 600)")
            .unwrap();
        assert!(r.contains(":status :ok"));
        assert_eq!(state.engine.layout().dimensions(), (800, 600));

        let r = handle_message(&mut state, id, "(:type :canvas-resize :id 2 :width -1 :height 600)")
            .unwrap();
        assert!(r.contains(":status :error"));
    }

    #[test]
    fn test_clear_canvas_broadcasts() {
        let (_loop, mut state, id) = authed_state();
        let r = handle_message(&mut state, id, "(:type :clear-canvas :id 3)").unwrap();
        assert_eq!(r, ok_response(3));
        assert!(sent_events(&state, id)
            .iter()
            .any(|e| e == "(:type :event :event :clear-canvas)"));
    }

    #[test]
    fn test_scroll_nudge_and_speed_step() {
        let (_loop, mut state, id) = authed_state();
        let r = handle_message(&mut state, id, "(:type :scroll-nudge :id 1 :direction :down)")
            .unwrap();
        assert!(r.contains(":offset-y 100.0"));
        let r = handle_message(&mut state, id, "(:type :scroll-nudge :id 2 :direction :up)")
            .unwrap();
        assert!(r.contains(":offset-y 0.0"));
        let r = handle_message(&mut state, id, "(:type :scroll-nudge :id 3 :direction :sideways)")
            .unwrap();
        assert!(r.contains("invalid direction: sideways"));

        let r = handle_message(&mut state, id, "(:type :scroll-speed-step :id 4 :delta 2)").unwrap();
        assert!(r.contains(":speed 9"));
        let r = handle_message(&mut state, id, "(:type :scroll-speed-step :id 5 :delta 5)").unwrap();
        assert!(r.contains(":speed 10"));
        let r = handle_message(&mut state, id, "(:type :scroll-speed-step :id 6 :delta -20)").unwrap();
        assert!(r.contains(":speed 1"));
    }

    #[test]
    fn test_manual_draw_requires_manual_trigger() {
        let (_loop, mut state, id) = authed_state();
        let r = handle_message(&mut state, id, "(:type :manual-draw :id 1 :drawing t)").unwrap();
        assert!(r.contains("draw trigger is not manual"));

        handle_message(&mut state, id, "(:type :config-set :id 2 :draw-trigger :manual)");
        let r = handle_message(&mut state, id, "(:type :manual-draw :id 3 :drawing t)").unwrap();
        assert_eq!(r, ok_response(3));
        assert!(state.engine.is_engaged());
    }

    #[test]
    fn test_handle_local_skips_handshake() {
        let (_loop, mut state) = test_state(EngineConfig::default());
        assert!(handle_local(&mut state, "(:type :frame :timestamp-ms 0 :landmarks nil)").is_none());
        assert_eq!(state.landmarks.frames_received, 1);
        let r = handle_local(&mut state, "(:type :status)").unwrap();
        assert!(r.contains(":status :ok"));
    }
}
