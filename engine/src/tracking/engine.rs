//! Per-frame dispatcher wiring classifier, smoother, controls, arbiter and
//! the two action consumers.
//!
//! One `Engine` runs either in draw mode (strokes on a canvas, with virtual
//! controls) or in scroll mode (timed viewport scrolling).  Every frame flows
//! one way: sample -> classifier -> pointer/hit test -> arbiter -> stroke or
//! scroll.  Host settings take effect on the next frame.

use tracing::{debug, info};

use super::activation::{is_pinching, ActivationArbiter};
use super::controls::{ControlLayout, LayoutConfig, ZoneId};
use super::gesture::{ClassifierVariant, GestureClassifier, GestureEvent};
use super::landmarks::{LandmarkSample, Point};
use super::pointer::{fingertip_to_canvas, PointerSmoother};
use super::scroll::{clamp_speed, ScrollActuator, ScrollDirection, ScrollEvent, ScrollScheduler};
use super::stroke::{Canvas, StrokeRenderer, StrokeStyle};
use crate::ipc::dispatch::escape_string;

// ── Settings ───────────────────────────────────────────────

/// Which consumer this engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Draw,
    Scroll,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draw => "draw",
            Self::Scroll => "scroll",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draw" => Some(Self::Draw),
            "scroll" => Some(Self::Scroll),
            _ => None,
        }
    }

    fn variant(&self) -> ClassifierVariant {
        match self {
            Self::Draw => ClassifierVariant::Draw,
            Self::Scroll => ClassifierVariant::Scroll,
        }
    }
}

/// What engages drawing in draw mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawTrigger {
    /// Debounced fist-with-thumb-tucked.
    Gesture,
    /// Host-set flag.
    Manual,
}

impl DrawTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gesture => "gesture",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gesture" => Some(Self::Gesture),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Brush,
    Eraser,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brush => "brush",
            Self::Eraser => "eraser",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "brush" => Some(Self::Brush),
            "eraser" => Some(Self::Eraser),
            _ => None,
        }
    }
}

/// Whether `s` is a `#rgb` or `#rrggbb` color.
pub fn is_hex_color(s: &str) -> bool {
    s.strip_prefix('#').is_some_and(|hex| {
        (hex.len() == 3 || hex.len() == 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
    })
}

/// Host-facing settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: Mode,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub brush_width: f32,
    pub eraser_width: f32,
    pub color: String,
    pub tool: Tool,
    /// 1-10.
    pub scroll_speed: u8,
    pub draw_trigger: DrawTrigger,
    /// Engagement flag used with `DrawTrigger::Manual`.
    pub manual_drawing: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Draw,
            canvas_width: 1280,
            canvas_height: 720,
            brush_width: 5.0,
            eraser_width: 40.0,
            color: "#ff0000".to_string(),
            tool: Tool::Brush,
            scroll_speed: 7,
            draw_trigger: DrawTrigger::Gesture,
            manual_drawing: false,
        }
    }
}

// ── Events ─────────────────────────────────────────────────

/// Everything a frame (or a host command) changed, for broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Gesture(GestureEvent),
    ControlFired { zone: ZoneId },
    ToolChanged { tool: Tool, color: String },
    Scroll(ScrollEvent),
    /// Hand left the frame.
    TrackingLost,
}

impl EngineEvent {
    pub fn to_sexp(&self) -> String {
        match self {
            Self::Gesture(e) => e.to_sexp(),
            Self::ControlFired { zone } => format!(
                "(:type :event :event :control-fired :zone \"{}\")",
                zone.as_str()
            ),
            Self::ToolChanged { tool, color } => format!(
                "(:type :event :event :tool-changed :tool :{} :color \"{}\")",
                tool.as_str(),
                escape_string(color)
            ),
            Self::Scroll(e) => e.to_sexp(),
            Self::TrackingLost => "(:type :event :event :tracking-lost)".to_string(),
        }
    }
}

// ── Engine ─────────────────────────────────────────────────

pub struct Engine<S: ScrollScheduler> {
    config: EngineConfig,
    pub classifier: GestureClassifier,
    pub smoother: PointerSmoother,
    pub arbiter: ActivationArbiter,
    pub stroke: StrokeRenderer,
    layout_config: LayoutConfig,
    layout: ControlLayout,
    scroll: ScrollActuator<S>,
    hovered: Option<ZoneId>,
    hand_present: bool,
    /// Frames processed since creation.
    pub frames: u64,
}

impl<S: ScrollScheduler> Engine<S> {
    pub fn new(config: EngineConfig, scheduler: S) -> Self {
        let layout_config = LayoutConfig::default();
        let layout =
            ControlLayout::compute(&layout_config, config.canvas_width, config.canvas_height);
        Self {
            classifier: GestureClassifier::new(config.mode.variant()),
            smoother: PointerSmoother::new(),
            arbiter: ActivationArbiter::new(),
            stroke: StrokeRenderer::new(),
            scroll: ScrollActuator::new(scheduler, config.scroll_speed),
            layout_config,
            layout,
            hovered: None,
            hand_present: false,
            frames: 0,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn layout(&self) -> &ControlLayout {
        &self.layout
    }

    pub fn scroll(&self) -> &ScrollActuator<S> {
        &self.scroll
    }

    pub fn hovered(&self) -> Option<ZoneId> {
        self.hovered
    }

    pub fn pointer(&self) -> Option<Point> {
        self.smoother.smoothed()
    }

    /// Whether the draw/scroll action is currently engaged.
    pub fn is_engaged(&self) -> bool {
        match (self.config.mode, self.config.draw_trigger) {
            (Mode::Draw, DrawTrigger::Manual) => self.config.manual_drawing,
            _ => self.classifier.is_engaged(),
        }
    }

    /// Style for the current tool.
    pub fn stroke_style(&self) -> StrokeStyle {
        match self.config.tool {
            Tool::Brush => StrokeStyle::brush(self.config.brush_width, &self.config.color),
            Tool::Eraser => StrokeStyle::eraser(self.config.eraser_width),
        }
    }

    /// Process one provider frame.  `None` means no hand was detected.
    pub fn on_frame(
        &mut self,
        sample: Option<&LandmarkSample>,
        now_ms: u64,
        canvas: &mut dyn Canvas,
    ) -> Vec<EngineEvent> {
        self.frames += 1;
        let Some(sample) = sample else {
            return self.lose_tracking();
        };
        self.hand_present = true;

        let mut events = Vec::new();

        if !(self.config.mode == Mode::Draw && self.config.draw_trigger == DrawTrigger::Manual) {
            if let Some(evt) = self.classifier.update(Some(sample)) {
                // Any effective transition starts a fresh session.
                self.end_session();
                events.push(EngineEvent::Gesture(evt));
            }
        }
        let engaged = self.is_engaged();

        if self.config.mode == Mode::Scroll {
            let direction = if engaged {
                ScrollDirection::from_gesture(self.classifier.effective().label())
            } else {
                None
            };
            events.extend(self.scroll.engage(direction).into_iter().map(EngineEvent::Scroll));
        }

        let Some(raw) =
            fingertip_to_canvas(sample, self.config.canvas_width, self.config.canvas_height)
        else {
            // No usable fingertip: nothing is hovered and the stroke breaks.
            self.hovered = None;
            self.arbiter.reset();
            self.end_session();
            return events;
        };
        let pointer = self.smoother.smooth(raw, engaged);

        if self.config.mode == Mode::Draw {
            self.dispatch_draw(sample, pointer, engaged, now_ms, canvas, &mut events);
        }
        events
    }

    fn dispatch_draw(
        &mut self,
        sample: &LandmarkSample,
        pointer: Point,
        engaged: bool,
        now_ms: u64,
        canvas: &mut dyn Canvas,
        events: &mut Vec<EngineEvent>,
    ) {
        let hit = self.layout.hit_test(pointer);
        self.hovered = hit;

        let pinching = is_pinching(sample, &self.arbiter.config);
        if let Some(zone) = self.arbiter.update(hit, pinching, now_ms) {
            events.extend(self.apply_control(zone));
        }

        if hit.is_some() {
            // Controls suppress drawing and end the session.
            self.end_session();
            return;
        }
        if !engaged {
            return;
        }

        let (w, h) = (
            self.config.canvas_width as f32,
            self.config.canvas_height as f32,
        );
        if pointer.x < 0.0 || pointer.x > w || pointer.y < 0.0 || pointer.y > h {
            return;
        }

        let style = self.stroke_style();
        self.stroke.advance(pointer, &style, canvas);
    }

    /// Apply a fired control.  Color zones also switch back to the brush.
    pub fn apply_control(&mut self, zone: ZoneId) -> Vec<EngineEvent> {
        match zone {
            ZoneId::Brush => self.config.tool = Tool::Brush,
            ZoneId::Eraser => self.config.tool = Tool::Eraser,
            ZoneId::Color(_) => {
                if let Some(color) = zone.color() {
                    self.config.color = color.to_string();
                }
                self.config.tool = Tool::Brush;
            }
        }
        info!(zone = %zone.as_str(), tool = self.config.tool.as_str(), "Control fired");
        vec![
            EngineEvent::ControlFired { zone },
            EngineEvent::ToolChanged {
                tool: self.config.tool,
                color: self.config.color.clone(),
            },
        ]
    }

    fn lose_tracking(&mut self) -> Vec<EngineEvent> {
        let mut events = self.teardown();
        if self.hand_present {
            self.hand_present = false;
            debug!("Tracking lost");
            events.push(EngineEvent::TrackingLost);
        }
        events
    }

    /// Clear stroke and pointer state without touching the gesture state.
    fn end_session(&mut self) {
        self.stroke.reset();
        self.smoother.reset();
    }

    /// Stop everything: scroll timer cancelled, gesture released, all
    /// per-session state cleared.
    pub fn teardown(&mut self) -> Vec<EngineEvent> {
        let mut events: Vec<EngineEvent> = self
            .scroll
            .stop()
            .into_iter()
            .map(EngineEvent::Scroll)
            .collect();
        if let Some(evt) = self.classifier.lose_tracking() {
            events.push(EngineEvent::Gesture(evt));
        }
        self.end_session();
        self.arbiter.reset();
        self.hovered = None;
        events
    }

    // ── Host settings ──────────────────────────────────────

    /// Switch deployment mode.  Tears down the running session first.
    pub fn set_mode(&mut self, mode: Mode) -> Vec<EngineEvent> {
        if mode == self.config.mode {
            return Vec::new();
        }
        let events = self.teardown();
        self.config.mode = mode;
        self.classifier.set_variant(mode.variant());
        info!("Engine mode: {}", mode.as_str());
        events
    }

    pub fn set_canvas_size(&mut self, width: u32, height: u32) {
        if (width, height) == (self.config.canvas_width, self.config.canvas_height) {
            return;
        }
        self.config.canvas_width = width;
        self.config.canvas_height = height;
        self.layout = ControlLayout::compute(&self.layout_config, width, height);
        self.end_session();
        self.hovered = None;
        debug!("Canvas resized to {}x{}", width, height);
    }

    pub fn set_brush_width(&mut self, width: f32) -> Result<(), String> {
        if !width.is_finite() || width <= 0.0 {
            return Err(format!("invalid brush width: {}", width));
        }
        self.config.brush_width = width;
        Ok(())
    }

    pub fn set_eraser_width(&mut self, width: f32) -> Result<(), String> {
        if !width.is_finite() || width <= 0.0 {
            return Err(format!("invalid eraser width: {}", width));
        }
        self.config.eraser_width = width;
        Ok(())
    }

    pub fn set_color(&mut self, color: &str) -> Result<(), String> {
        if !is_hex_color(color) {
            return Err(format!("invalid color: {}", color));
        }
        self.config.color = color.to_string();
        Ok(())
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.config.tool = tool;
    }

    /// Set the scroll speed (clamped to 1-10).
    pub fn set_scroll_speed(&mut self, speed: i64) -> Vec<EngineEvent> {
        let events = self.scroll.set_speed(speed);
        self.config.scroll_speed = self.scroll.speed();
        events.into_iter().map(EngineEvent::Scroll).collect()
    }

    /// Raise or lower the scroll speed by `delta` steps.
    pub fn step_scroll_speed(&mut self, delta: i64) -> Vec<EngineEvent> {
        let target = clamp_speed(self.config.scroll_speed as i64 + delta);
        self.set_scroll_speed(target as i64)
    }

    pub fn set_draw_trigger(&mut self, trigger: DrawTrigger) -> Vec<EngineEvent> {
        if trigger == self.config.draw_trigger {
            return Vec::new();
        }
        let events = self.teardown();
        self.config.draw_trigger = trigger;
        self.config.manual_drawing = false;
        events
    }

    /// Manual engagement flag.  Any change starts a fresh stroke.
    pub fn set_manual_drawing(&mut self, drawing: bool) {
        if drawing != self.config.manual_drawing {
            self.end_session();
        }
        self.config.manual_drawing = drawing;
    }

    pub fn clear_canvas(&mut self, canvas: &mut dyn Canvas) {
        self.stroke.reset();
        canvas.clear();
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self, now_ms: u64) -> String {
        format!(
            "(:mode :{} :engaged {} :gesture {} :tool :{} :color \"{}\" :hover {} :pointer {} :drawing {} :scroll {} :activation {} :frames {})",
            self.config.mode.as_str(),
            if self.is_engaged() { "t" } else { "nil" },
            self.classifier.status_sexp(),
            self.config.tool.as_str(),
            escape_string(&self.config.color),
            self.hovered
                .map(|z| format!("\"{}\"", z.as_str()))
                .unwrap_or_else(|| "nil".to_string()),
            self.smoother.status_sexp(),
            if self.stroke.is_drawing() { "t" } else { "nil" },
            self.scroll.status_sexp(),
            self.arbiter.status_sexp(now_ms),
            self.frames,
        )
    }

    /// Generate s-expression for IPC config.
    pub fn config_sexp(&self) -> String {
        format!(
            "(:mode :{} :canvas-width {} :canvas-height {} :brush-width {:.1} :eraser-width {:.1} :color \"{}\" :tool :{} :scroll-speed {} :draw-trigger :{} :manual-drawing {} :gesture {} :pointer {} :activation {})",
            self.config.mode.as_str(),
            self.config.canvas_width,
            self.config.canvas_height,
            self.config.brush_width,
            self.config.eraser_width,
            escape_string(&self.config.color),
            self.config.tool.as_str(),
            self.config.scroll_speed,
            self.config.draw_trigger.as_str(),
            if self.config.manual_drawing { "t" } else { "nil" },
            self.classifier.config_sexp(),
            self.smoother.config_sexp(),
            self.arbiter.config_sexp(),
        )
    }
}

// ── Tests ──────────────────────────────────────────────────
