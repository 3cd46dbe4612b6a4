//! Freehand stroke rendering with midpoint-quadratic smoothing.
//!
//! Each committed point is joined to the stroke by a quadratic curve from
//! the previous segment's midpoint to the new midpoint, using the previous
//! point as the control.  Consecutive segments share tangents at the
//! midpoints, so the path has no corners.

use tracing::debug;

use super::landmarks::Point;
use crate::ipc::dispatch::escape_string;

// ── Output surface ─────────────────────────────────────────

/// How a stroke combines with existing pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMode {
    /// Paint over.
    Normal,
    /// Remove existing paint (eraser).
    Subtractive,
}

impl CompositeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Subtractive => "subtractive",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrokeStyle {
    pub composite: CompositeMode,
    /// Line width in pixels, at least 1.
    pub width: f32,
    /// CSS-style hex color.  Ignored by subtractive strokes.
    pub color: String,
}

impl StrokeStyle {
    pub fn brush(width: f32, color: &str) -> Self {
        Self {
            composite: CompositeMode::Normal,
            width: width.max(1.0),
            color: color.to_string(),
        }
    }

    pub fn eraser(width: f32) -> Self {
        Self {
            composite: CompositeMode::Subtractive,
            width: width.max(1.0),
            color: "#000000".to_string(),
        }
    }
}

/// Quadratic curve `start -> end` bent toward `control`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveSegment {
    pub start: Point,
    pub control: Point,
    pub end: Point,
}

/// Raster surface the renderer draws on.  The host owns its lifecycle.
pub trait Canvas {
    /// Round dot centered on `center`.
    fn dot(&mut self, center: Point, diameter: f32, style: &StrokeStyle);
    /// Stroked quadratic curve with round caps.
    fn curve(&mut self, segment: &CurveSegment, style: &StrokeStyle);
    /// Erase everything.
    fn clear(&mut self);
}

/// One recorded canvas call.
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasOp {
    Dot {
        center: Point,
        diameter: f32,
        style: StrokeStyle,
    },
    Curve {
        segment: CurveSegment,
        style: StrokeStyle,
    },
    Clear,
}

impl CanvasOp {
    /// Convert the draw call to an IPC event s-expression.
    pub fn to_sexp(&self) -> String {
        match self {
            Self::Dot {
                center,
                diameter,
                style,
            } => format!(
                "(:type :event :event :draw-dot :center ({:.1} {:.1}) :diameter {:.1} :composite :{} :color \"{}\")",
                center.x,
                center.y,
                diameter,
                style.composite.as_str(),
                escape_string(&style.color),
            ),
            Self::Curve { segment, style } => format!(
                "(:type :event :event :draw-curve :start ({:.1} {:.1}) :control ({:.1} {:.1}) :end ({:.1} {:.1}) :width {:.1} :composite :{} :color \"{}\")",
                segment.start.x,
                segment.start.y,
                segment.control.x,
                segment.control.y,
                segment.end.x,
                segment.end.y,
                style.width,
                style.composite.as_str(),
                escape_string(&style.color),
            ),
            Self::Clear => "(:type :event :event :clear-canvas)".to_string(),
        }
    }
}

/// Canvas that queues draw calls for later delivery.
#[derive(Debug, Default)]
pub struct CanvasRecorder {
    ops: Vec<CanvasOp>,
}

impl CanvasRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[CanvasOp] {
        &self.ops
    }

    /// Take all queued calls.
    pub fn drain(&mut self) -> Vec<CanvasOp> {
        std::mem::take(&mut self.ops)
    }
}

impl Canvas for CanvasRecorder {
    fn dot(&mut self, center: Point, diameter: f32, style: &StrokeStyle) {
        self.ops.push(CanvasOp::Dot {
            center,
            diameter,
            style: style.clone(),
        });
    }

    fn curve(&mut self, segment: &CurveSegment, style: &StrokeStyle) {
        self.ops.push(CanvasOp::Curve {
            segment: *segment,
            style: style.clone(),
        });
    }

    fn clear(&mut self) {
        self.ops.push(CanvasOp::Clear);
    }
}

// ── Renderer ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StrokeConfig {
    /// Moves at or below this many pixels are absorbed without drawing.
    pub min_move: f32,
    /// Moves at or beyond this many pixels re-anchor the stroke.
    pub max_move: f32,
}

impl Default for StrokeConfig {
    fn default() -> Self {
        Self {
            min_move: 1.0,
            max_move: 200.0,
        }
    }
}

/// Path bookkeeping for the stroke in progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeState {
    pub last_point: Point,
    pub last_mid: Point,
}

/// What `advance` did with a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokeStep {
    /// First point of a session: painted a dot.
    Dot,
    /// Drew a curve segment.
    Segment,
    /// Jitter-sized move: position updated, nothing drawn.
    Absorbed,
    /// Jump too large to be intentional: position reset, nothing drawn.
    Reanchored,
}

#[derive(Debug, Default)]
pub struct StrokeRenderer {
    pub config: StrokeConfig,
    state: Option<StrokeState>,
    /// Segments drawn since creation.
    pub segments_drawn: u64,
}

impl StrokeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the stroke to `point`, drawing on `canvas` as needed.
    pub fn advance(&mut self, point: Point, style: &StrokeStyle, canvas: &mut dyn Canvas) -> StrokeStep {
        let Some(state) = self.state else {
            canvas.dot(point, style.width, style);
            self.anchor(point);
            return StrokeStep::Dot;
        };

        let distance = state.last_point.distance(point);
        if distance >= self.config.max_move {
            debug!("Stroke re-anchored after {:.0}px jump", distance);
            self.anchor(point);
            return StrokeStep::Reanchored;
        }
        if distance <= self.config.min_move {
            self.anchor(point);
            return StrokeStep::Absorbed;
        }

        let mid = state.last_point.midpoint(point);
        canvas.curve(
            &CurveSegment {
                start: state.last_mid,
                control: state.last_point,
                end: mid,
            },
            style,
        );
        self.state = Some(StrokeState {
            last_point: point,
            last_mid: mid,
        });
        self.segments_drawn += 1;
        StrokeStep::Segment
    }

    fn anchor(&mut self, point: Point) {
        self.state = Some(StrokeState {
            last_point: point,
            last_mid: point,
        });
    }

    /// End the session; the next point starts a disconnected stroke.
    pub fn reset(&mut self) {
        self.state = None;
    }

    pub fn state(&self) -> Option<&StrokeState> {
        self.state.as_ref()
    }

    pub fn is_drawing(&self) -> bool {
        self.state.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style() -> StrokeStyle {
        StrokeStyle::brush(5.0, "#ff0000")
    }

    #[test]
    fn test_first_point_draws_dot() {
        let mut r = StrokeRenderer::new();
        let mut canvas = CanvasRecorder::new();
        assert_eq!(r.advance(Point::new(10.0, 10.0), &style(), &mut canvas), StrokeStep::Dot);
        assert_eq!(
            canvas.ops(),
            &[CanvasOp::Dot {
                center: Point::new(10.0, 10.0),
                diameter: 5.0,
                style: style(),
            }]
        );
    }

    #[test]
    fn test_jump_reanchors_without_drawing() {
        let mut r = StrokeRenderer::new();
        let mut canvas = CanvasRecorder::new();
        r.advance(Point::new(500.0, 500.0), &style(), &mut canvas);
        assert_eq!(
            r.advance(Point::new(510.0, 505.0), &style(), &mut canvas),
            StrokeStep::Segment
        );
        assert_eq!(
            r.advance(Point::new(900.0, 900.0), &style(), &mut canvas),
            StrokeStep::Reanchored
        );
        let curves = canvas
            .ops()
            .iter()
            .filter(|op| matches!(op, CanvasOp::Curve { .. }))
            .count();
        assert_eq!(curves, 1);
        assert_eq!(r.state().unwrap().last_point, Point::new(900.0, 900.0));
        assert_eq!(r.segments_drawn, 1);
    }

    #[test]
    fn test_jitter_absorbed() {
        let mut r = StrokeRenderer::new();
        let mut canvas = CanvasRecorder::new();
        r.advance(Point::new(100.0, 100.0), &style(), &mut canvas);
        assert_eq!(
            r.advance(Point::new(100.5, 100.5), &style(), &mut canvas),
            StrokeStep::Absorbed
        );
        assert_eq!(canvas.ops().len(), 1);
        assert_eq!(r.state().unwrap().last_point, Point::new(100.5, 100.5));
    }

    #[test]
    fn test_midpoint_quadratic_segments() {
        let mut r = StrokeRenderer::new();
        let mut canvas = CanvasRecorder::new();
        r.advance(Point::new(0.0, 0.0), &style(), &mut canvas);
        r.advance(Point::new(10.0, 0.0), &style(), &mut canvas);
        r.advance(Point::new(20.0, 10.0), &style(), &mut canvas);

        let segments: Vec<CurveSegment> = canvas
            .ops()
            .iter()
            .filter_map(|op| match op {
                CanvasOp::Curve { segment, .. } => Some(*segment),
                _ => None,
            })
            .collect();
        assert_eq!(
            segments,
            vec![
                CurveSegment {
                    start: Point::new(0.0, 0.0),
                    control: Point::new(0.0, 0.0),
                    end: Point::new(5.0, 0.0),
                },
                CurveSegment {
                    start: Point::new(5.0, 0.0),
                    control: Point::new(10.0, 0.0),
                    end: Point::new(15.0, 5.0),
                },
            ]
        );
    }

    #[test]
    fn test_reset_starts_new_stroke() {
        let mut r = StrokeRenderer::new();
        let mut canvas = CanvasRecorder::new();
        r.advance(Point::new(0.0, 0.0), &style(), &mut canvas);
        r.reset();
        assert!(!r.is_drawing());
        assert_eq!(r.advance(Point::new(50.0, 0.0), &style(), &mut canvas), StrokeStep::Dot);
    }

    #[test]
    fn test_eraser_style() {
        let s = StrokeStyle::eraser(40.0);
        assert_eq!(s.composite, CompositeMode::Subtractive);
        assert_eq!(StrokeStyle::brush(0.0, "#fff").width, 1.0);
    }

    #[test]
    fn test_op_sexp() {
        let op = CanvasOp::Curve {
            segment: CurveSegment {
                start: Point::new(0.0, 0.0),
                control: Point::new(1.0, 2.0),
                end: Point::new(3.0, 4.0),
            },
            style: StrokeStyle::eraser(40.0),
        };
        let sexp = op.to_sexp();
        assert!(sexp.contains(":event :draw-curve"));
        assert!(sexp.contains(":control (1.0 2.0)"));
        assert!(sexp.contains(":composite :subtractive"));

        let mut canvas = CanvasRecorder::new();
        canvas.clear();
        let drained = canvas.drain();
        assert_eq!(drained[0].to_sexp(), "(:type :event :event :clear-canvas)");
        assert!(canvas.ops().is_empty());
    }

    #[test]
    fn test_op_sexp_escapes_color() {
        let op = CanvasOp::Dot {
            center: Point::new(1.0, 1.0),
            diameter: 5.0,
            style: StrokeStyle::brush(5.0, "#f00\" :composite :normal"),
        };
        let sexp = op.to_sexp();
        assert!(sexp.ends_with(":color \"#f00\\\" :composite :normal\")"));
        let items = lexpr::from_str(&sexp).unwrap().to_vec().unwrap();
        assert_eq!(items.len(), 12);
        assert_eq!(items[11].as_str(), Some("#f00\" :composite :normal"));
    }
}
