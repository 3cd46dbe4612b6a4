//! Adaptive exponential smoothing of the index fingertip pointer.
//!
//! The camera feed is mirrored relative to the canvas, so the fingertip x is
//! flipped when mapped into pixel space.  Smoothing is heavier while an
//! action is engaged and nearly transparent while hovering.

use super::landmarks::{HandLandmark, LandmarkSample, Point};

/// Filter strengths.  `alpha` is the weight of the new raw sample.
#[derive(Debug, Clone)]
pub struct PointerConfig {
    /// Alpha while drawing or scrolling (steadier).
    pub alpha_engaged: f32,
    /// Alpha while idle (responsive hover).
    pub alpha_idle: f32,
}

impl Default for PointerConfig {
    fn default() -> Self {
        Self {
            alpha_engaged: 0.65,
            alpha_idle: 0.95,
        }
    }
}

/// Pointer in canvas pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerState {
    /// Latest unsmoothed position.
    pub raw: Point,
    /// Filter output.
    pub smoothed: Point,
    /// Filter output from the previous sample, if any.
    pub previous: Option<Point>,
}

/// Map the index fingertip of a sample into canvas pixels, mirroring x.
/// Returns `None` for a degenerate canvas or a missing fingertip.
pub fn fingertip_to_canvas(sample: &LandmarkSample, width: u32, height: u32) -> Option<Point> {
    if width == 0 || height == 0 {
        return None;
    }
    let tip = sample.get(HandLandmark::IndexTip)?;
    if !tip.x.is_finite() || !tip.y.is_finite() {
        return None;
    }
    Some(Point::new(
        (1.0 - tip.x) * width as f32,
        tip.y * height as f32,
    ))
}

/// EMA filter over pointer positions.
#[derive(Debug, Default)]
pub struct PointerSmoother {
    pub config: PointerConfig,
    state: Option<PointerState>,
}

impl PointerSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw position.  The first sample after a reset seeds the
    /// filter directly.
    pub fn smooth(&mut self, raw: Point, engaged: bool) -> Point {
        let alpha = if engaged {
            self.config.alpha_engaged
        } else {
            self.config.alpha_idle
        }
        .clamp(f32::EPSILON, 1.0);

        let next = match self.state {
            Some(prev) => PointerState {
                raw,
                smoothed: Point::new(
                    alpha * raw.x + (1.0 - alpha) * prev.smoothed.x,
                    alpha * raw.y + (1.0 - alpha) * prev.smoothed.y,
                ),
                previous: Some(prev.smoothed),
            },
            None => PointerState {
                raw,
                smoothed: raw,
                previous: None,
            },
        };
        self.state = Some(next);
        next.smoothed
    }

    /// Forget the filter state.
    pub fn reset(&mut self) {
        self.state = None;
    }

    pub fn state(&self) -> Option<&PointerState> {
        self.state.as_ref()
    }

    pub fn smoothed(&self) -> Option<Point> {
        self.state.map(|s| s.smoothed)
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        match &self.state {
            Some(s) => format!(
                "(:raw ({:.1} {:.1}) :smoothed ({:.1} {:.1}))",
                s.raw.x, s.raw.y, s.smoothed.x, s.smoothed.y
            ),
            None => "nil".to_string(),
        }
    }

    pub fn config_sexp(&self) -> String {
        format!(
            "(:alpha-engaged {:.2} :alpha-idle {:.2})",
            self.config.alpha_engaged, self.config.alpha_idle
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::landmarks::LANDMARK_COUNT;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_first_sample_seeds() {
        let mut s = PointerSmoother::new();
        let p = s.smooth(Point::new(100.0, 200.0), true);
        assert_eq!(p, Point::new(100.0, 200.0));
        assert!(s.state().unwrap().previous.is_none());
    }

    #[test]
    fn test_alpha_depends_on_engagement() {
        let mut s = PointerSmoother::new();
        s.smooth(Point::new(0.0, 0.0), true);
        let p = s.smooth(Point::new(100.0, 0.0), true);
        assert!(approx(p.x, 65.0), "engaged: {}", p.x);

        let mut s = PointerSmoother::new();
        s.smooth(Point::new(0.0, 0.0), false);
        let p = s.smooth(Point::new(100.0, 0.0), false);
        assert!(approx(p.x, 95.0), "idle: {}", p.x);
        assert_eq!(s.state().unwrap().previous, Some(Point::new(0.0, 0.0)));
    }

    #[test]
    fn test_converges_without_overshoot() {
        let mut s = PointerSmoother::new();
        s.smooth(Point::new(0.0, 0.0), true);
        let target = Point::new(300.0, -120.0);
        let mut last = 0.0_f32;
        for _ in 0..40 {
            let p = s.smooth(target, true);
            assert!(p.x <= target.x && p.x >= last);
            assert!(p.y >= target.y);
            last = p.x;
        }
        let p = s.smoothed().unwrap();
        assert!(approx(p.x, target.x) && approx(p.y, target.y));
    }

    #[test]
    fn test_reset_then_seed() {
        let mut s = PointerSmoother::new();
        s.smooth(Point::new(10.0, 10.0), true);
        s.reset();
        assert!(s.smoothed().is_none());
        assert_eq!(s.status_sexp(), "nil");

        let p = s.smooth(Point::new(500.0, 400.0), true);
        assert_eq!(p, Point::new(500.0, 400.0));
    }

    #[test]
    fn test_fingertip_mirrored() {
        let mut points = vec![Point::new(0.5, 0.5); LANDMARK_COUNT];
        points[HandLandmark::IndexTip.index()] = Point::new(0.25, 0.5);
        let sample = LandmarkSample::new(points);
        let p = fingertip_to_canvas(&sample, 800, 600).unwrap();
        assert!(approx(p.x, 600.0));
        assert!(approx(p.y, 300.0));
    }

    #[test]
    fn test_fingertip_degenerate_canvas() {
        let sample = LandmarkSample::new(vec![Point::new(0.5, 0.5); LANDMARK_COUNT]);
        assert!(fingertip_to_canvas(&sample, 0, 600).is_none());
        assert!(fingertip_to_canvas(&sample, 800, 0).is_none());
        let short = LandmarkSample::new(vec![Point::new(0.5, 0.5); 5]);
        assert!(fingertip_to_canvas(&short, 800, 600).is_none());
    }

    #[test]
    fn test_fingertip_non_finite() {
        let mut points = vec![Point::new(0.5, 0.5); LANDMARK_COUNT];
        points[HandLandmark::IndexTip.index()] = Point::new(f32::NAN, 0.5);
        assert!(fingertip_to_canvas(&LandmarkSample::new(points.clone()), 800, 600).is_none());
        points[HandLandmark::IndexTip.index()] = Point::new(0.5, f32::INFINITY);
        assert!(fingertip_to_canvas(&LandmarkSample::new(points), 800, 600).is_none());
    }

    #[test]
    fn test_sexp() {
        let mut s = PointerSmoother::new();
        s.smooth(Point::new(1.0, 2.0), false);
        assert_eq!(s.status_sexp(), "(:raw (1.0 2.0) :smoothed (1.0 2.0))");
        assert_eq!(s.config_sexp(), "(:alpha-engaged 0.65 :alpha-idle 0.95)");
    }
}
