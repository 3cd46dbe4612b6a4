//! Control activation by pinch or dwell, with a shared cooldown.
//!
//! A hovered zone fires immediately on pinch, or after the pointer has
//! rested on the same zone for the dwell period.  Any firing starts a
//! cooldown during which nothing else fires.

use tracing::debug;

use super::controls::ZoneId;
use super::landmarks::{HandLandmark, LandmarkSample};

#[derive(Debug, Clone)]
pub struct ActivationConfig {
    /// Thumb-tip to index-tip distance (normalized) that counts as a pinch.
    pub pinch_threshold: f32,
    /// Milliseconds of continuous hover before a dwell firing.
    pub dwell_ms: u64,
    /// Milliseconds after a firing during which nothing fires.
    pub cooldown_ms: u64,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            pinch_threshold: 0.05,
            dwell_ms: 700,
            cooldown_ms: 500,
        }
    }
}

/// Whether thumb tip and index tip are pinched together.  Missing landmarks
/// never pinch.
pub fn is_pinching(sample: &LandmarkSample, config: &ActivationConfig) -> bool {
    sample
        .distance(HandLandmark::ThumbTip, HandLandmark::IndexTip)
        .is_some_and(|d| d < config.pinch_threshold)
}

/// Zone currently under the pointer and when the hover on it began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoverState {
    pub zone: ZoneId,
    pub since_ms: u64,
}

/// Decides when a hovered control fires.
#[derive(Debug, Default)]
pub struct ActivationArbiter {
    pub config: ActivationConfig,
    hover: Option<HoverState>,
    last_fired_ms: Option<u64>,
}

impl ActivationArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one frame.  Returns the zone to fire, if any.
    pub fn update(&mut self, hit: Option<ZoneId>, pinching: bool, now_ms: u64) -> Option<ZoneId> {
        let Some(zone) = hit else {
            self.hover = None;
            return None;
        };

        let mut fired = None;
        if pinching {
            fired = self.try_fire(zone, now_ms, "pinch");
        }

        match self.hover {
            Some(h) if h.zone == zone => {
                if !pinching && now_ms.saturating_sub(h.since_ms) >= self.config.dwell_ms {
                    fired = self.try_fire(zone, now_ms, "dwell").or(fired);
                    // Restarts on the next frame still hovering this zone.
                    self.hover = None;
                }
            }
            _ => {
                self.hover = Some(HoverState {
                    zone,
                    since_ms: now_ms,
                });
            }
        }

        fired
    }

    fn try_fire(&mut self, zone: ZoneId, now_ms: u64, cause: &str) -> Option<ZoneId> {
        if self.in_cooldown(now_ms) {
            debug!(zone = %zone.as_str(), cause, "Activation suppressed by cooldown");
            return None;
        }
        self.last_fired_ms = Some(now_ms);
        debug!(zone = %zone.as_str(), cause, "Control activated");
        Some(zone)
    }

    pub fn in_cooldown(&self, now_ms: u64) -> bool {
        self.last_fired_ms
            .is_some_and(|last| now_ms.saturating_sub(last) <= self.config.cooldown_ms)
    }

    pub fn hover(&self) -> Option<HoverState> {
        self.hover
    }

    /// Fraction of the dwell period elapsed on the hovered zone (0.0-1.0).
    pub fn dwell_progress(&self, now_ms: u64) -> f32 {
        match self.hover {
            Some(h) if self.config.dwell_ms > 0 => {
                (now_ms.saturating_sub(h.since_ms) as f32 / self.config.dwell_ms as f32).min(1.0)
            }
            Some(_) => 1.0,
            None => 0.0,
        }
    }

    /// Clear hover tracking.  The cooldown survives so a session restart
    /// cannot double-fire.
    pub fn reset(&mut self) {
        self.hover = None;
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self, now_ms: u64) -> String {
        format!(
            "(:hover {} :dwell-progress {:.2} :cooldown {})",
            self.hover
                .map(|h| format!("\"{}\"", h.zone.as_str()))
                .unwrap_or_else(|| "nil".to_string()),
            self.dwell_progress(now_ms),
            if self.in_cooldown(now_ms) { "t" } else { "nil" },
        )
    }

    pub fn config_sexp(&self) -> String {
        format!(
            "(:pinch-threshold {:.3} :dwell-ms {} :cooldown-ms {})",
            self.config.pinch_threshold, self.config.dwell_ms, self.config.cooldown_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::landmarks::{Point, LANDMARK_COUNT};

    fn pinch_sample(gap: f32) -> LandmarkSample {
        let mut points = vec![Point::new(0.5, 0.5); LANDMARK_COUNT];
        points[HandLandmark::ThumbTip.index()] = Point::new(0.40, 0.40);
        points[HandLandmark::IndexTip.index()] = Point::new(0.40 + gap, 0.40);
        LandmarkSample::new(points)
    }

    #[test]
    fn test_pinch_predicate() {
        let config = ActivationConfig::default();
        assert!(is_pinching(&pinch_sample(0.02), &config));
        assert!(!is_pinching(&pinch_sample(0.08), &config));
        let short = LandmarkSample::new(vec![Point::new(0.4, 0.4); 6]);
        assert!(!is_pinching(&short, &config));
    }

    #[test]
    fn test_dwell_fires_at_threshold() {
        let mut a = ActivationArbiter::new();
        assert_eq!(a.update(Some(ZoneId::Brush), false, 0), None);
        assert_eq!(a.update(Some(ZoneId::Brush), false, 350), None);
        assert_eq!(a.update(Some(ZoneId::Brush), false, 699), None);
        assert_eq!(a.update(Some(ZoneId::Brush), false, 700), Some(ZoneId::Brush));
    }

    #[test]
    fn test_changing_zone_resets_dwell() {
        let mut a = ActivationArbiter::new();
        a.update(Some(ZoneId::Brush), false, 0);
        a.update(Some(ZoneId::Eraser), false, 600);
        assert_eq!(a.update(Some(ZoneId::Eraser), false, 1000), None);
        assert_eq!(a.update(Some(ZoneId::Eraser), false, 1300), Some(ZoneId::Eraser));
    }

    #[test]
    fn test_leaving_zones_resets_dwell() {
        let mut a = ActivationArbiter::new();
        a.update(Some(ZoneId::Brush), false, 0);
        a.update(None, false, 500);
        assert!(a.hover().is_none());
        a.update(Some(ZoneId::Brush), false, 600);
        assert_eq!(a.update(Some(ZoneId::Brush), false, 800), None);
    }

    #[test]
    fn test_pinch_fires_immediately() {
        let mut a = ActivationArbiter::new();
        assert_eq!(
            a.update(Some(ZoneId::Color(2)), true, 10),
            Some(ZoneId::Color(2))
        );
    }

    #[test]
    fn test_pinch_without_zone_does_nothing() {
        let mut a = ActivationArbiter::new();
        assert_eq!(a.update(None, true, 10), None);
        assert!(!a.in_cooldown(10));
    }

    #[test]
    fn test_cooldown_single_firing() {
        let mut a = ActivationArbiter::new();
        assert_eq!(a.update(Some(ZoneId::Brush), true, 1000), Some(ZoneId::Brush));
        assert_eq!(a.update(Some(ZoneId::Brush), true, 1200), None);
        assert_eq!(a.update(Some(ZoneId::Eraser), true, 1499), None);
        // The window is inclusive of its last millisecond.
        assert_eq!(a.update(Some(ZoneId::Eraser), true, 1500), None);
        assert!(a.in_cooldown(1500));
        assert_eq!(a.update(Some(ZoneId::Eraser), true, 1501), Some(ZoneId::Eraser));
    }

    #[test]
    fn test_dwell_then_pinch_within_cooldown() {
        let mut a = ActivationArbiter::new();
        a.update(Some(ZoneId::Brush), false, 0);
        assert_eq!(a.update(Some(ZoneId::Brush), false, 700), Some(ZoneId::Brush));
        assert_eq!(a.update(Some(ZoneId::Brush), true, 900), None);
    }

    #[test]
    fn test_dwell_refires_each_period() {
        let mut a = ActivationArbiter::new();
        a.update(Some(ZoneId::Brush), false, 0);
        assert_eq!(a.update(Some(ZoneId::Brush), false, 700), Some(ZoneId::Brush));
        // Hover restarts at the next frame.
        assert_eq!(a.update(Some(ZoneId::Brush), false, 733), None);
        assert_eq!(a.update(Some(ZoneId::Brush), false, 1432), None);
        assert_eq!(a.update(Some(ZoneId::Brush), false, 1433), Some(ZoneId::Brush));
    }

    #[test]
    fn test_first_firing_not_in_cooldown() {
        let mut a = ActivationArbiter::new();
        assert_eq!(a.update(Some(ZoneId::Brush), true, 0), Some(ZoneId::Brush));
    }

    #[test]
    fn test_dwell_progress_and_status() {
        let mut a = ActivationArbiter::new();
        assert_eq!(a.dwell_progress(0), 0.0);
        a.update(Some(ZoneId::Eraser), false, 100);
        assert!((a.dwell_progress(450) - 0.5).abs() < 1e-3);
        let sexp = a.status_sexp(450);
        assert!(sexp.contains(":hover \"eraser\""));
        assert!(sexp.contains(":dwell-progress 0.50"));
        assert!(sexp.contains(":cooldown nil"));
        assert_eq!(
            a.config_sexp(),
            "(:pinch-threshold 0.050 :dwell-ms 700 :cooldown-ms 500)"
        );
    }
}
