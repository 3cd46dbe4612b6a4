//! Gesture classification from hand landmark samples.
//!
//! Two raw classifiers share one debounced state machine: the draw variant
//! recognizes a fist with the thumb tucked, the scroll variant recognizes
//! open hand, closed fist, two pointing shapes and horizontal swipes.  A raw
//! label must persist for `debounce_frames` consecutive frames before the
//! effective state flips, in either direction.

use tracing::debug;

use super::landmarks::{HandLandmark, LandmarkSample};

// ── Gesture labels ─────────────────────────────────────────

/// Per-frame gesture label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GestureLabel {
    None,
    /// Three or more fingers extended, thumb folded.
    OpenHand,
    /// Three or more fingers curled.
    ClosedFist,
    /// Fist with the thumb held inside against the palm.
    FistThumbTucked,
    /// Wrist moved left by more than the swipe threshold since last frame.
    SwipeLeft,
    /// Wrist moved right by more than the swipe threshold since last frame.
    SwipeRight,
    /// Thumb and index extended only.
    PointLeft,
    /// Index and middle extended only.
    PointRight,
}

impl GestureLabel {
    /// String representation for IPC.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::OpenHand => "open-hand",
            Self::ClosedFist => "closed-fist",
            Self::FistThumbTucked => "fist-thumb-tucked",
            Self::SwipeLeft => "swipe-left",
            Self::SwipeRight => "swipe-right",
            Self::PointLeft => "point-left",
            Self::PointRight => "point-right",
        }
    }

    pub fn is_active(&self) -> bool {
        *self != Self::None
    }
}

/// Which raw classifier feeds the debouncer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierVariant {
    /// Fist-with-thumb-tucked detection for drawing.
    Draw,
    /// Directional gestures for scrolling.
    Scroll,
}

impl ClassifierVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draw => "draw",
            Self::Scroll => "scroll",
        }
    }
}

/// Debounced classifier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveGesture {
    Inactive,
    Active(GestureLabel),
}

impl EffectiveGesture {
    pub fn label(&self) -> GestureLabel {
        match self {
            Self::Inactive => GestureLabel::None,
            Self::Active(label) => *label,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}

// ── Events ─────────────────────────────────────────────────

/// Transitions of the effective gesture state.
#[derive(Debug, Clone, PartialEq)]
pub enum GestureEvent {
    /// Effective state went from inactive to an active gesture.
    Engaged { gesture: GestureLabel },
    /// Effective state moved between two active gestures.
    Switched {
        from: GestureLabel,
        to: GestureLabel,
    },
    /// Effective state returned to inactive.
    Released { gesture: GestureLabel },
}

impl GestureEvent {
    /// Convert the event to an IPC s-expression.
    pub fn to_sexp(&self) -> String {
        match self {
            Self::Engaged { gesture } => format!(
                "(:type :event :event :gesture-engaged :gesture :{})",
                gesture.as_str()
            ),
            Self::Switched { from, to } => format!(
                "(:type :event :event :gesture-switched :from :{} :to :{})",
                from.as_str(),
                to.as_str()
            ),
            Self::Released { gesture } => format!(
                "(:type :event :event :gesture-released :gesture :{})",
                gesture.as_str()
            ),
        }
    }
}

// ── Config ─────────────────────────────────────────────────

/// Thresholds for the raw classifiers and the debouncer.  Distances are in
/// normalized frame units.
#[derive(Debug, Clone)]
pub struct GestureConfig {
    /// Consecutive frames a raw label must persist to flip the effective state.
    pub debounce_frames: u32,
    /// Tolerance for a fingertip to count as closed (draw variant).
    pub closed_tolerance: f32,
    /// Minimum closed fingers (of four) for a fist candidate.
    pub min_closed_fingers: usize,
    /// Margin for the thumb tip to count as below the finger bases.
    pub thumb_under_margin: f32,
    /// Maximum thumb-tip to index-base distance for "near the palm".
    pub thumb_near_palm: f32,
    /// Thumb-to-wrist must be under this fraction of index-to-wrist.
    pub thumb_closer_ratio: f32,
    /// How far a tip must sit above its PIP joint to count as extended.
    pub extended_margin: f32,
    /// Horizontal wrist delta per frame that counts as a swipe.
    pub swipe_threshold: f32,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            debounce_frames: 3,
            closed_tolerance: 0.02,
            min_closed_fingers: 2,
            thumb_under_margin: 0.03,
            thumb_near_palm: 0.20,
            thumb_closer_ratio: 0.9,
            extended_margin: 0.05,
            swipe_threshold: 0.08,
        }
    }
}

// ── Raw classifiers ────────────────────────────────────────

/// Whether the sample shows a fist (at least `min_closed_fingers` curled)
/// with the thumb tucked against the palm.  Returns `false` on any missing
/// landmark.
pub fn is_fist_thumb_tucked(sample: &LandmarkSample, config: &GestureConfig) -> bool {
    fist_thumb_tucked(sample, config).unwrap_or(false)
}

fn fist_thumb_tucked(sample: &LandmarkSample, config: &GestureConfig) -> Option<bool> {
    use HandLandmark::*;

    if !sample.is_complete() {
        return None;
    }

    let t = config.closed_tolerance;
    let closed = |tip: HandLandmark, joint: HandLandmark| -> Option<bool> {
        Some(sample.get(tip)?.y > sample.get(joint)?.y - t)
    };

    let index_closed = closed(IndexTip, IndexPip)? && closed(IndexTip, IndexDip)?;
    let middle_closed = closed(MiddleTip, MiddlePip)?;
    let ring_closed = closed(RingTip, RingPip)?;
    let pinky_closed = closed(PinkyTip, PinkyPip)?;

    let closed_count = [index_closed, middle_closed, ring_closed, pinky_closed]
        .iter()
        .filter(|c| **c)
        .count();
    if closed_count < config.min_closed_fingers {
        return Some(false);
    }

    let thumb_tip = sample.get(ThumbTip)?;
    let thumb_ip = sample.get(ThumbIp)?;
    let index_base = sample.get(IndexMcp)?;
    let middle_base = sample.get(MiddleMcp)?;
    let wrist = sample.get(Wrist)?;
    let index_tip = sample.get(IndexTip)?;

    let m = config.thumb_under_margin;
    let under_fingers = thumb_tip.y > index_base.y - m && thumb_tip.y > middle_base.y - m;
    let bent = thumb_tip.y > thumb_ip.y;
    let closer_to_wrist =
        thumb_tip.distance(wrist) < index_tip.distance(wrist) * config.thumb_closer_ratio;

    // Orientation varies too much for a single test; the palm check gates all three.
    let near_palm = thumb_tip.distance(index_base) < config.thumb_near_palm;

    Some(near_palm && (under_fingers || bent || closer_to_wrist))
}

/// Per-finger extension summary used by the scroll variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FingerStates {
    thumb_extended: bool,
    /// Index, middle, ring, pinky.
    extended: [bool; 4],
    closed: [bool; 4],
}

impl FingerStates {
    fn extended_count(&self) -> usize {
        self.extended.iter().filter(|e| **e).count()
    }

    fn closed_count(&self) -> usize {
        self.closed.iter().filter(|c| **c).count()
    }
}

fn finger_states(sample: &LandmarkSample, config: &GestureConfig) -> Option<FingerStates> {
    use HandLandmark::*;

    let pairs = [
        (IndexTip, IndexPip),
        (MiddleTip, MiddlePip),
        (RingTip, RingPip),
        (PinkyTip, PinkyPip),
    ];

    let mut states = FingerStates {
        thumb_extended: sample.get(ThumbTip)?.x < sample.get(ThumbIp)?.x,
        ..Default::default()
    };
    for (i, (tip, pip)) in pairs.iter().enumerate() {
        let tip = sample.get(*tip)?;
        let pip = sample.get(*pip)?;
        states.extended[i] = tip.y < pip.y - config.extended_margin;
        states.closed[i] = tip.y > pip.y;
    }
    Some(states)
}

/// Scroll-variant raw label.  Swipe detection runs first and short-circuits
/// the finger-shape checks; `previous_wrist_x` is updated whenever the wrist
/// is visible.
pub fn classify_scroll(
    sample: &LandmarkSample,
    previous_wrist_x: &mut Option<f32>,
    config: &GestureConfig,
) -> GestureLabel {
    if !sample.is_complete() {
        return GestureLabel::None;
    }

    let Some(wrist) = sample.get(HandLandmark::Wrist) else {
        return GestureLabel::None;
    };

    let previous = previous_wrist_x.replace(wrist.x);
    if let Some(prev_x) = previous {
        let dx = wrist.x - prev_x;
        if dx > config.swipe_threshold {
            return GestureLabel::SwipeRight;
        } else if dx < -config.swipe_threshold {
            return GestureLabel::SwipeLeft;
        }
    }

    let Some(f) = finger_states(sample, config) else {
        return GestureLabel::None;
    };
    let [index, middle, ring, pinky] = f.extended;

    if f.extended_count() >= 3 && !f.thumb_extended {
        GestureLabel::OpenHand
    } else if f.closed_count() >= 3 {
        GestureLabel::ClosedFist
    } else if f.thumb_extended && index && !middle && !ring && !pinky {
        GestureLabel::PointLeft
    } else if !f.thumb_extended && index && middle && !ring && !pinky {
        GestureLabel::PointRight
    } else {
        GestureLabel::None
    }
}

// ── Classifier ─────────────────────────────────────────────

/// Debounced gesture classifier.  Owns the previous wrist x-position and the
/// consecutive-frame counters.
pub struct GestureClassifier {
    /// Configuration.
    pub config: GestureConfig,
    variant: ClassifierVariant,
    effective: EffectiveGesture,
    /// Active label currently accumulating frames.
    candidate: GestureLabel,
    /// Consecutive frames `candidate` has been observed.
    candidate_frames: u32,
    /// Consecutive frames with no active raw label.
    none_frames: u32,
    /// Raw label from the latest frame.
    last_raw: GestureLabel,
    previous_wrist_x: Option<f32>,
}

impl GestureClassifier {
    pub fn new(variant: ClassifierVariant) -> Self {
        Self {
            config: GestureConfig::default(),
            variant,
            effective: EffectiveGesture::Inactive,
            candidate: GestureLabel::None,
            candidate_frames: 0,
            none_frames: 0,
            last_raw: GestureLabel::None,
            previous_wrist_x: None,
        }
    }

    pub fn variant(&self) -> ClassifierVariant {
        self.variant
    }

    /// Switch raw classifier.  Resets all state.
    pub fn set_variant(&mut self, variant: ClassifierVariant) {
        if self.variant != variant {
            debug!("Gesture classifier variant: {}", variant.as_str());
        }
        self.variant = variant;
        self.reset();
    }

    pub fn effective(&self) -> EffectiveGesture {
        self.effective
    }

    pub fn is_engaged(&self) -> bool {
        self.effective.is_active()
    }

    pub fn last_raw(&self) -> GestureLabel {
        self.last_raw
    }

    /// Raw (undebounced) label for one sample.
    pub fn classify_raw(&mut self, sample: &LandmarkSample) -> GestureLabel {
        match self.variant {
            ClassifierVariant::Draw => {
                if is_fist_thumb_tucked(sample, &self.config) {
                    GestureLabel::FistThumbTucked
                } else {
                    GestureLabel::None
                }
            }
            ClassifierVariant::Scroll => {
                classify_scroll(sample, &mut self.previous_wrist_x, &self.config)
            }
        }
    }

    /// Process one frame.  `None` means the provider reported no hand, which
    /// releases immediately and clears the counters.
    pub fn update(&mut self, sample: Option<&LandmarkSample>) -> Option<GestureEvent> {
        match sample {
            Some(sample) => {
                let raw = self.classify_raw(sample);
                self.observe(raw)
            }
            None => self.lose_tracking(),
        }
    }

    /// Feed one raw label through the debouncer.
    pub fn observe(&mut self, raw: GestureLabel) -> Option<GestureEvent> {
        self.last_raw = raw;
        let needed = self.config.debounce_frames.max(1);

        if raw.is_active() {
            self.none_frames = 0;
            if raw == self.candidate {
                self.candidate_frames = self.candidate_frames.saturating_add(1);
            } else {
                self.candidate = raw;
                self.candidate_frames = 1;
            }

            if self.candidate_frames < needed {
                return None;
            }
            match self.effective {
                EffectiveGesture::Active(current) if current == raw => None,
                EffectiveGesture::Active(current) => {
                    self.effective = EffectiveGesture::Active(raw);
                    debug!("Gesture switched: {} -> {}", current.as_str(), raw.as_str());
                    Some(GestureEvent::Switched {
                        from: current,
                        to: raw,
                    })
                }
                EffectiveGesture::Inactive => {
                    self.effective = EffectiveGesture::Active(raw);
                    debug!("Gesture engaged: {}", raw.as_str());
                    Some(GestureEvent::Engaged { gesture: raw })
                }
            }
        } else {
            self.candidate = GestureLabel::None;
            self.candidate_frames = 0;
            self.none_frames = self.none_frames.saturating_add(1);

            match self.effective {
                EffectiveGesture::Active(current) if self.none_frames >= needed => {
                    self.effective = EffectiveGesture::Inactive;
                    debug!("Gesture released: {}", current.as_str());
                    Some(GestureEvent::Released { gesture: current })
                }
                _ => None,
            }
        }
    }

    /// Hand left the frame: drop to inactive without waiting for the
    /// debounce and forget the wrist history.
    pub fn lose_tracking(&mut self) -> Option<GestureEvent> {
        let event = match self.effective {
            EffectiveGesture::Active(gesture) => Some(GestureEvent::Released { gesture }),
            EffectiveGesture::Inactive => None,
        };
        self.reset();
        event
    }

    /// Reset all gesture state.
    pub fn reset(&mut self) {
        self.effective = EffectiveGesture::Inactive;
        self.candidate = GestureLabel::None;
        self.candidate_frames = 0;
        self.none_frames = 0;
        self.last_raw = GestureLabel::None;
        self.previous_wrist_x = None;
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        format!(
            "(:variant :{} :engaged {} :gesture :{} :raw :{} :candidate-frames {} :none-frames {})",
            self.variant.as_str(),
            if self.is_engaged() { "t" } else { "nil" },
            self.effective.label().as_str(),
            self.last_raw.as_str(),
            self.candidate_frames,
            self.none_frames,
        )
    }

    /// Generate s-expression for IPC config.
    pub fn config_sexp(&self) -> String {
        format!(
            "(:debounce-frames {} :closed-tolerance {:.3} :min-closed-fingers {} :thumb-under-margin {:.3} :thumb-near-palm {:.3} :thumb-closer-ratio {:.2} :extended-margin {:.3} :swipe-threshold {:.3})",
            self.config.debounce_frames,
            self.config.closed_tolerance,
            self.config.min_closed_fingers,
            self.config.thumb_under_margin,
            self.config.thumb_near_palm,
            self.config.thumb_closer_ratio,
            self.config.extended_margin,
            self.config.swipe_threshold,
        )
    }
}

// ── Test helpers ───────────────────────────────────────────

/// Upright hand (y grows downward): all four fingers extended well above
/// their PIP joints, thumb folded (tip right of its IP joint).
#[cfg(test)]
pub(crate) fn open_hand_points() -> Vec<super::landmarks::Point> {
    use super::landmarks::Point;
    vec![
        Point::new(0.50, 0.90), // wrist
        Point::new(0.45, 0.85), // thumb cmc
        Point::new(0.42, 0.80), // thumb mcp
        Point::new(0.44, 0.76), // thumb ip
        Point::new(0.48, 0.74), // thumb tip
        Point::new(0.45, 0.70), // index mcp
        Point::new(0.45, 0.60), // index pip
        Point::new(0.45, 0.52), // index dip
        Point::new(0.45, 0.45), // index tip
        Point::new(0.50, 0.70), // middle mcp
        Point::new(0.50, 0.58), // middle pip
        Point::new(0.50, 0.50), // middle dip
        Point::new(0.50, 0.42), // middle tip
        Point::new(0.55, 0.71), // ring mcp
        Point::new(0.55, 0.60), // ring pip
        Point::new(0.55, 0.53), // ring dip
        Point::new(0.55, 0.47), // ring tip
        Point::new(0.60, 0.73), // pinky mcp
        Point::new(0.60, 0.64), // pinky pip
        Point::new(0.60, 0.58), // pinky dip
        Point::new(0.60, 0.53), // pinky tip
    ]
}

/// Curled fist with the thumb tip folded down next to the index base.
#[cfg(test)]
pub(crate) fn fist_thumb_tucked_points() -> Vec<super::landmarks::Point> {
    use super::landmarks::Point;
    vec![
        Point::new(0.50, 0.90), // wrist
        Point::new(0.45, 0.85), // thumb cmc
        Point::new(0.43, 0.80), // thumb mcp
        Point::new(0.44, 0.74), // thumb ip
        Point::new(0.47, 0.76), // thumb tip (below ip: bent)
        Point::new(0.45, 0.70), // index mcp
        Point::new(0.45, 0.66), // index pip
        Point::new(0.45, 0.70), // index dip
        Point::new(0.45, 0.74), // index tip
        Point::new(0.50, 0.70), // middle mcp
        Point::new(0.50, 0.66), // middle pip
        Point::new(0.50, 0.70), // middle dip
        Point::new(0.50, 0.74), // middle tip
        Point::new(0.55, 0.71), // ring mcp
        Point::new(0.55, 0.67), // ring pip
        Point::new(0.55, 0.71), // ring dip
        Point::new(0.55, 0.75), // ring tip
        Point::new(0.60, 0.73), // pinky mcp
        Point::new(0.60, 0.69), // pinky pip
        Point::new(0.60, 0.72), // pinky dip
        Point::new(0.60, 0.76), // pinky tip
    ]
}

#[cfg(test)]
fn set_point(points: &mut [super::landmarks::Point], lm: HandLandmark, x: f32, y: f32) {
    points[lm.index()] = super::landmarks::Point::new(x, y);
}

// ── Tests ──────────────────────────────────────────────────
