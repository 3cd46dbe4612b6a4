//! Hand landmark samples as delivered by the pose-estimation provider.
//!
//! Models the 21 normalized 2D keypoints per hand (wrist plus four joints per
//! finger).  The provider yields zero or one sample per video frame; only the
//! first detected hand is used.  Samples may arrive short or carry garbage
//! coordinates, so every accessor returns `Option` and callers fail closed.

use tracing::debug;

// ── Landmark definitions ───────────────────────────────────

/// The 21 hand landmarks, in provider index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandLandmark {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexMcp,
    IndexPip,
    IndexDip,
    IndexTip,
    MiddleMcp,
    MiddlePip,
    MiddleDip,
    MiddleTip,
    RingMcp,
    RingPip,
    RingDip,
    RingTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

/// Total number of landmarks per hand.
pub const LANDMARK_COUNT: usize = 21;

impl HandLandmark {
    /// Convert landmark enum to sample index (0-20).
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// String representation for IPC.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wrist => "wrist",
            Self::ThumbCmc => "thumb-cmc",
            Self::ThumbMcp => "thumb-mcp",
            Self::ThumbIp => "thumb-ip",
            Self::ThumbTip => "thumb-tip",
            Self::IndexMcp => "index-mcp",
            Self::IndexPip => "index-pip",
            Self::IndexDip => "index-dip",
            Self::IndexTip => "index-tip",
            Self::MiddleMcp => "middle-mcp",
            Self::MiddlePip => "middle-pip",
            Self::MiddleDip => "middle-dip",
            Self::MiddleTip => "middle-tip",
            Self::RingMcp => "ring-mcp",
            Self::RingPip => "ring-pip",
            Self::RingDip => "ring-dip",
            Self::RingTip => "ring-tip",
            Self::PinkyMcp => "pinky-mcp",
            Self::PinkyPip => "pinky-pip",
            Self::PinkyDip => "pinky-dip",
            Self::PinkyTip => "pinky-tip",
        }
    }
}

// ── Point ──────────────────────────────────────────────────

/// A 2D position.  Normalized `[0,1]²` for landmarks, pixels for pointers.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Point halfway between `self` and `other`.
    pub fn midpoint(&self, other: Point) -> Point {
        Point {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

// ── Sample ─────────────────────────────────────────────────

/// One frame's landmarks for the first detected hand.  Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSample {
    points: Vec<Point>,
}

impl LandmarkSample {
    /// Wrap provider points as-is.  Short samples are accepted; lookups on
    /// missing indices return `None`.
    pub fn new(points: Vec<Point>) -> Self {
        if points.len() != LANDMARK_COUNT {
            debug!(
                "Landmark sample: expected {} points, got {}",
                LANDMARK_COUNT,
                points.len(),
            );
        }
        Self { points }
    }

    pub fn from_pairs(pairs: &[(f32, f32)]) -> Self {
        Self::new(pairs.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether all 21 landmarks are present.
    pub fn is_complete(&self) -> bool {
        self.points.len() >= LANDMARK_COUNT
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Position of one landmark, or `None` if missing or non-finite.
    pub fn get(&self, landmark: HandLandmark) -> Option<Point> {
        self.points
            .get(landmark.index())
            .copied()
            .filter(Point::is_finite)
    }

    /// Planar distance between two landmarks (normalized units).
    pub fn distance(&self, a: HandLandmark, b: HandLandmark) -> Option<f32> {
        Some(self.get(a)?.distance(self.get(b)?))
    }
}

// ── Buffer ─────────────────────────────────────────────────

/// Latest sample received from the provider and frame counters.  Holds no
/// interpretation logic; the classifier keeps its own previous wrist x.
#[derive(Debug, Default)]
pub struct LandmarkBuffer {
    /// Most recent sample, `None` when the last frame had no hand.
    latest: Option<LandmarkSample>,
    /// Total frames delivered (with or without a hand).
    pub frames_received: u64,
    /// Frames that carried a hand.
    pub hand_frames: u64,
    /// Provider timestamp of the last frame.
    pub last_timestamp_ms: Option<u64>,
}

impl LandmarkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the frame's sample, replacing the previous one.
    pub fn push(&mut self, sample: Option<LandmarkSample>, timestamp_ms: u64) {
        self.frames_received += 1;
        if sample.is_some() {
            self.hand_frames += 1;
        }
        self.latest = sample;
        self.last_timestamp_ms = Some(timestamp_ms);
    }

    pub fn latest(&self) -> Option<&LandmarkSample> {
        self.latest.as_ref()
    }

    pub fn hand_present(&self) -> bool {
        self.latest.is_some()
    }

    /// Forget all samples and counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        let wrist = self
            .latest
            .as_ref()
            .and_then(|s| s.get(HandLandmark::Wrist))
            .map(|p| format!("({:.3} {:.3})", p.x, p.y))
            .unwrap_or_else(|| "nil".to_string());
        format!(
            "(:hand {} :points {} :wrist {} :frames {} :hand-frames {} :timestamp {})",
            if self.hand_present() { "t" } else { "nil" },
            self.latest.as_ref().map(|s| s.len()).unwrap_or(0),
            wrist,
            self.frames_received,
            self.hand_frames,
            self.last_timestamp_ms
                .map(|t| t.to_string())
                .unwrap_or_else(|| "nil".to_string()),
        )
    }
}

/// A full sample with every landmark at `(0.5, 0.5)`.
#[cfg(test)]
pub(crate) fn test_sample_uniform() -> LandmarkSample {
    LandmarkSample::new(vec![Point::new(0.5, 0.5); LANDMARK_COUNT])
}

// ── Tests ──────────────────────────────────────────────────
