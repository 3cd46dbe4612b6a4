//! Continuous directional scrolling driven by a repeating timer.
//!
//! A single 1-10 speed setting maps to a (step, interval) pair.  At most one
//! direction runs at a time: the actuator always cancels the previous timer
//! before starting the next one.

use std::time::Duration;

use calloop::timer::{TimeoutAction, Timer};
use calloop::{LoopHandle, RegistrationToken};
use tracing::{debug, warn};

use super::gesture::GestureLabel;

/// Pixels moved by a one-shot host nudge.
pub const NUDGE_PX: f64 = 100.0;

pub const MIN_SPEED: u8 = 1;
pub const MAX_SPEED: u8 = 10;

// ── Direction and speed ────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }

    /// Direction a gesture scrolls in, if any.
    pub fn from_gesture(label: GestureLabel) -> Option<Self> {
        match label {
            GestureLabel::OpenHand => Some(Self::Up),
            GestureLabel::ClosedFist => Some(Self::Down),
            GestureLabel::SwipeLeft | GestureLabel::PointLeft => Some(Self::Left),
            GestureLabel::SwipeRight | GestureLabel::PointRight => Some(Self::Right),
            GestureLabel::None | GestureLabel::FistThumbTucked => None,
        }
    }

    /// Viewport offset change for one step of `amount` pixels.
    pub fn delta(&self, amount: f64) -> (f64, f64) {
        match self {
            Self::Up => (0.0, -amount),
            Self::Down => (0.0, amount),
            Self::Left => (-amount, 0.0),
            Self::Right => (amount, 0.0),
        }
    }
}

/// Step in pixels and tick interval in milliseconds for a speed setting.
/// Higher speeds trade larger steps for shorter intervals.
pub fn speed_values(speed: u8) -> (u32, u64) {
    match speed {
        1 => (1, 50),
        2 => (2, 40),
        3 => (3, 35),
        4 => (4, 30),
        5 => (5, 25),
        6 => (7, 20),
        7 => (10, 15),
        8 => (15, 12),
        9 => (20, 10),
        10 => (30, 8),
        _ => (10, 15),
    }
}

pub fn clamp_speed(speed: i64) -> u8 {
    speed.clamp(MIN_SPEED as i64, MAX_SPEED as i64) as u8
}

/// One-shot manual scroll, independent of any running timer.
pub fn nudge(direction: ScrollDirection, viewport: &mut dyn Viewport) {
    let (dx, dy) = direction.delta(NUDGE_PX);
    viewport.scroll_by(dx, dy);
}

// ── Collaborators ──────────────────────────────────────────

/// Scrollable document view.  The actuator only issues offset deltas.
pub trait Viewport {
    fn scroll_by(&mut self, dx: f64, dy: f64);
}

/// One repeating scroll job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollTick {
    pub dx: f64,
    pub dy: f64,
    pub interval: Duration,
}

/// Source of cancellable repeating timers.  `start` returns the capability
/// that `cancel` consumes; `None` means the timer could not be started.
pub trait ScrollScheduler {
    type Handle;

    fn start(&mut self, tick: ScrollTick) -> Option<Self::Handle>;
    fn cancel(&mut self, handle: Self::Handle);
}

/// Scheduler backed by calloop timers on the host event loop.  Each tick
/// calls `Viewport::scroll_by` on the loop data.
pub struct CalloopScheduler<D: 'static> {
    handle: LoopHandle<'static, D>,
}

impl<D: Viewport + 'static> CalloopScheduler<D> {
    pub fn new(handle: LoopHandle<'static, D>) -> Self {
        Self { handle }
    }
}

impl<D: Viewport + 'static> ScrollScheduler for CalloopScheduler<D> {
    type Handle = RegistrationToken;

    fn start(&mut self, tick: ScrollTick) -> Option<RegistrationToken> {
        let ScrollTick { dx, dy, interval } = tick;
        self.handle
            .insert_source(Timer::from_duration(interval), move |_, _, data: &mut D| {
                data.scroll_by(dx, dy);
                TimeoutAction::ToDuration(interval)
            })
            .map_err(|e| warn!("Failed to register scroll timer: {}", e.error))
            .ok()
    }

    fn cancel(&mut self, handle: RegistrationToken) {
        self.handle.remove(handle);
    }
}

// ── Actuator ───────────────────────────────────────────────

/// Scroll transitions reported to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrollEvent {
    Started {
        direction: ScrollDirection,
        step: u32,
        interval_ms: u64,
    },
    Stopped {
        direction: ScrollDirection,
    },
}

impl ScrollEvent {
    pub fn to_sexp(&self) -> String {
        match self {
            Self::Started {
                direction,
                step,
                interval_ms,
            } => format!(
                "(:type :event :event :scroll-started :direction :{} :step {} :interval-ms {})",
                direction.as_str(),
                step,
                interval_ms
            ),
            Self::Stopped { direction } => format!(
                "(:type :event :event :scroll-stopped :direction :{})",
                direction.as_str()
            ),
        }
    }
}

/// Running scroll: its direction and the timer capability.
struct ScrollState<H> {
    direction: ScrollDirection,
    handle: H,
}

pub struct ScrollActuator<S: ScrollScheduler> {
    scheduler: S,
    speed: u8,
    active: Option<ScrollState<S::Handle>>,
}

impl<S: ScrollScheduler> ScrollActuator<S> {
    pub fn new(scheduler: S, speed: u8) -> Self {
        Self {
            scheduler,
            speed: clamp_speed(speed as i64),
            active: None,
        }
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    pub fn direction(&self) -> Option<ScrollDirection> {
        self.active.as_ref().map(|s| s.direction)
    }

    pub fn is_scrolling(&self) -> bool {
        self.active.is_some()
    }

    /// Run in `direction`, or stop on `None`.  Re-engaging the running
    /// direction leaves its timer alone.
    pub fn engage(&mut self, direction: Option<ScrollDirection>) -> Vec<ScrollEvent> {
        if direction.is_some() && direction == self.direction() {
            return Vec::new();
        }
        let mut events = self.stop();
        if let Some(direction) = direction {
            events.extend(self.start(direction));
        }
        events
    }

    fn start(&mut self, direction: ScrollDirection) -> Option<ScrollEvent> {
        let (step, interval_ms) = speed_values(self.speed);
        let (dx, dy) = direction.delta(step as f64);
        let handle = self.scheduler.start(ScrollTick {
            dx,
            dy,
            interval: Duration::from_millis(interval_ms),
        })?;
        self.active = Some(ScrollState { direction, handle });
        debug!(direction = direction.as_str(), step, interval_ms, "Scroll started");
        Some(ScrollEvent::Started {
            direction,
            step,
            interval_ms,
        })
    }

    /// Cancel the running timer, if any.
    pub fn stop(&mut self) -> Vec<ScrollEvent> {
        match self.active.take() {
            Some(state) => {
                self.scheduler.cancel(state.handle);
                debug!(direction = state.direction.as_str(), "Scroll stopped");
                vec![ScrollEvent::Stopped {
                    direction: state.direction,
                }]
            }
            None => Vec::new(),
        }
    }

    /// Change speed (clamped to 1-10).  A running scroll restarts on the new
    /// cadence.
    pub fn set_speed(&mut self, speed: i64) -> Vec<ScrollEvent> {
        let speed = clamp_speed(speed);
        if speed == self.speed {
            return Vec::new();
        }
        self.speed = speed;
        match self.direction() {
            Some(direction) => {
                let mut events = self.stop();
                events.extend(self.start(direction));
                events
            }
            None => Vec::new(),
        }
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        let (step, interval_ms) = speed_values(self.speed);
        format!(
            "(:scrolling {} :direction {} :speed {} :step {} :interval-ms {})",
            if self.is_scrolling() { "t" } else { "nil" },
            self.direction()
                .map(|d| format!(":{}", d.as_str()))
                .unwrap_or_else(|| "nil".to_string()),
            self.speed,
            step,
            interval_ms,
        )
    }
}

// ── Test helpers ───────────────────────────────────────────

/// Scheduler that records jobs instead of running them.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ManualScheduler {
    next_id: usize,
    pub running: Vec<(usize, ScrollTick)>,
    pub started: usize,
    pub cancelled: usize,
    /// Refuse to start timers.
    pub fail: bool,
}

#[cfg(test)]
impl ScrollScheduler for ManualScheduler {
    type Handle = usize;

    fn start(&mut self, tick: ScrollTick) -> Option<usize> {
        if self.fail {
            return None;
        }
        assert!(self.running.is_empty(), "two scroll timers running at once");
        self.next_id += 1;
        self.started += 1;
        self.running.push((self.next_id, tick));
        Some(self.next_id)
    }

    fn cancel(&mut self, handle: usize) {
        self.cancelled += 1;
        self.running.retain(|(id, _)| *id != handle);
    }
}
