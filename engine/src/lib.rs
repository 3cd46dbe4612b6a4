//! handpilot: hand-landmark gesture engine.
//!
//! Frames of 21 normalized hand landmarks drive either freehand drawing with
//! virtual tool controls or timed viewport scrolling.  The host talks to the
//! engine over a Unix socket carrying s-expression messages.

pub mod backend;
pub mod ipc;
pub mod state;
pub mod tracking;
