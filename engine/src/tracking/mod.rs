//! Hand-landmark gesture pipeline: classification, pointer smoothing,
//! virtual controls, activation, and the draw and scroll consumers.

pub mod activation;
pub mod controls;
pub mod engine;
pub mod gesture;
pub mod landmarks;
pub mod pointer;
pub mod scroll;
pub mod stroke;
