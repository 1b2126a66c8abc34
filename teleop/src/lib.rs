//! Gesture Teleop - hand-gesture driven robot teleoperation core.
//!
//! Turns per-tick hand gesture samples and head orientation into robot
//! velocity, discrete move, and camera pan/tilt commands.

pub mod control;
pub mod replay;
pub mod sexp;
