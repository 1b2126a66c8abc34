//! Gesture teleoperation core.
//!
//! Provides:
//! - `hand`: gesture samples as delivered by the hand tracker
//! - `motion`: per-channel state machine (discrete, continuous, persistent)
//! - `watchdog`: deadline timer and background poller for persistent motion
//! - `channel`: state machine + watchdog + sink behind one lock
//! - `angle`: head orientation to signed pan/tilt degrees
//! - `session`: per-tick driver over all channels and the head tracker

pub mod angle;
pub mod channel;
pub mod command;
pub mod config;
pub mod hand;
pub mod motion;
pub mod session;
pub mod watchdog;

pub use angle::{AngleNormalizer, AngleRegion, HeadOrientation, HeadTracker};
pub use channel::ActionChannel;
pub use command::{
    Command, CommandSink, DiscreteAction, FanoutSink, MotionCommand, PanTilt, RecordingSink,
    TracingSink, VelocityCommand,
};
pub use config::{
    ChannelConfig, ControlMode, DragAxis, DriveGain, ForwardPolicy, HeadConfig, TeleopConfig,
    TopicConfig, WatchdogConfig,
};
pub use hand::{GestureKind, GestureSample, Hand, Vec3};
pub use motion::{MotionState, MotionStateMachine, Phase};
pub use session::{TeleopSession, TickInput};
pub use watchdog::{SafetyWatchdog, WatchdogTimer};
