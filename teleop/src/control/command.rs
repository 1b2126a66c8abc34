//! Commands emitted toward the robot and the sinks that carry them.
//!
//! Encoding and transport belong to the sink implementation.  The core only
//! decides *what* to send and on which logical topic it belongs.

use std::sync::{Arc, Mutex};

use tracing::info;

use super::config::TopicConfig;
use super::hand::Vec3;

// ── Velocity ───────────────────────────────────────────────

/// Twist-style velocity command.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityCommand {
    pub linear: Vec3,
    pub angular: Vec3,
}

impl VelocityCommand {
    /// Drive command from forward speed and yaw rate.
    pub fn drive(linear_x: f32, angular_z: f32) -> Self {
        Self {
            linear: Vec3::new(linear_x, 0.0, 0.0),
            angular: Vec3::new(0.0, 0.0, angular_z),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.linear.is_zero() && self.angular.is_zero()
    }
}

// ── Discrete actions ───────────────────────────────────────

/// Bounded robot moves triggered by a single discrete scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscreteAction {
    /// Rotate in place by the given amount.
    Rotate,
    /// Crawl forward/backward by the given amount.
    Crawl,
}

impl DiscreteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rotate => "rotate",
            Self::Crawl => "crawl",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "rotate" => Some(Self::Rotate),
            "crawl" => Some(Self::Crawl),
            _ => None,
        }
    }
}

// ── Pan/tilt ───────────────────────────────────────────────

/// Camera pan/tilt target in whole signed degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PanTilt {
    pub pan_deg: i32,
    pub tilt_deg: i32,
}

// ── Command enums ──────────────────────────────────────────

/// Output of a motion state machine for one tick (or watchdog expiry).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionCommand {
    /// Continuous velocity derived from the anchor-relative drag offset.
    Velocity(VelocityCommand),
    /// Zero velocity; the robot must halt.
    Stop,
    /// Single scalar for a discrete move.
    Discrete { action: DiscreteAction, amount: f32 },
}

impl MotionCommand {
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop)
    }
}

/// Anything a `CommandSink` can be asked to publish.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Motion(MotionCommand),
    PanTilt(PanTilt),
}

impl Command {
    /// Topic this command is published on.
    pub fn topic<'a>(&self, topics: &'a TopicConfig) -> &'a str {
        match self {
            Self::Motion(MotionCommand::Stop) => &topics.stop,
            Self::Motion(MotionCommand::Velocity(_)) => &topics.continuous,
            Self::Motion(MotionCommand::Discrete {
                action: DiscreteAction::Rotate,
                ..
            }) => &topics.rotate,
            Self::Motion(MotionCommand::Discrete {
                action: DiscreteAction::Crawl,
                ..
            }) => &topics.crawl,
            Self::PanTilt(_) => &topics.pan_tilt,
        }
    }

    /// s-expression form for logs and recorded traces.
    pub fn to_sexp(&self) -> String {
        match self {
            Self::Motion(MotionCommand::Stop) => "(:type :stop)".to_string(),
            Self::Motion(MotionCommand::Velocity(v)) => format!(
                "(:type :velocity :linear ({:.3} {:.3} {:.3}) :angular ({:.3} {:.3} {:.3}))",
                v.linear.x, v.linear.y, v.linear.z, v.angular.x, v.angular.y, v.angular.z,
            ),
            Self::Motion(MotionCommand::Discrete { action, amount }) => {
                format!("(:type :{} :amount {:.3})", action.as_str(), amount)
            }
            Self::PanTilt(pt) => format!("(:type :pan-tilt :pan {} :tilt {})", pt.pan_deg, pt.tilt_deg),
        }
    }
}

impl From<MotionCommand> for Command {
    fn from(cmd: MotionCommand) -> Self {
        Self::Motion(cmd)
    }
}

impl From<PanTilt> for Command {
    fn from(pt: PanTilt) -> Self {
        Self::PanTilt(pt)
    }
}

// ── Sinks ──────────────────────────────────────────────────

/// Destination for robot commands.
///
/// Called from both the tick context and the watchdog thread, always while
/// the owning channel's lock is held, so implementations must not call back
/// into the session.
pub trait CommandSink: Send + Sync {
    fn publish(&self, command: &Command);
}

/// Logs every command with its topic.
pub struct TracingSink {
    topics: TopicConfig,
}

impl TracingSink {
    pub fn new(topics: TopicConfig) -> Self {
        Self { topics }
    }
}

impl CommandSink for TracingSink {
    fn publish(&self, command: &Command) {
        info!(topic = command.topic(&self.topics), "publish {}", command.to_sexp());
    }
}

/// Collects commands in memory.
#[derive(Default)]
pub struct RecordingSink {
    commands: Mutex<Vec<Command>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    pub fn commands(&self) -> Vec<Command> {
        self.commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Drain and return everything published so far.
    pub fn take(&self) -> Vec<Command> {
        std::mem::take(
            &mut *self
                .commands
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    pub fn stop_count(&self) -> usize {
        self.commands()
            .iter()
            .filter(|c| matches!(c, Command::Motion(MotionCommand::Stop)))
            .count()
    }
}

impl CommandSink for RecordingSink {
    fn publish(&self, command: &Command) {
        self.commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(*command);
    }
}

/// Publishes every command to each inner sink in order.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn CommandSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn CommandSink>>) -> Self {
        Self { sinks }
    }
}

impl CommandSink for FanoutSink {
    fn publish(&self, command: &Command) {
        for sink in &self.sinks {
            sink.publish(command);
        }
    }
}

// ── Tests ──────────────────────────────────────────────────
