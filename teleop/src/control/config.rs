//! Teleoperation configuration.
//!
//! Supplied once at construction; nothing here is reloaded while a session
//! runs.  Presets mirror the operating styles of the headset app, and a
//! config can also be loaded from an s-expression file:
//!
//! ```text
//! (:watchdog-timeout-ms 200 :watchdog-poll-ms 25
//!  :head (:enabled t :pan-limit-deg 180 :tilt-limit-deg 90)
//!  :channels ((:hand :left :trigger :fist :mode :continuous-persistent
//!              :linear-gain 2.0 :angular-gain 2.0 :forward :reverse
//!              :stop-gestures (:five :ok))))
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use lexpr::Value;

use super::command::DiscreteAction;
use super::hand::{GestureKind, Hand};
use crate::sexp::{atom_to_string, get_bool, get_float, get_int, get_keyword, get_value, list_items};

// ── Axis / sign policy ─────────────────────────────────────

/// Tracker axis measured for a discrete drag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragAxis {
    X,
    Y,
    Z,
}

impl DragAxis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X => "x",
            Self::Y => "y",
            Self::Z => "z",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "x" => Some(Self::X),
            "y" => Some(Self::Y),
            "z" => Some(Self::Z),
            _ => None,
        }
    }
}

/// What a forward drag of the hand does to the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardPolicy {
    /// Forward drag drives the robot backward (steering-wheel feel).
    Reverse,
    /// Forward drag drives the robot forward.
    Follow,
}

impl ForwardPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reverse => "reverse",
            Self::Follow => "follow",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "reverse" => Some(Self::Reverse),
            "follow" => Some(Self::Follow),
            _ => None,
        }
    }

    /// Multiplier applied to the forward drag offset.
    pub fn sign(&self) -> f32 {
        match self {
            Self::Reverse => -1.0,
            Self::Follow => 1.0,
        }
    }
}

/// Gains and sign policy for continuous drive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveGain {
    /// Multiplier from forward drag (m) to linear.x.
    pub linear: f32,
    /// Multiplier from sideways drag (m) to angular.z.
    pub angular: f32,
    /// Forward drag sign policy.
    pub forward: ForwardPolicy,
}

impl Default for DriveGain {
    fn default() -> Self {
        Self {
            linear: 1.0,
            angular: 1.0,
            forward: ForwardPolicy::Reverse,
        }
    }
}

// ── Control mode ───────────────────────────────────────────

/// How one channel turns gestures into commands.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMode {
    /// Grab, drag, release: one scalar per gesture.
    Discrete {
        action: DiscreteAction,
        axis: DragAxis,
        gain: f32,
    },
    /// Velocity every tick while the trigger is held; any other gesture stops.
    Continuous { drive: DriveGain },
    /// Velocity every tick until the hand disappears or a stop gesture shows.
    ContinuousPersistent {
        drive: DriveGain,
        stop_gestures: Vec<GestureKind>,
    },
}

impl ControlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discrete { .. } => "discrete",
            Self::Continuous { .. } => "continuous",
            Self::ContinuousPersistent { .. } => "continuous-persistent",
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::ContinuousPersistent { .. })
    }
}

/// One hand/trigger pairing driving its own state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub hand: Hand,
    pub trigger: GestureKind,
    pub mode: ControlMode,
}

impl ChannelConfig {
    /// Check internal consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.trigger == GestureKind::NoDetection {
            bail!("{} channel: trigger gesture cannot be 'none'", self.hand.as_str());
        }
        match &self.mode {
            ControlMode::Discrete { gain, .. } if !gain.is_finite() => {
                bail!("{} channel: discrete gain must be finite", self.hand.as_str())
            }
            ControlMode::Continuous { drive } | ControlMode::ContinuousPersistent { drive, .. }
                if !(drive.linear.is_finite() && drive.angular.is_finite()) =>
            {
                bail!("{} channel: drive gains must be finite", self.hand.as_str())
            }
            ControlMode::ContinuousPersistent { stop_gestures, .. } => {
                if stop_gestures.contains(&self.trigger) {
                    bail!(
                        "{} channel: stop gestures must not include the trigger '{}'",
                        self.hand.as_str(),
                        self.trigger.as_str()
                    );
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn to_sexp(&self) -> String {
        let mut s = format!(
            "(:hand :{} :trigger :{} :mode :{}",
            self.hand.as_str(),
            self.trigger.as_str(),
            self.mode.as_str()
        );
        match &self.mode {
            ControlMode::Discrete { action, axis, gain } => {
                s.push_str(&format!(
                    " :action :{} :axis :{} :gain {:.2}",
                    action.as_str(),
                    axis.as_str(),
                    gain
                ));
            }
            ControlMode::Continuous { drive } => {
                s.push_str(&drive_sexp(drive));
            }
            ControlMode::ContinuousPersistent {
                drive,
                stop_gestures,
            } => {
                s.push_str(&drive_sexp(drive));
                let names: Vec<String> = stop_gestures
                    .iter()
                    .map(|g| format!(":{}", g.as_str()))
                    .collect();
                s.push_str(&format!(" :stop-gestures ({})", names.join(" ")));
            }
        }
        s.push(')');
        s
    }
}

fn drive_sexp(drive: &DriveGain) -> String {
    format!(
        " :linear-gain {:.2} :angular-gain {:.2} :forward :{}",
        drive.linear,
        drive.angular,
        drive.forward.as_str()
    )
}

// ── Watchdog / head / topics ───────────────────────────────

/// Safety watchdog timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Time without a kick before motion is forced to stop.
    pub timeout: Duration,
    /// Interval at which the watchdog thread checks the deadline.
    pub poll_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(25),
        }
    }
}

impl WatchdogConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timeout.is_zero() || self.poll_interval.is_zero() {
            bail!("watchdog timeout and poll interval must be non-zero");
        }
        if self.poll_interval >= self.timeout {
            bail!(
                "watchdog poll interval ({}ms) must be shorter than the timeout ({}ms)",
                self.poll_interval.as_millis(),
                self.timeout.as_millis()
            );
        }
        Ok(())
    }
}

/// Head orientation to pan/tilt mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadConfig {
    /// Publish pan/tilt commands from head orientation.
    pub enabled: bool,
    /// Pan output is clamped to +/- this many degrees.
    pub pan_limit_deg: i32,
    /// Tilt output is clamped to +/- this many degrees.
    pub tilt_limit_deg: i32,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pan_limit_deg: 180,
            tilt_limit_deg: 180,
        }
    }
}

/// Logical topic names for outgoing commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    pub stop: String,
    pub continuous: String,
    pub rotate: String,
    pub crawl: String,
    pub pan_tilt: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            stop: "cmd_vel".to_string(),
            continuous: "base_cntrl/continuous".to_string(),
            rotate: "/base_cntrl/rotate_x".to_string(),
            crawl: "/base_cntrl/crawl_x".to_string(),
            pan_tilt: "pan_tilt".to_string(),
        }
    }
}

// ── TeleopConfig ───────────────────────────────────────────

/// Complete session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TeleopConfig {
    pub channels: Vec<ChannelConfig>,
    pub watchdog: WatchdogConfig,
    pub head: HeadConfig,
    pub topics: TopicConfig,
}

impl Default for TeleopConfig {
    fn default() -> Self {
        Self::continuous()
    }
}

impl TeleopConfig {
    /// Left fist drives continuously; releasing the fist stops.
    pub fn continuous() -> Self {
        Self::with_channels(vec![ChannelConfig {
            hand: Hand::Left,
            trigger: GestureKind::Fist,
            mode: ControlMode::Continuous {
                drive: DriveGain::default(),
            },
        }])
    }

    /// Left fist drag rotates, right victory drag crawls.
    pub fn discrete() -> Self {
        Self::with_channels(vec![
            ChannelConfig {
                hand: Hand::Left,
                trigger: GestureKind::Fist,
                mode: ControlMode::Discrete {
                    action: DiscreteAction::Rotate,
                    axis: DragAxis::X,
                    gain: 1.0,
                },
            },
            ChannelConfig {
                hand: Hand::Right,
                trigger: GestureKind::Victory,
                mode: ControlMode::Discrete {
                    action: DiscreteAction::Crawl,
                    axis: DragAxis::Y,
                    gain: 1.0,
                },
            },
        ])
    }

    /// Left fist drives at double gain; open palm or OK stops.
    pub fn persistent() -> Self {
        Self::with_channels(vec![ChannelConfig {
            hand: Hand::Left,
            trigger: GestureKind::Fist,
            mode: ControlMode::ContinuousPersistent {
                drive: DriveGain {
                    linear: 2.0,
                    angular: 2.0,
                    forward: ForwardPolicy::Reverse,
                },
                stop_gestures: vec![GestureKind::Five, GestureKind::Ok],
            },
        }])
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "continuous" => Some(Self::continuous()),
            "discrete" => Some(Self::discrete()),
            "persistent" | "continuous-persistent" => Some(Self::persistent()),
            _ => None,
        }
    }

    fn with_channels(channels: Vec<ChannelConfig>) -> Self {
        Self {
            channels,
            watchdog: WatchdogConfig::default(),
            head: HeadConfig::default(),
            topics: TopicConfig::default(),
        }
    }

    /// Check the whole configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.channels.is_empty() {
            bail!("at least one channel must be configured");
        }
        for channel in &self.channels {
            channel.validate()?;
        }
        if self.channels.iter().any(|c| c.mode.is_persistent()) {
            self.watchdog.validate()?;
        }
        if self.head.pan_limit_deg <= 0 || self.head.tilt_limit_deg <= 0 {
            bail!("head pan/tilt limits must be positive");
        }
        Ok(())
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Parse a config s-expression.  Missing keys take the defaults of the
    /// continuous preset.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let value = lexpr::from_str(raw).map_err(|e| anyhow!("malformed s-expression: {e}"))?;
        let mut config = Self::default();

        if let Some(ms) = get_int(&value, "watchdog-timeout-ms") {
            config.watchdog.timeout = Duration::from_millis(non_negative(ms, "watchdog-timeout-ms")?);
        }
        if let Some(ms) = get_int(&value, "watchdog-poll-ms") {
            config.watchdog.poll_interval = Duration::from_millis(non_negative(ms, "watchdog-poll-ms")?);
        }

        if let Some(head) = get_value(&value, "head") {
            if let Some(enabled) = get_bool(head, "enabled") {
                config.head.enabled = enabled;
            }
            if let Some(limit) = get_int(head, "pan-limit-deg") {
                config.head.pan_limit_deg = degrees(limit, "pan-limit-deg")?;
            }
            if let Some(limit) = get_int(head, "tilt-limit-deg") {
                config.head.tilt_limit_deg = degrees(limit, "tilt-limit-deg")?;
            }
        }

        if let Some(topics) = get_value(&value, "topics") {
            let t = &mut config.topics;
            for (key, slot) in [
                ("stop", &mut t.stop),
                ("continuous", &mut t.continuous),
                ("rotate", &mut t.rotate),
                ("crawl", &mut t.crawl),
                ("pan-tilt", &mut t.pan_tilt),
            ] {
                if let Some(name) = get_keyword(topics, key) {
                    *slot = name;
                }
            }
        }

        if let Some(channels) = get_value(&value, "channels") {
            config.channels = list_items(channels)
                .into_iter()
                .enumerate()
                .map(|(i, c)| parse_channel(c).with_context(|| format!("channel {i}")))
                .collect::<anyhow::Result<_>>()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// s-expression rendering of the active configuration.
    pub fn config_sexp(&self) -> String {
        let channels: Vec<String> = self.channels.iter().map(|c| c.to_sexp()).collect();
        format!(
            "(:watchdog-timeout-ms {} :watchdog-poll-ms {} :head (:enabled {} :pan-limit-deg {} :tilt-limit-deg {}) :channels ({}))",
            self.watchdog.timeout.as_millis(),
            self.watchdog.poll_interval.as_millis(),
            if self.head.enabled { "t" } else { "nil" },
            self.head.pan_limit_deg,
            self.head.tilt_limit_deg,
            channels.join(" "),
        )
    }
}

fn non_negative(v: i64, key: &str) -> anyhow::Result<u64> {
    u64::try_from(v).map_err(|_| anyhow!("{key} must be non-negative, got {v}"))
}

fn degrees(v: i64, key: &str) -> anyhow::Result<i32> {
    i32::try_from(v).map_err(|_| anyhow!("{key} out of range, got {v}"))
}

fn required<T>(value: &Value, key: &str, parse: fn(&str) -> Option<T>) -> anyhow::Result<T> {
    let raw = get_keyword(value, key).ok_or_else(|| anyhow!("missing :{key}"))?;
    parse(&raw).ok_or_else(|| anyhow!("invalid :{key} '{raw}'"))
}

fn optional<T>(value: &Value, key: &str, parse: fn(&str) -> Option<T>) -> anyhow::Result<Option<T>> {
    match get_keyword(value, key) {
        Some(raw) => parse(&raw)
            .map(Some)
            .ok_or_else(|| anyhow!("invalid :{key} '{raw}'")),
        None => Ok(None),
    }
}

fn parse_drive(value: &Value, default_gain: f32) -> anyhow::Result<DriveGain> {
    Ok(DriveGain {
        linear: get_float(value, "linear-gain").map_or(default_gain, |g| g as f32),
        angular: get_float(value, "angular-gain").map_or(default_gain, |g| g as f32),
        forward: optional(value, "forward", ForwardPolicy::from_str)?.unwrap_or(ForwardPolicy::Reverse),
    })
}

fn parse_channel(value: &Value) -> anyhow::Result<ChannelConfig> {
    let hand = required(value, "hand", Hand::from_str)?;
    let trigger = required(value, "trigger", GestureKind::from_str)?;
    let mode_name = get_keyword(value, "mode").ok_or_else(|| anyhow!("missing :mode"))?;

    let mode = match mode_name.as_str() {
        "discrete" => ControlMode::Discrete {
            action: required(value, "action", DiscreteAction::from_str)?,
            axis: optional(value, "axis", DragAxis::from_str)?.unwrap_or(DragAxis::X),
            gain: get_float(value, "gain").map_or(1.0, |g| g as f32),
        },
        "continuous" => ControlMode::Continuous {
            drive: parse_drive(value, 1.0)?,
        },
        "continuous-persistent" | "persistent" => {
            let stop_gestures = match get_value(value, "stop-gestures") {
                Some(list) => list_items(list)
                    .into_iter()
                    .map(|g| {
                        let name = atom_to_string(g).ok_or_else(|| anyhow!("invalid stop gesture"))?;
                        GestureKind::from_str(&name).ok_or_else(|| anyhow!("unknown stop gesture '{name}'"))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?,
                None => vec![GestureKind::Five, GestureKind::Ok],
            };
            ControlMode::ContinuousPersistent {
                drive: parse_drive(value, 2.0)?,
                stop_gestures,
            }
        }
        other => bail!("unknown mode '{other}'"),
    };

    Ok(ChannelConfig { hand, trigger, mode })
}

// ── Tests ──────────────────────────────────────────────────
