//! Gesture-driven motion state machine for a single hand/trigger channel.
//!
//! Each channel moves through `Idle -> Detected -> InProgress -> Idle`.
//! The anchor is captured on the `Idle -> Detected` edge and every command
//! is derived from the offset between the anchor and the current hand
//! position.  Which samples sustain or end a motion depends on the
//! channel's `ControlMode`:
//!
//! - Discrete: nothing is emitted while the trigger is held; the first
//!   sample showing a different gesture emits one scalar and resets.
//! - Continuous: a velocity every tick while the trigger is held; anything
//!   else (including losing the hand) stops.
//! - ContinuousPersistent: like Continuous, but classifier noise is
//!   tolerated; only losing the hand or a stop gesture ends the motion.
//!
//! This type is single-threaded.  `ActionChannel` wraps it with the lock
//! and watchdog that make it safe to share with the watchdog thread.

use tracing::{debug, info};

use super::command::{DiscreteAction, MotionCommand, VelocityCommand};
use super::config::{ChannelConfig, ControlMode, DragAxis, DriveGain};
use super::hand::{GestureSample, Hand, Vec3};

// ── Phase ──────────────────────────────────────────────────

/// Motion phase of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// Trigger seen, anchor captured.
    Detected,
    /// Trigger sustained past the detection tick.
    InProgress,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Detected => "detected",
            Self::InProgress => "in-progress",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

// ── State ──────────────────────────────────────────────────

/// Mutable state owned by one state machine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotionState {
    pub phase: Phase,
    /// Hand position at the `Idle -> Detected` edge.
    pub anchor: Option<Vec3>,
    /// Most recent finite hand position while active.
    pub last_position: Option<Vec3>,
}

impl MotionState {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

// ── State machine ──────────────────────────────────────────

/// Per-channel motion state machine.
pub struct MotionStateMachine {
    config: ChannelConfig,
    state: MotionState,
}

impl MotionStateMachine {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            state: MotionState::default(),
        }
    }

    pub fn hand(&self) -> Hand {
        self.config.hand
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn anchor(&self) -> Option<Vec3> {
        self.state.anchor
    }

    /// Process one tick.  `None` means the hand is not tracked.
    ///
    /// Samples for the other hand are ignored.
    pub fn on_sample(&mut self, sample: Option<&GestureSample>) -> Option<MotionCommand> {
        let sample = match sample {
            Some(s) if s.hand != self.config.hand => return None,
            other => other,
        };
        if let Some(s) = sample {
            debug!(
                hand = self.config.hand.as_str(),
                gesture = s.gesture.as_str(),
                confidence = ?s.confidence,
                phase = self.state.phase.as_str(),
                "sample"
            );
        }

        match &self.config.mode {
            ControlMode::Discrete { action, axis, gain } => {
                let (action, axis, gain) = (*action, *axis, *gain);
                self.on_discrete(sample, action, axis, gain)
            }
            ControlMode::Continuous { drive } => {
                let drive = *drive;
                self.on_continuous(sample, drive)
            }
            ControlMode::ContinuousPersistent {
                drive,
                stop_gestures,
            } => {
                let drive = *drive;
                let stops = sample.map_or(false, |s| stop_gestures.contains(&s.gesture));
                self.on_persistent(sample, drive, stops)
            }
        }
    }

    /// Force the machine back to Idle (watchdog expiry, shutdown).
    ///
    /// Returns the stop command when a continuous motion was active.
    /// Returns nothing when already idle or in discrete mode.
    pub fn force_idle(&mut self) -> Option<MotionCommand> {
        if !self.state.phase.is_active() {
            return None;
        }
        let discrete = matches!(self.config.mode, ControlMode::Discrete { .. });
        self.enter_idle("forced");
        if discrete {
            None
        } else {
            Some(MotionCommand::Stop)
        }
    }

    // ── Mode handlers ──────────────────────────────────────

    fn on_discrete(
        &mut self,
        sample: Option<&GestureSample>,
        action: DiscreteAction,
        axis: DragAxis,
        gain: f32,
    ) -> Option<MotionCommand> {
        // Absence is not a release; wait for the hand to show a gesture.
        let sample = sample?;
        let is_trigger = sample.gesture == self.config.trigger;

        match (self.state.phase, is_trigger) {
            (Phase::Idle, true) => {
                self.enter_detected(sample.position);
                None
            }
            (Phase::Idle, false) => None,
            (_, true) => {
                self.track(sample.position);
                None
            }
            (_, false) => {
                let anchor = self.state.anchor.unwrap_or(sample.position);
                let current = self.position_or_last(sample.position);
                let amount = axis_value(anchor, axis) - axis_value(current, axis);
                let amount = amount * gain;
                info!(
                    hand = self.config.hand.as_str(),
                    action = action.as_str(),
                    amount,
                    "discrete drag released"
                );
                self.enter_idle("released");
                Some(MotionCommand::Discrete { action, amount })
            }
        }
    }

    fn on_continuous(&mut self, sample: Option<&GestureSample>, drive: DriveGain) -> Option<MotionCommand> {
        let trigger_held = sample.map_or(false, |s| s.gesture == self.config.trigger);

        match (self.state.phase, sample) {
            (Phase::Idle, Some(s)) if trigger_held => {
                if !self.enter_detected(s.position) {
                    return None;
                }
                Some(self.velocity(s.position, drive))
            }
            (Phase::Idle, _) => None,
            (_, Some(s)) if trigger_held => {
                self.state.phase = Phase::InProgress;
                Some(self.velocity(s.position, drive))
            }
            (_, _) => {
                self.enter_idle(if sample.is_some() { "released" } else { "hand lost" });
                Some(MotionCommand::Stop)
            }
        }
    }

    fn on_persistent(
        &mut self,
        sample: Option<&GestureSample>,
        drive: DriveGain,
        is_stop_gesture: bool,
    ) -> Option<MotionCommand> {
        let s = match (self.state.phase, sample) {
            (Phase::Idle, Some(s)) if s.gesture == self.config.trigger => {
                if !self.enter_detected(s.position) {
                    return None;
                }
                return Some(self.velocity(s.position, drive));
            }
            (Phase::Idle, _) => return None,
            (_, None) => {
                self.enter_idle("hand lost");
                return Some(MotionCommand::Stop);
            }
            (_, Some(_)) if is_stop_gesture => {
                self.enter_idle("stop gesture");
                return Some(MotionCommand::Stop);
            }
            (_, Some(s)) => s,
        };

        if s.gesture == self.config.trigger {
            self.state.phase = Phase::InProgress;
        } else {
            debug!(
                hand = self.config.hand.as_str(),
                gesture = s.gesture.as_str(),
                "non-stop gesture while driving, motion continues"
            );
        }
        Some(self.velocity(s.position, drive))
    }

    // ── Helpers ────────────────────────────────────────────

    /// Capture the anchor.  Returns false (and stays idle) when the
    /// position is unusable.
    fn enter_detected(&mut self, position: Vec3) -> bool {
        if !position.is_finite() {
            debug!(hand = self.config.hand.as_str(), "trigger with non-finite position ignored");
            return false;
        }
        self.state.phase = Phase::Detected;
        self.state.anchor = Some(position);
        self.state.last_position = Some(position);
        debug!(
            hand = self.config.hand.as_str(),
            x = position.x,
            y = position.y,
            z = position.z,
            "anchor captured"
        );
        true
    }

    fn enter_idle(&mut self, reason: &str) {
        debug!(
            hand = self.config.hand.as_str(),
            from = self.state.phase.as_str(),
            reason,
            "motion reset to idle"
        );
        self.state.reset();
    }

    fn track(&mut self, position: Vec3) {
        if position.is_finite() {
            self.state.last_position = Some(position);
        }
    }

    fn position_or_last(&self, position: Vec3) -> Vec3 {
        if position.is_finite() {
            position
        } else {
            self.state.last_position.or(self.state.anchor).unwrap_or(Vec3::ZERO)
        }
    }

    /// Anchor-relative drive command for the current position.
    fn velocity(&mut self, position: Vec3, drive: DriveGain) -> MotionCommand {
        let current = self.position_or_last(position);
        self.track(current);
        let anchor = self.state.anchor.unwrap_or(current);

        let offset_side = anchor.x - current.x;
        let offset_fwd = anchor.z - current.z;
        MotionCommand::Velocity(VelocityCommand::drive(
            offset_fwd * drive.linear * drive.forward.sign(),
            offset_side * drive.angular,
        ))
    }

    /// s-expression for status reporting.
    pub fn status_sexp(&self) -> String {
        let anchor = match self.state.anchor {
            Some(a) => format!("({:.3} {:.3} {:.3})", a.x, a.y, a.z),
            None => "nil".to_string(),
        };
        format!(
            "(:hand :{} :trigger :{} :mode :{} :phase :{} :anchor {})",
            self.config.hand.as_str(),
            self.config.trigger.as_str(),
            self.config.mode.as_str(),
            self.state.phase.as_str(),
            anchor,
        )
    }
}

fn axis_value(v: Vec3, axis: DragAxis) -> f32 {
    match axis {
        DragAxis::X => v.x,
        DragAxis::Y => v.y,
        DragAxis::Z => v.z,
    }
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::super::config::{ForwardPolicy, TeleopConfig};
    use super::super::hand::GestureKind;
    use super::*;

    fn sample(hand: Hand, gesture: GestureKind, x: f32, y: f32, z: f32) -> GestureSample {
        GestureSample::new(hand, gesture, Vec3::new(x, y, z)).with_confidence(0.9)
    }

    fn machine(config: TeleopConfig, index: usize) -> MotionStateMachine {
        MotionStateMachine::new(config.channels[index].clone())
    }

    fn velocity(cmd: Option<MotionCommand>) -> VelocityCommand {
        match cmd {
            Some(MotionCommand::Velocity(v)) => v,
            other => panic!("expected velocity, got {:?}", other),
        }
    }

    // ── Discrete ───────────────────────────────────────────

    #[test]
    fn test_discrete_round_trip() {
        let mut m = machine(TeleopConfig::discrete(), 0);
        let fist = sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.0);
        let open = sample(Hand::Left, GestureKind::Five, 5.0, 0.0, 0.0);

        assert_eq!(m.on_sample(Some(&fist)), None);
        assert_eq!(m.phase(), Phase::Detected);

        let cmd = m.on_sample(Some(&open));
        match cmd {
            Some(MotionCommand::Discrete { action, amount }) => {
                assert_eq!(action, DiscreteAction::Rotate);
                assert!((amount.abs() - 5.0).abs() < 1e-6);
                assert!(amount < 0.0, "anchor.x - current.x is negative");
            }
            other => panic!("expected discrete command, got {:?}", other),
        }
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.anchor(), None);
    }

    #[test]
    fn test_discrete_silent_while_held() {
        let mut m = machine(TeleopConfig::discrete(), 0);
        for i in 0..5 {
            let s = sample(Hand::Left, GestureKind::Fist, i as f32 * 0.1, 0.0, 0.0);
            assert_eq!(m.on_sample(Some(&s)), None);
        }
        assert_eq!(m.phase(), Phase::Detected);
        // Anchor is the first sample, not refreshed while held
        assert_eq!(m.anchor(), Some(Vec3::ZERO));
    }

    #[test]
    fn test_discrete_absent_hand_is_skipped() {
        let mut m = machine(TeleopConfig::discrete(), 0);
        assert_eq!(m.on_sample(None), None);
        assert_eq!(m.phase(), Phase::Idle);

        let fist = sample(Hand::Left, GestureKind::Fist, 1.0, 0.0, 0.0);
        m.on_sample(Some(&fist));
        assert_eq!(m.on_sample(None), None);
        assert_eq!(m.phase(), Phase::Detected);
    }

    #[test]
    fn test_discrete_crawl_uses_y_axis() {
        let mut m = machine(TeleopConfig::discrete(), 1);
        let v = sample(Hand::Right, GestureKind::Victory, 0.0, 0.5, 0.0);
        let done = sample(Hand::Right, GestureKind::NoDetection, 9.0, 0.2, 9.0);
        m.on_sample(Some(&v));
        match m.on_sample(Some(&done)) {
            Some(MotionCommand::Discrete { action, amount }) => {
                assert_eq!(action, DiscreteAction::Crawl);
                assert!((amount - 0.3).abs() < 1e-6);
            }
            other => panic!("expected crawl, got {:?}", other),
        }
    }

    #[test]
    fn test_discrete_ignores_other_hand() {
        let mut m = machine(TeleopConfig::discrete(), 0);
        let right = sample(Hand::Right, GestureKind::Fist, 0.0, 0.0, 0.0);
        assert_eq!(m.on_sample(Some(&right)), None);
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_discrete_force_idle_emits_nothing() {
        let mut m = machine(TeleopConfig::discrete(), 0);
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.0)));
        assert_eq!(m.force_idle(), None);
        assert_eq!(m.phase(), Phase::Idle);
    }

    // ── Continuous ─────────────────────────────────────────

    #[test]
    fn test_continuous_cadence_is_anchor_relative() {
        let mut m = machine(TeleopConfig::continuous(), 0);
        let n = 6;
        let mut emitted = Vec::new();
        for i in 0..n {
            let s = sample(Hand::Left, GestureKind::Fist, -0.1 * i as f32, 0.0, 0.05 * i as f32);
            emitted.push(velocity(m.on_sample(Some(&s))));
        }
        assert_eq!(emitted.len(), n);
        for (i, v) in emitted.iter().enumerate() {
            let i = i as f32;
            // angular.z = anchor.x - x = 0.1 i ; linear.x = -(anchor.z - z) = 0.05 i
            assert!((v.angular.z - 0.1 * i).abs() < 1e-5, "tick {i}: {v:?}");
            assert!((v.linear.x - 0.05 * i).abs() < 1e-5, "tick {i}: {v:?}");
        }
        assert_eq!(m.phase(), Phase::InProgress);
    }

    #[test]
    fn test_continuous_reverse_forward_policy() {
        let mut m = machine(TeleopConfig::continuous(), 0);
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.0)));
        // linear.x = -(anchor.z - z)
        let v = velocity(m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.2))));
        assert!((v.linear.x - 0.2).abs() < 1e-6);
        let v = velocity(m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, -0.2))));
        assert!((v.linear.x + 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_continuous_detection_tick_is_zero_velocity() {
        let mut m = machine(TeleopConfig::continuous(), 0);
        let v = velocity(m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.3, 0.1, 0.2))));
        assert!(v.is_zero());
        assert_eq!(m.phase(), Phase::Detected);
    }

    #[test]
    fn test_continuous_release_emits_single_stop() {
        let mut m = machine(TeleopConfig::continuous(), 0);
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.0)));
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.1, 0.0, 0.0)));

        let open = sample(Hand::Left, GestureKind::Five, 0.1, 0.0, 0.0);
        assert_eq!(m.on_sample(Some(&open)), Some(MotionCommand::Stop));
        assert_eq!(m.phase(), Phase::Idle);

        // Idle ticks afterward emit nothing
        assert_eq!(m.on_sample(Some(&open)), None);
        assert_eq!(m.on_sample(None), None);
        assert_eq!(m.on_sample(None), None);
    }

    #[test]
    fn test_continuous_hand_lost_stops() {
        let mut m = machine(TeleopConfig::continuous(), 0);
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.0)));
        assert_eq!(m.on_sample(None), Some(MotionCommand::Stop));
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.anchor(), None);
    }

    #[test]
    fn test_continuous_jitter_stops() {
        let mut m = machine(TeleopConfig::continuous(), 0);
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.0)));
        let jitter = sample(Hand::Left, GestureKind::NoDetection, 0.0, 0.0, 0.0);
        assert_eq!(m.on_sample(Some(&jitter)), Some(MotionCommand::Stop));
    }

    #[test]
    fn test_continuous_reanchors_after_idle() {
        let mut m = machine(TeleopConfig::continuous(), 0);
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.0)));
        m.on_sample(None);
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 1.0, 2.0, 3.0)));
        assert_eq!(m.anchor(), Some(Vec3::new(1.0, 2.0, 3.0)));
    }

    // ── Persistent ─────────────────────────────────────────

    #[test]
    fn test_persistent_jitter_tolerance() {
        let mut m = machine(TeleopConfig::persistent(), 0);
        let fist = sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.0);
        let like = sample(Hand::Left, GestureKind::Like, -0.1, 0.0, 0.0);

        m.on_sample(Some(&fist));
        m.on_sample(Some(&fist));
        let at_jitter = m.on_sample(Some(&like));
        assert!(matches!(at_jitter, Some(MotionCommand::Velocity(_))), "got {:?}", at_jitter);
        assert_eq!(m.phase(), Phase::InProgress);
        let after = m.on_sample(Some(&fist));
        assert!(matches!(after, Some(MotionCommand::Velocity(_))));
        assert_eq!(m.phase(), Phase::InProgress);
    }

    #[test]
    fn test_persistent_gain_and_policy() {
        let mut m = machine(TeleopConfig::persistent(), 0);
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.0)));
        let v = velocity(m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, -0.1, 0.0, 0.1))));
        // 2x gain, reverse policy
        assert!((v.angular.z - 0.2).abs() < 1e-6);
        assert!((v.linear.x - 0.2).abs() < 1e-6);

        let mut config = TeleopConfig::persistent();
        if let ControlMode::ContinuousPersistent { drive, .. } = &mut config.channels[0].mode {
            drive.forward = ForwardPolicy::Follow;
        }
        let mut m = machine(config, 0);
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.0)));
        let v = velocity(m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.1))));
        assert!((v.linear.x + 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_persistent_stop_gesture() {
        let mut m = machine(TeleopConfig::persistent(), 0);
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.0)));
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.1, 0.0, 0.0)));
        let five = sample(Hand::Left, GestureKind::Five, 0.1, 0.0, 0.0);
        assert_eq!(m.on_sample(Some(&five)), Some(MotionCommand::Stop));
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.on_sample(Some(&five)), None);
    }

    #[test]
    fn test_persistent_hand_lost() {
        let mut m = machine(TeleopConfig::persistent(), 0);
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.0)));
        assert_eq!(m.on_sample(None), Some(MotionCommand::Stop));
        assert_eq!(m.on_sample(None), None);
    }

    #[test]
    fn test_persistent_non_trigger_from_idle_does_nothing() {
        let mut m = machine(TeleopConfig::persistent(), 0);
        let like = sample(Hand::Left, GestureKind::Like, 0.0, 0.0, 0.0);
        assert_eq!(m.on_sample(Some(&like)), None);
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_persistent_jitter_keeps_detected_phase() {
        let mut m = machine(TeleopConfig::persistent(), 0);
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.0)));
        m.on_sample(Some(&sample(Hand::Left, GestureKind::NoDetection, 0.0, 0.0, 0.0)));
        assert_eq!(m.phase(), Phase::Detected);
    }

    #[test]
    fn test_force_idle_continuous() {
        let mut m = machine(TeleopConfig::persistent(), 0);
        assert_eq!(m.force_idle(), None);
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.0)));
        assert_eq!(m.force_idle(), Some(MotionCommand::Stop));
        assert_eq!(m.force_idle(), None);
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_non_finite_position_reuses_last() {
        let mut m = machine(TeleopConfig::persistent(), 0);
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.0)));
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, -0.1, 0.0, 0.0)));
        let bad = sample(Hand::Left, GestureKind::NoDetection, f32::NAN, 0.0, 0.0);
        let v = velocity(m.on_sample(Some(&bad)));
        assert!((v.angular.z - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_trigger_does_not_anchor() {
        let mut m = machine(TeleopConfig::continuous(), 0);
        let bad = sample(Hand::Left, GestureKind::Fist, f32::NAN, 0.0, 0.0);
        assert_eq!(m.on_sample(Some(&bad)), None);
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_status_sexp() {
        let mut m = machine(TeleopConfig::continuous(), 0);
        assert!(m.status_sexp().contains(":phase :idle :anchor nil"));
        m.on_sample(Some(&sample(Hand::Left, GestureKind::Fist, 0.0, 0.0, 0.0)));
        let sexp = m.status_sexp();
        assert!(sexp.contains(":phase :detected"));
        assert!(sexp.contains(":anchor (0.000 0.000 0.000)"));
    }
}
