//! Teleoperation session: every configured channel plus head tracking.
//!
//! The session is the per-tick entry point.  Each `tick` hands every
//! channel the sample for its hand (or absence) and feeds the head
//! orientation through the pan/tilt pipeline.  Commands go straight to the
//! sink; the return value is a copy for callers that want it.

use std::sync::Arc;

use tracing::{debug, info};

use super::angle::{HeadOrientation, HeadTracker};
use super::channel::ActionChannel;
use super::command::{Command, CommandSink, PanTilt};
use super::config::TeleopConfig;
use super::hand::{GestureSample, Hand};

/// Everything observed during one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickInput {
    pub left: Option<GestureSample>,
    pub right: Option<GestureSample>,
    pub head: Option<HeadOrientation>,
}

impl TickInput {
    pub fn sample(&self, hand: Hand) -> Option<&GestureSample> {
        match hand {
            Hand::Left => self.left.as_ref(),
            Hand::Right => self.right.as_ref(),
        }
    }
}

/// Owns the channels, head tracker and sink for one teleop run.
pub struct TeleopSession {
    channels: Vec<ActionChannel>,
    head: HeadTracker,
    sink: Arc<dyn CommandSink>,
    ticks: u64,
    shut_down: bool,
}

impl TeleopSession {
    /// Validate the config, build every channel and start watchdogs.
    pub fn new(config: &TeleopConfig, sink: Arc<dyn CommandSink>) -> anyhow::Result<Self> {
        config.validate()?;
        let channels = config
            .channels
            .iter()
            .map(|c| ActionChannel::new(c.clone(), config.watchdog, Arc::clone(&sink)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        info!(
            channels = channels.len(),
            watchdogs = channels.iter().filter(|c| c.has_watchdog()).count(),
            head = config.head.enabled,
            "teleop session started"
        );
        Ok(Self {
            channels,
            head: HeadTracker::new(config.head),
            sink,
            ticks: 0,
            shut_down: false,
        })
    }

    /// Process one tick.  Returns the commands published during it.
    pub fn tick(&mut self, input: &TickInput) -> Vec<Command> {
        if self.shut_down {
            return Vec::new();
        }
        self.ticks += 1;

        let mut published = Vec::new();
        for channel in &self.channels {
            if let Some(cmd) = channel.tick(input.sample(channel.hand())) {
                published.push(Command::Motion(cmd));
            }
        }
        if let Some(orientation) = input.head {
            if let Some(pt) = self.head.update(orientation) {
                debug!(pan = pt.pan_deg, tilt = pt.tilt_deg, "pan/tilt changed");
                let cmd = Command::PanTilt(pt);
                self.sink.publish(&cmd);
                published.push(cmd);
            }
        }
        published
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn channels(&self) -> &[ActionChannel] {
        &self.channels
    }

    pub fn last_pan_tilt(&self) -> Option<PanTilt> {
        self.head.last_published()
    }

    /// Stop all motion, dispose channels and join their watchdogs.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for channel in &self.channels {
            channel.shutdown();
        }
        // Dropping the channels joins the watchdog threads.
        self.channels.clear();
        info!(ticks = self.ticks, "teleop session shut down");
    }

    pub fn status_sexp(&self) -> String {
        let channels: Vec<String> = self.channels.iter().map(|c| c.status_sexp()).collect();
        format!(
            "(:ticks {} :running {} :channels ({}) :head {})",
            self.ticks,
            if self.shut_down { "nil" } else { "t" },
            channels.join(" "),
            self.head.status_sexp()
        )
    }
}

impl Drop for TeleopSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::super::command::{MotionCommand, RecordingSink};
    use super::super::hand::{GestureKind, Vec3};
    use super::super::motion::Phase;
    use super::*;

    fn hand(hand: Hand, gesture: GestureKind, x: f32, y: f32) -> Option<GestureSample> {
        Some(GestureSample::new(hand, gesture, Vec3::new(x, y, 0.0)))
    }

    fn session(config: TeleopConfig) -> (TeleopSession, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let session = TeleopSession::new(&config, sink.clone()).unwrap();
        (session, sink)
    }

    #[test]
    fn test_discrete_channels_are_independent() {
        let (mut s, sink) = session(TeleopConfig::discrete());
        s.tick(&TickInput {
            left: hand(Hand::Left, GestureKind::Fist, 0.0, 0.0),
            right: hand(Hand::Right, GestureKind::Victory, 0.0, 1.0),
            head: None,
        });
        assert_eq!(s.channels()[0].phase(), Phase::Detected);
        assert_eq!(s.channels()[1].phase(), Phase::Detected);

        // Release only the left hand
        let out = s.tick(&TickInput {
            left: hand(Hand::Left, GestureKind::Five, 2.0, 0.0),
            right: hand(Hand::Right, GestureKind::Victory, 0.0, 0.5),
            head: None,
        });
        assert_eq!(out.len(), 1);
        assert!(matches!(
            out[0],
            Command::Motion(MotionCommand::Discrete { amount, .. }) if (amount + 2.0).abs() < 1e-6
        ));
        assert_eq!(s.channels()[1].phase(), Phase::Detected);

        let out = s.tick(&TickInput {
            left: None,
            right: hand(Hand::Right, GestureKind::NoDetection, 0.0, 0.5),
            head: None,
        });
        assert!(matches!(
            out[0],
            Command::Motion(MotionCommand::Discrete { amount, .. }) if (amount - 0.5).abs() < 1e-6
        ));
        assert_eq!(sink.commands().len(), 2);
    }

    #[test]
    fn test_head_published_on_change() {
        let (mut s, sink) = session(TeleopConfig::continuous());
        let head = |yaw: f32| TickInput {
            head: Some(HeadOrientation {
                yaw_deg: yaw,
                pitch_deg: 0.0,
            }),
            ..TickInput::default()
        };
        assert_eq!(s.tick(&head(10.0)).len(), 1);
        assert!(s.tick(&head(10.4)).is_empty());
        assert_eq!(s.tick(&head(350.0)).len(), 1);
        assert_eq!(
            s.last_pan_tilt(),
            Some(PanTilt {
                pan_deg: -10,
                tilt_deg: 0
            })
        );
        assert_eq!(sink.commands().len(), 2);
    }

    #[test]
    fn test_idle_ticks_publish_nothing() {
        let (mut s, sink) = session(TeleopConfig::persistent());
        for _ in 0..10 {
            assert!(s.tick(&TickInput::default()).is_empty());
        }
        assert!(sink.commands().is_empty());
        assert_eq!(s.ticks(), 10);
    }

    #[test]
    fn test_shutdown_stops_active_motion_once() {
        let (mut s, sink) = session(TeleopConfig::persistent());
        s.tick(&TickInput {
            left: hand(Hand::Left, GestureKind::Fist, 0.0, 0.0),
            ..TickInput::default()
        });
        s.shutdown();
        s.shutdown();
        assert_eq!(sink.stop_count(), 1);
        assert!(s.tick(&TickInput::default()).is_empty());
        assert!(s.status_sexp().contains(":running nil"));
    }

    #[test]
    fn test_drop_shuts_down() {
        let sink = Arc::new(RecordingSink::new());
        {
            let mut s = TeleopSession::new(&TeleopConfig::continuous(), sink.clone()).unwrap();
            s.tick(&TickInput {
                left: hand(Hand::Left, GestureKind::Fist, 0.0, 0.0),
                ..TickInput::default()
            });
        }
        assert_eq!(sink.stop_count(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = TeleopConfig::continuous();
        config.channels.clear();
        let sink = Arc::new(RecordingSink::new());
        assert!(TeleopSession::new(&config, sink).is_err());
    }

    #[test]
    fn test_status_sexp() {
        let (s, _sink) = session(TeleopConfig::discrete());
        let status = s.status_sexp();
        assert!(status.starts_with("(:ticks 0 :running t :channels ("));
        assert!(status.contains(":name \"left-fist\""));
        assert!(status.contains(":name \"right-victory\""));
        assert!(status.contains(":head (:enabled t"));
    }
}
