//! Replay of recorded tick traces.
//!
//! A trace is one s-expression per line:
//!
//! ```text
//! (:dt-ms 16 :left (:gesture :fist :pos (0.0 0.1 0.3) :confidence 0.9) :right nil :head (:yaw 12 :pitch 350))
//! ```
//!
//! `:dt-ms` is the delay before the tick.  Absent or `nil` hands mean the
//! hand is not tracked.  Blank lines and lines starting with `;` are
//! ignored.  A line that does not parse is logged and skipped; a hand entry
//! with a bad label, position or confidence becomes a no-detection sample.

use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use lexpr::Value;
use tracing::{debug, info, warn};

use crate::control::{
    Command, GestureSample, Hand, HeadOrientation, MotionCommand, TeleopSession, TickInput, Vec3,
};
use crate::sexp::{as_triple, get_float, get_keyword, get_value, is_nil};

// ── Trace model ────────────────────────────────────────────

/// One recorded tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceTick {
    /// Delay before this tick.
    pub dt: Duration,
    pub input: TickInput,
}

/// Parsed trace.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub ticks: Vec<TraceTick>,
    /// Lines that did not parse.
    pub skipped: usize,
}

impl Trace {
    /// Parse a whole trace.  Never fails; bad lines are counted in `skipped`.
    pub fn parse(raw: &str) -> Self {
        let mut trace = Self::default();
        for (i, line) in raw.lines().enumerate() {
            match parse_line(line) {
                Ok(Some(tick)) => trace.ticks.push(tick),
                Ok(None) => {}
                Err(e) => {
                    warn!(line = i + 1, "skipping malformed trace line: {:#}", e);
                    trace.skipped += 1;
                }
            }
        }
        trace
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading trace {}", path.display()))?;
        let trace = Self::parse(&raw);
        info!(
            path = %path.display(),
            ticks = trace.ticks.len(),
            skipped = trace.skipped,
            "trace loaded"
        );
        Ok(trace)
    }

    /// Sum of all tick delays.
    pub fn duration(&self) -> Duration {
        self.ticks.iter().map(|t| t.dt).sum()
    }
}

/// Parse one trace line.  Returns `Ok(None)` for blank and comment lines.
pub fn parse_line(line: &str) -> anyhow::Result<Option<TraceTick>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(';') {
        return Ok(None);
    }
    let value = lexpr::from_str(line).map_err(|e| anyhow!("malformed s-expression: {e}"))?;
    if !matches!(value, Value::Cons(_)) {
        bail!("expected a plist, got {}", value);
    }

    let dt_ms = get_float(&value, "dt-ms").unwrap_or(0.0);
    if !dt_ms.is_finite() || dt_ms < 0.0 {
        bail!(":dt-ms must be a non-negative number, got {}", dt_ms);
    }

    let input = TickInput {
        left: parse_hand(get_value(&value, "left"), Hand::Left),
        right: parse_hand(get_value(&value, "right"), Hand::Right),
        head: parse_head(get_value(&value, "head")),
    };
    Ok(Some(TraceTick {
        dt: Duration::from_micros((dt_ms * 1000.0).round() as u64),
        input,
    }))
}

fn parse_hand(value: Option<&Value>, hand: Hand) -> Option<GestureSample> {
    let value = value.filter(|v| !is_nil(v))?;
    let label = get_keyword(value, "gesture").unwrap_or_default();
    let position = get_value(value, "pos")
        .and_then(as_triple)
        .map(Vec3::from)
        .unwrap_or(Vec3::new(f32::NAN, f32::NAN, f32::NAN));
    let confidence = get_keyword(value, "confidence");
    Some(GestureSample::from_raw(hand, &label, position, confidence.as_deref()))
}

fn parse_head(value: Option<&Value>) -> Option<HeadOrientation> {
    let value = value.filter(|v| !is_nil(v))?;
    match (get_float(value, "yaw"), get_float(value, "pitch")) {
        (Some(yaw), Some(pitch)) => Some(HeadOrientation {
            yaw_deg: yaw as f32,
            pitch_deg: pitch as f32,
        }),
        _ => {
            debug!("head entry without numeric :yaw/:pitch ignored");
            None
        }
    }
}

// ── Driver ─────────────────────────────────────────────────

/// Counts from one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub ticks: usize,
    pub velocity: usize,
    pub stops: usize,
    pub discrete: usize,
    pub pan_tilt: usize,
}

impl ReplaySummary {
    /// Tally commands (as returned by `tick` or recorded by a sink).
    pub fn count(&mut self, commands: &[Command]) {
        for cmd in commands {
            match cmd {
                Command::Motion(m) if m.is_stop() => self.stops += 1,
                Command::Motion(MotionCommand::Velocity(_)) => self.velocity += 1,
                Command::Motion(_) => self.discrete += 1,
                Command::PanTilt(_) => self.pan_tilt += 1,
            }
        }
    }

    pub fn to_sexp(&self) -> String {
        format!(
            "(:ticks {} :velocity {} :stops {} :discrete {} :pan-tilt {})",
            self.ticks, self.velocity, self.stops, self.discrete, self.pan_tilt
        )
    }
}

/// Feed a trace into a session in real time.
///
/// Each tick waits `dt * time_scale` first, so a gap in the trace is a
/// real stall that the watchdog can observe.  A `time_scale` of 0 replays
/// as fast as possible.  The returned summary only counts commands
/// published from the tick path.
pub fn run(trace: &Trace, session: &mut TeleopSession, time_scale: f64) -> anyhow::Result<ReplaySummary> {
    if !time_scale.is_finite() || time_scale < 0.0 {
        bail!("time scale must be a non-negative number, got {}", time_scale);
    }
    info!(
        ticks = trace.ticks.len(),
        duration_ms = trace.duration().as_millis() as u64,
        time_scale,
        "replay starting"
    );

    let mut summary = ReplaySummary::default();
    for tick in &trace.ticks {
        let wait = Duration::try_from_secs_f64(tick.dt.as_secs_f64() * time_scale)
            .map_err(|e| anyhow!("tick delay {:?} scaled by {} is out of range: {}", tick.dt, time_scale, e))?;
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        let published = session.tick(&tick.input);
        summary.ticks += 1;
        summary.count(&published);
    }

    info!(ticks = summary.ticks, "replay finished");
    Ok(summary)
}

// ── Tests ──────────────────────────────────────────────────
