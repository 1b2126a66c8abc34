//! One action channel: a state machine, its sink, and (for persistent
//! mode) its safety watchdog.
//!
//! The machine, the watchdog deadline and the disposed flag live behind a
//! single mutex shared by the tick context and the watchdog thread.  Both
//! sides publish to the sink while holding that lock, so an expiry can
//! never interleave with a tick: either the tick restarts motion first and
//! the expiry sees a fresh deadline, or the expiry stops motion first and
//! the tick starts from Idle.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::command::{CommandSink, MotionCommand};
use super::config::{ChannelConfig, WatchdogConfig};
use super::hand::{GestureSample, Hand};
use super::motion::{MotionStateMachine, Phase};
use super::watchdog::{SafetyWatchdog, WatchdogTimer};

/// State shared with the watchdog thread.
struct ChannelCell {
    machine: MotionStateMachine,
    timer: Option<WatchdogTimer>,
    disposed: bool,
}

fn lock(cell: &Mutex<ChannelCell>) -> MutexGuard<'_, ChannelCell> {
    cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A hand/trigger channel wired to a sink.
pub struct ActionChannel {
    name: String,
    cell: Arc<Mutex<ChannelCell>>,
    sink: Arc<dyn CommandSink>,
    watchdog: Option<SafetyWatchdog>,
}

impl ActionChannel {
    /// Build a channel.  Persistent channels also start their watchdog.
    pub fn new(
        config: ChannelConfig,
        watchdog: WatchdogConfig,
        sink: Arc<dyn CommandSink>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let name = format!("{}-{}", config.hand.as_str(), config.trigger.as_str());
        let persistent = config.mode.is_persistent();

        let cell = Arc::new(Mutex::new(ChannelCell {
            machine: MotionStateMachine::new(config),
            timer: persistent.then(|| WatchdogTimer::new(watchdog.timeout)),
            disposed: false,
        }));

        let watchdog = if persistent {
            watchdog.validate()?;
            let weak = Arc::downgrade(&cell);
            let poll_sink = Arc::clone(&sink);
            let poll_name = name.clone();
            Some(SafetyWatchdog::spawn(&name, watchdog.poll_interval, move |now| {
                poll_weak(&weak, poll_sink.as_ref(), &poll_name, now);
            })?)
        } else {
            None
        };

        debug!(channel = %name, persistent, "channel created");
        Ok(Self {
            name,
            cell,
            sink,
            watchdog,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hand(&self) -> Hand {
        lock(&self.cell).machine.hand()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.cell).machine.phase()
    }

    pub fn has_watchdog(&self) -> bool {
        self.watchdog.is_some()
    }

    /// Feed one tick.  Any command produced is published before returning.
    pub fn tick(&self, sample: Option<&GestureSample>) -> Option<MotionCommand> {
        self.tick_at(sample, Instant::now())
    }

    fn tick_at(&self, sample: Option<&GestureSample>, now: Instant) -> Option<MotionCommand> {
        let mut cell = lock(&self.cell);
        if cell.disposed {
            return None;
        }
        let command = cell.machine.on_sample(sample);
        let active = cell.machine.phase().is_active();
        if let Some(timer) = cell.timer.as_mut() {
            if !active {
                timer.disarm();
            } else if timer.is_armed() {
                timer.kick(now);
            } else {
                timer.arm(timer.timeout(), now);
            }
        }
        if let Some(cmd) = command {
            self.sink.publish(&cmd.into());
        }
        command
    }

    /// Stop any active motion and mark the channel disposed.  Later ticks
    /// and watchdog polls do nothing.
    pub fn shutdown(&self) {
        let mut cell = lock(&self.cell);
        if cell.disposed {
            return;
        }
        if let Some(cmd) = cell.machine.force_idle() {
            debug!(channel = %self.name, "stopping active motion on shutdown");
            self.sink.publish(&cmd.into());
        }
        if let Some(timer) = cell.timer.as_mut() {
            timer.disarm();
        }
        cell.disposed = true;
    }

    pub fn status_sexp(&self) -> String {
        let cell = lock(&self.cell);
        let machine = cell.machine.status_sexp();
        let armed = cell.timer.as_ref().map_or(false, |t| t.is_armed());
        format!(
            "(:name \"{}\" :watchdog {} :armed {} :state {})",
            self.name,
            if self.watchdog.as_ref().map_or(false, |w| w.is_running()) { "t" } else { "nil" },
            if armed { "t" } else { "nil" },
            machine
        )
    }
}

impl Drop for ActionChannel {
    fn drop(&mut self) {
        // Mark disposed before the watchdog goes away so a poll already in
        // flight sees it and does nothing.
        lock(&self.cell).disposed = true;
        self.watchdog.take();
    }
}

// ── Watchdog poll ──────────────────────────────────────────

fn poll_weak(cell: &Weak<Mutex<ChannelCell>>, sink: &dyn CommandSink, name: &str, now: Instant) {
    if let Some(cell) = cell.upgrade() {
        expire(&cell, sink, name, now);
    }
}

/// One watchdog poll.  Returns true when the deadline fired.
fn expire(cell: &Mutex<ChannelCell>, sink: &dyn CommandSink, name: &str, now: Instant) -> bool {
    let mut cell = lock(cell);
    if cell.disposed {
        return false;
    }
    let Some(timer) = cell.timer.as_mut() else {
        return false;
    };
    if !timer.poll(now) {
        return false;
    }
    let timeout_ms = timer.timeout().as_millis() as u64;
    match cell.machine.force_idle() {
        Some(cmd) => {
            warn!(channel = name, timeout_ms, "no samples within watchdog timeout, stopping");
            sink.publish(&cmd.into());
        }
        None => debug!(channel = name, "watchdog fired on idle channel"),
    }
    true
}

// ── Tests ──────────────────────────────────────────────────
