//! Safety watchdog for continuous-persistent motion.
//!
//! Two pieces:
//!
//! - `WatchdogTimer` is the deadline bookkeeping.  It takes explicit
//!   `Instant`s and never looks at the clock.
//! - `SafetyWatchdog` is the independent scheduling source: a named thread
//!   running a calloop event loop that invokes a poll callback every
//!   `poll_interval`, regardless of whether ticks are still arriving.
//!   Dropping it stops the loop and joins the thread.
//!
//! The callback is expected to lock the channel state, call
//! `WatchdogTimer::poll`, and emit the stop itself (see `ActionChannel`).

use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use calloop::channel::{self, Sender};
use calloop::EventLoop;
use tracing::{debug, info, warn};

// ── Deadline bookkeeping ───────────────────────────────────

/// Arm/kick/expire deadline for one state machine.
#[derive(Debug, Clone)]
pub struct WatchdogTimer {
    timeout: Duration,
    armed: bool,
    last_kick: Option<Instant>,
}

impl WatchdogTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            armed: false,
            last_kick: None,
        }
    }

    /// Start the deadline from `now`.
    pub fn arm(&mut self, timeout: Duration, now: Instant) {
        self.timeout = timeout;
        self.armed = true;
        self.last_kick = Some(now);
    }

    /// Push the deadline out.  No-op when not armed.
    pub fn kick(&mut self, now: Instant) {
        if self.armed {
            self.last_kick = Some(now);
        }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check the deadline.  Returns true exactly once per expiry: the
    /// timer disarms itself when it fires.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.armed {
            return false;
        }
        let Some(last) = self.last_kick else {
            return false;
        };
        if now.saturating_duration_since(last) > self.timeout {
            self.armed = false;
            return true;
        }
        false
    }
}

// ── Watchdog thread ────────────────────────────────────────

/// Event loop state for the watchdog thread.
struct WatchdogLoop {
    running: bool,
}

/// Background poller.  Stops and joins on drop.
pub struct SafetyWatchdog {
    name: String,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SafetyWatchdog {
    /// Spawn the watchdog thread.  `on_poll` runs on that thread every
    /// `poll_interval` until the watchdog is dropped.
    ///
    /// Returns once the event loop is set up, so loop creation errors are
    /// reported to the caller instead of being lost on the thread.
    pub fn spawn<F>(name: &str, poll_interval: Duration, mut on_poll: F) -> anyhow::Result<Self>
    where
        F: FnMut(Instant) + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = channel::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<anyhow::Result<()>>();
        let thread_name = format!("watchdog-{}", name);
        let log_name = name.to_string();

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let setup = || -> anyhow::Result<EventLoop<'static, WatchdogLoop>> {
                    let event_loop = EventLoop::<WatchdogLoop>::try_new()
                        .context("creating watchdog event loop")?;
                    event_loop
                        .handle()
                        .insert_source(shutdown_rx, |event, _, state: &mut WatchdogLoop| match event {
                            channel::Event::Msg(()) | channel::Event::Closed => state.running = false,
                        })
                        .map_err(|e| anyhow!("registering watchdog shutdown channel: {}", e.error))?;
                    Ok(event_loop)
                };

                let mut event_loop = match setup() {
                    Ok(event_loop) => {
                        let _ = ready_tx.send(Ok(()));
                        event_loop
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                debug!(
                    channel = %log_name,
                    poll_ms = poll_interval.as_millis() as u64,
                    "watchdog loop running"
                );
                let mut state = WatchdogLoop { running: true };
                while state.running {
                    if let Err(e) = event_loop.dispatch(Some(poll_interval), &mut state) {
                        warn!(channel = %log_name, "watchdog dispatch failed: {}", e);
                        break;
                    }
                    if !state.running {
                        break;
                    }
                    on_poll(Instant::now());
                }
                debug!(channel = %log_name, "watchdog loop exited");
            })
            .with_context(|| format!("spawning thread {}", thread_name))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| anyhow!("watchdog thread {} exited during setup", thread_name))
            .and_then(|r| r);
        if let Err(e) = ready {
            let _ = handle.join();
            return Err(e);
        }

        info!(
            channel = name,
            poll_ms = poll_interval.as_millis() as u64,
            "safety watchdog started"
        );
        Ok(Self {
            name: name.to_string(),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the watchdog thread is still alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }
}

impl Drop for SafetyWatchdog {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            // A closed channel also stops the loop, so a failed send is fine.
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                warn!(channel = %self.name, "watchdog dropped from its own thread, not joining");
                return;
            }
            if handle.join().is_err() {
                warn!(channel = %self.name, "watchdog thread panicked");
            }
        }
        debug!(channel = %self.name, "safety watchdog stopped");
    }
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const T: Duration = Duration::from_millis(200);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_expires_once_after_timeout() {
        let t0 = Instant::now();
        let mut timer = WatchdogTimer::new(T);
        timer.arm(T, t0);
        assert!(!timer.poll(t0 + ms(100)));
        assert!(!timer.poll(t0 + T));
        assert!(timer.poll(t0 + ms(201)));
        assert!(!timer.is_armed());
        // Fired once; later polls stay quiet
        assert!(!timer.poll(t0 + ms(500)));
        assert!(!timer.poll(t0 + ms(5000)));
    }

    #[test]
    fn test_kick_defers_deadline() {
        let t0 = Instant::now();
        let mut timer = WatchdogTimer::new(T);
        timer.arm(T, t0);
        timer.kick(t0 + ms(199));
        assert!(!timer.poll(t0 + ms(250)));
        assert!(!timer.poll(t0 + ms(399)));
        assert!(timer.poll(t0 + ms(400)));
    }

    #[test]
    fn test_kick_when_disarmed_is_noop() {
        let t0 = Instant::now();
        let mut timer = WatchdogTimer::new(T);
        timer.kick(t0);
        assert!(!timer.is_armed());
        assert!(!timer.poll(t0 + ms(1000)));
        // A later arm starts its own deadline
        timer.arm(T, t0 + ms(1000));
        assert!(!timer.poll(t0 + ms(1150)));
    }

    #[test]
    fn test_disarm_suppresses_expiry() {
        let t0 = Instant::now();
        let mut timer = WatchdogTimer::new(T);
        timer.arm(T, t0);
        timer.disarm();
        assert!(!timer.poll(t0 + ms(1000)));
    }

    #[test]
    fn test_rearm_after_expiry() {
        let t0 = Instant::now();
        let mut timer = WatchdogTimer::new(T);
        timer.arm(T, t0);
        assert!(timer.poll(t0 + ms(300)));
        timer.arm(ms(50), t0 + ms(300));
        assert_eq!(timer.timeout(), ms(50));
        assert!(!timer.poll(t0 + ms(340)));
        assert!(timer.poll(t0 + ms(351)));
    }

    #[test]
    fn test_poll_with_earlier_instant_does_not_fire() {
        let t0 = Instant::now() + ms(10);
        let mut timer = WatchdogTimer::new(T);
        timer.arm(T, t0);
        assert!(!timer.poll(t0 - ms(5)));
    }

    #[test]
    fn test_thread_polls_until_dropped() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let watchdog = SafetyWatchdog::spawn("test", ms(5), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(watchdog.name(), "test");
        assert!(watchdog.is_running());

        thread::sleep(ms(100));
        drop(watchdog);
        let after_drop = polls.load(Ordering::SeqCst);
        assert!(after_drop >= 2, "expected several polls, got {after_drop}");

        thread::sleep(ms(50));
        assert_eq!(polls.load(Ordering::SeqCst), after_drop);
    }
}
