//! Liveness watchdog.
//!
//! A timer thread ticks at a fixed period for as long as a session runs; the
//! coordinator answers each tick by asking its [`LivenessMonitor`] whether the
//! turn machine is stuck, and by checking the open handshake deadline.
//! Recoveries are anomalies: logged, never surfaced.

use crate::config::TurnSettings;
use crate::error::Result;
use crate::turn::TurnState;
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutEvent {
    pub elapsed: Duration,
    pub limit: Duration,
}

/// Fires once per `start()` after the limit has passed.
#[derive(Debug)]
pub struct TimeoutTracker {
    limit: Duration,
    started_at: Option<Instant>,
    fired: bool,
}

impl TimeoutTracker {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            started_at: None,
            fired: false,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.started_at = Some(now);
        self.fired = false;
    }

    pub fn stop(&mut self) {
        self.started_at = None;
        self.fired = false;
    }

    pub fn check(&mut self, now: Instant) -> Option<TimeoutEvent> {
        let started_at = self.started_at?;
        if self.fired {
            return None;
        }
        let elapsed = now.saturating_duration_since(started_at);
        if elapsed > self.limit {
            self.fired = true;
            return Some(TimeoutEvent {
                elapsed,
                limit: self.limit,
            });
        }
        None
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }
}

/// A stuck turn machine, as seen by the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anomaly {
    /// The state the machine was stuck in.
    pub state: TurnState,
    pub elapsed: Duration,
    pub limit: Duration,
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} for {} ms with no remote response (limit {} ms)",
            self.state,
            self.elapsed.as_millis(),
            self.limit.as_millis()
        )
    }
}

/// Decides, per tick, whether the machine needs to be forced back to `Armed`.
///
/// Only `Processing` waits on the remote with nothing local to end it. `Idle`
/// before the session is confirmed is the open handshake, bounded separately
/// by the coordinator.
#[derive(Debug)]
pub struct LivenessMonitor {
    processing: TimeoutTracker,
    watching: Option<(TurnState, Instant)>,
    recoveries: u64,
}

impl LivenessMonitor {
    pub fn new(processing_timeout: Duration) -> Self {
        Self {
            processing: TimeoutTracker::new(processing_timeout),
            watching: None,
            recoveries: 0,
        }
    }

    pub fn from_settings(turn: &TurnSettings) -> Self {
        Self::new(Duration::from_millis(turn.processing_timeout_ms as u64))
    }

    /// Returns an anomaly at most once per stay in a state.
    pub fn check(&mut self, state: TurnState, entered_at: Instant, now: Instant) -> Option<Anomaly> {
        let key = (state, entered_at);
        if self.watching != Some(key) {
            self.watching = Some(key);
            self.processing.stop();
            if state == TurnState::Processing {
                self.processing.start(entered_at);
            }
        }

        let event = self.processing.check(now)?;
        self.recoveries += 1;
        Some(Anomaly {
            state,
            elapsed: event.elapsed,
            limit: event.limit,
        })
    }

    /// How many anomalies have been reported.
    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }
}

/// Periodic timer thread.
pub struct Watchdog;

impl Watchdog {
    /// Calls `on_tick` every `period` until cancelled or until it returns
    /// `false`.
    pub fn spawn<F>(period: Duration, mut on_tick: F) -> Result<WatchdogHandle>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                loop {
                    match cancel_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {
                            if !on_tick() {
                                break;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!(target: "parley::watchdog", "watchdog stopped");
            })?;

        Ok(WatchdogHandle {
            cancel: Some(cancel_tx),
            handle: Some(handle),
        })
    }
}

/// Owning handle; the timer thread is stopped and joined on cancel or drop.
pub struct WatchdogHandle {
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl WatchdogHandle {
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.cancel.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!(target: "parley::watchdog", "watchdog thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn timeout_tracker_fires_once_after_limit() {
        let mut tracker = TimeoutTracker::new(2 * SECOND);
        let start = Instant::now();
        tracker.start(start);

        assert!(tracker.check(start + SECOND).is_none());
        let fired = tracker.check(start + 3 * SECOND).unwrap();
        assert_eq!(fired.limit, 2 * SECOND);
        assert!(tracker.check(start + 4 * SECOND).is_none());
    }

    #[test]
    fn timeout_tracker_resets_on_stop() {
        let mut tracker = TimeoutTracker::new(SECOND);
        let start = Instant::now();
        tracker.start(start);
        tracker.stop();

        assert!(tracker.check(start + 2 * SECOND).is_none());
        assert!(!tracker.is_running());
    }

    fn monitor() -> LivenessMonitor {
        LivenessMonitor::new(15 * SECOND)
    }

    #[test]
    fn processing_timeout_fires_once() {
        let mut monitor = monitor();
        let entered = Instant::now();
        assert!(monitor.check(TurnState::Processing, entered, entered + 14 * SECOND).is_none());

        let anomaly = monitor.check(TurnState::Processing, entered, entered + 16 * SECOND);
        assert_eq!(anomaly.map(|a| a.state), Some(TurnState::Processing));
        assert!(monitor.check(TurnState::Processing, entered, entered + 20 * SECOND).is_none());
        assert_eq!(monitor.recoveries(), 1);
    }

    #[test]
    fn other_states_never_fire() {
        let mut monitor = monitor();
        let entered = Instant::now();
        for state in [
            TurnState::Idle,
            TurnState::Armed,
            TurnState::Listening,
            TurnState::Speaking,
        ] {
            assert!(monitor.check(state, entered, entered + 60 * SECOND).is_none());
        }
        assert_eq!(monitor.recoveries(), 0);
    }

    #[test]
    fn new_stay_rearms_detection() {
        let mut monitor = monitor();
        let first = Instant::now();
        assert!(monitor.check(TurnState::Processing, first, first + 16 * SECOND).is_some());

        let second = first + 30 * SECOND;
        assert!(monitor.check(TurnState::Processing, second, second + SECOND).is_none());
        assert!(monitor.check(TurnState::Processing, second, second + 16 * SECOND).is_some());
        assert_eq!(monitor.recoveries(), 2);
    }

    #[test]
    fn leaving_processing_cancels_the_timer() {
        let mut monitor = monitor();
        let entered = Instant::now();
        assert!(monitor.check(TurnState::Processing, entered, entered + 10 * SECOND).is_none());
        let speaking = entered + 10 * SECOND;
        assert!(monitor.check(TurnState::Speaking, speaking, entered + 20 * SECOND).is_none());
    }

    #[test]
    fn anomaly_display() {
        let anomaly = Anomaly {
            state: TurnState::Processing,
            elapsed: Duration::from_millis(15200),
            limit: 15 * SECOND,
        };
        assert_eq!(
            anomaly.to_string(),
            "processing for 15200 ms with no remote response (limit 15000 ms)"
        );
    }

    #[test]
    fn watchdog_ticks_until_cancelled() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let handle = Watchdog::spawn(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        assert!(handle.is_running());
        handle.cancel();

        let after_cancel = ticks.load(Ordering::SeqCst);
        assert!(after_cancel >= 2);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn watchdog_stops_when_tick_declines() {
        let handle = Watchdog::spawn(Duration::from_millis(5), || false).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_running());
    }
}
