//! The coordinator thread.
//!
//! Owns the turn machine, the duck controller, the playback scheduler and the
//! uplink, and is the only writer of the published state cells. Everything
//! reaches it as a message: scored frames, session events, control requests
//! and watchdog ticks.

use crate::clock::Clock;
use crate::config::Config;
use crate::defaults;
use crate::duck::{DuckController, SharedGain};
use crate::engine::events::EngineEvent;
use crate::engine::watchdog::{LivenessMonitor, TimeoutTracker, WatchdogHandle};
use crate::pipeline::uplink::{Uplink, UplinkFrame};
use crate::pipeline::vad_station::ScoredFrame;
use crate::playback::PlaybackScheduler;
use crate::session::{RemoteSession, SessionEvent};
use crate::turn::{Action, Transcript, TranscriptEntry, TurnCell, TurnConfig, TurnMachine, TurnState};
use crossbeam_channel::{Receiver, Sender, never, select};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Requests delivered to the coordinator from other threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    MuteOutput(bool),
    WatchdogTick,
    /// The capture loop stopped on a device error.
    CaptureFault(String),
    Close,
}

/// State the coordinator publishes for other threads.
///
/// Readers never block the coordinator: the state and gain are atomics and
/// the transcript lock is only held for a push or a clone.
#[derive(Debug, Clone)]
pub struct EngineShared {
    pub state: TurnCell,
    pub gain: SharedGain,
    /// Input mute; read by the VAD station and the coordinator.
    pub input_muted: Arc<AtomicBool>,
    /// Cleared when the session ends; the capture loop watches it.
    pub running: Arc<AtomicBool>,
    transcript: Arc<Mutex<Transcript>>,
}

impl EngineShared {
    fn new(gain: SharedGain) -> Self {
        Self {
            state: TurnCell::default(),
            gain,
            input_muted: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(true)),
            transcript: Arc::new(Mutex::new(Transcript::default())),
        }
    }

    fn transcript_guard(&self) -> MutexGuard<'_, Transcript> {
        match self.transcript.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Finalized entries so far, in order.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript_guard().entries().to_vec()
    }

    pub fn is_input_muted(&self) -> bool {
        self.input_muted.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct Coordinator {
    machine: TurnMachine,
    duck: DuckController,
    scheduler: PlaybackScheduler,
    uplink: Box<dyn Uplink>,
    session: Arc<dyn RemoteSession>,
    clock: Arc<dyn Clock>,
    events: Sender<EngineEvent>,
    shared: EngineShared,
    monitor: LivenessMonitor,
    /// Runs from construction until the remote confirms the session.
    handshake: TimeoutTracker,
    watchdog: Option<WatchdogHandle>,
    tick_period: Duration,
    last_tick: Instant,
    capture_faulted: bool,
    stopped: bool,
    frames_sent: u64,
}

impl Coordinator {
    /// Takes ownership of an open session and its output path.
    pub fn new(
        config: &Config,
        scheduler: PlaybackScheduler,
        uplink: Box<dyn Uplink>,
        session: Arc<dyn RemoteSession>,
        clock: Arc<dyn Clock>,
        events: Sender<EngineEvent>,
    ) -> Self {
        let now = clock.now();
        let duck = DuckController::new(&config.duck);
        let shared = EngineShared::new(duck.shared());
        let mut handshake =
            TimeoutTracker::new(Duration::from_millis(config.session.open_timeout_ms as u64));
        handshake.start(now);
        Self {
            machine: TurnMachine::new(TurnConfig::from_settings(&config.turn), now),
            duck,
            scheduler,
            uplink,
            session,
            clock,
            events,
            shared,
            monitor: LivenessMonitor::from_settings(&config.turn),
            handshake,
            watchdog: None,
            tick_period: Duration::from_millis(defaults::CONTROL_TICK_MS),
            last_tick: now,
            capture_faulted: false,
            stopped: false,
            frames_sent: 0,
        }
    }

    /// Hands over the watchdog so teardown can cancel it.
    pub fn with_watchdog(mut self, watchdog: WatchdogHandle) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    pub fn shared(&self) -> EngineShared {
        self.shared.clone()
    }

    pub fn state(&self) -> TurnState {
        self.machine.state()
    }

    pub fn gain(&self) -> f32 {
        self.duck.gain()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Frames handed to the uplink so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn transcript(&self) -> &Transcript {
        self.machine.transcript()
    }

    /// Anomalies recovered by the watchdog.
    pub fn recoveries(&self) -> u64 {
        self.monitor.recoveries()
    }

    pub fn handle_frame(&mut self, scored: &ScoredFrame) {
        if self.stopped {
            return;
        }
        let transmit = self
            .machine
            .on_frame(&scored.decision, scored.frame.timestamp, scored.end);
        self.apply_actions();

        if !transmit || self.capture_faulted || self.shared.is_input_muted() {
            return;
        }
        let frame = UplinkFrame {
            sequence: scored.frame.sequence,
            samples: scored.frame.samples.clone(),
            gain: self.duck.gain(),
        };
        match self.uplink.send(frame) {
            Ok(()) => self.frames_sent += 1,
            Err(e) => tracing::warn!(target: "parley::uplink", error = %e, "frame dropped"),
        }
    }

    pub fn handle_session_event(&mut self, event: SessionEvent) {
        if self.stopped {
            return;
        }
        tracing::trace!(target: "parley::session", ?event, "session event");
        let now = self.clock.now();
        self.machine.on_session_event(event, now);
        if self.machine.state() != TurnState::Idle {
            self.handshake.stop();
        }
        self.apply_actions();
    }

    pub fn handle_control(&mut self, control: Control) {
        if self.stopped {
            return;
        }
        match control {
            Control::MuteOutput(muted) => {
                tracing::info!(target: "parley::playback", muted, "output mute changed");
                self.scheduler.set_output_muted(muted);
            }
            Control::WatchdogTick => self.check_liveness(),
            Control::CaptureFault(reason) => {
                if !self.capture_faulted {
                    self.capture_faulted = true;
                    self.uplink.close();
                    tracing::error!(target: "parley::capture", %reason, "capture failed, uplink muted");
                    self.emit(EngineEvent::Fault(format!("microphone capture failed: {}", reason)));
                }
            }
            Control::Close => {
                let now = self.clock.now();
                self.machine.close(now);
                self.apply_actions();
            }
        }
    }

    /// Advances time-driven work: playback reaping, release after settle,
    /// and the duck gain.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        let dt = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        if self.stopped {
            return;
        }

        self.scheduler.reap();
        self.machine.on_tick(now, self.scheduler.is_busy());
        self.apply_actions();
        self.duck.advance(self.machine.state(), dt);
    }

    fn check_liveness(&mut self) {
        let now = self.clock.now();
        if let Some(expired) = self.handshake.check(now) {
            tracing::warn!(
                target: "parley::session",
                waited_ms = expired.elapsed.as_millis() as u64,
                "remote never confirmed the session"
            );
            self.shutdown(Some(format!(
                "session was not confirmed within {} ms",
                expired.limit.as_millis()
            )));
            return;
        }

        let anomaly = self
            .monitor
            .check(self.machine.state(), self.machine.entered_at(), now);
        if let Some(anomaly) = anomaly {
            tracing::warn!(
                target: "parley::watchdog",
                %anomaly,
                recoveries = self.monitor.recoveries(),
                "forcing turn machine back to armed"
            );
            self.machine.force_armed(now);
            self.apply_actions();
        }
    }

    fn apply_actions(&mut self) {
        for action in self.machine.drain_actions() {
            match action {
                Action::Emit(event) => {
                    match &event {
                        EngineEvent::StateChanged(state) => self.shared.state.set(*state),
                        EngineEvent::TranscriptAppended(entry) => {
                            self.shared.transcript_guard().push(entry.clone())
                        }
                        _ => {}
                    }
                    self.emit(event);
                }
                Action::Play(bytes) => {
                    if let Err(e) = self.scheduler.enqueue(&bytes) {
                        tracing::warn!(target: "parley::playback", error = %e, "audio chunk dropped");
                    }
                }
                Action::Flush => {
                    self.scheduler.flush();
                }
                Action::Shutdown { fault } => self.shutdown(fault),
            }
        }
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!(target: "parley::engine", "no event subscriber");
        }
    }

    /// Releases everything the session holds. Runs once.
    fn shutdown(&mut self, fault: Option<String>) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.handshake.stop();

        match fault {
            Some(reason) => {
                tracing::error!(target: "parley::engine", %reason, "session failed");
                self.emit(EngineEvent::Fault(reason));
            }
            None => tracing::info!(
                target: "parley::engine",
                frames_sent = self.frames_sent,
                "session closed"
            ),
        }

        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.cancel();
        }
        self.uplink.close();
        self.session.close();
        if let Err(e) = self.scheduler.close() {
            tracing::warn!(target: "parley::playback", error = %e, "failed to close output");
        }
        self.duck.reset();
        self.shared.state.set(TurnState::Idle);
    }

    /// Event loop; returns once the session has been shut down.
    pub fn run(
        mut self,
        frames: Receiver<ScoredFrame>,
        session_events: Receiver<SessionEvent>,
        control: Receiver<Control>,
    ) {
        let mut frames = frames;
        let mut session_events = session_events;
        let tick = self.tick_period;

        while !self.stopped {
            let mut capture_ended = false;
            let mut session_ended = false;

            select! {
                recv(frames) -> msg => match msg {
                    Ok(scored) => self.handle_frame(&scored),
                    Err(_) => capture_ended = true,
                },
                recv(session_events) -> msg => match msg {
                    Ok(event) => self.handle_session_event(event),
                    Err(_) => session_ended = true,
                },
                recv(control) -> msg => match msg {
                    Ok(request) => self.handle_control(request),
                    Err(_) => self.handle_control(Control::Close),
                },
                default(tick) => {}
            }

            if capture_ended {
                tracing::debug!(target: "parley::capture", "frame stream ended");
                frames = never();
            }
            if session_ended {
                tracing::warn!(target: "parley::session", "event stream ended without close");
                session_events = never();
                self.handle_session_event(SessionEvent::Closed);
            }
            self.tick();
        }
    }
}
