//! Voice session engine.
//!
//! [`VoiceEngine::start`] acquires the microphone, the output device and the
//! remote session, then wires up the threads:
//!
//! ```text
//! capture ──frames──▶ vad ──scored──▶ coordinator ──▶ uplink ──▶ session
//!                                       ▲     │
//!                 session events ───────┘     └──▶ playback ──▶ output
//! ```
//!
//! The returned [`EngineHandle`] is the only way in: mute, mute output,
//! close, plus read-only state and an event stream.

pub mod coordinator;
pub mod events;
pub mod watchdog;

pub use coordinator::{Control, Coordinator, EngineShared};
pub use events::EngineEvent;
pub use watchdog::{Anomaly, LivenessMonitor, TimeoutTracker, Watchdog, WatchdogHandle};

use crate::audio::output::AudioOutput;
use crate::audio::source::FrameSource;
use crate::audio::vad::VadConfig;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::defaults;
use crate::error::{ParleyError, Result};
use crate::pipeline::capture::{CaptureExit, CaptureLoop};
use crate::pipeline::error::{ErrorReporter, LogReporter};
use crate::pipeline::station::StationRunner;
use crate::pipeline::uplink::{UplinkStation, spawn_uplink};
use crate::pipeline::vad_station::VadStation;
use crate::playback::PlaybackScheduler;
use crate::session::{SessionConfig, SessionConnector};
use crate::turn::{TranscriptEntry, TurnState};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Devices acquired during start-up, released on drop unless handed on.
struct Acquired {
    source: Option<Box<dyn FrameSource>>,
    output: Option<Box<dyn AudioOutput>>,
}

impl Acquired {
    fn release(mut self) -> Option<(Box<dyn FrameSource>, Box<dyn AudioOutput>)> {
        match (self.source.take(), self.output.take()) {
            (Some(source), Some(output)) => Some((source, output)),
            (source, output) => {
                self.source = source;
                self.output = output;
                None
            }
        }
    }
}

impl Drop for Acquired {
    fn drop(&mut self) {
        if let Some(mut source) = self.source.take() {
            tracing::debug!(target: "parley::engine", "releasing microphone");
            if let Err(e) = source.stop() {
                tracing::warn!(target: "parley::engine", error = %e, "failed to stop microphone");
            }
        }
        if let Some(mut output) = self.output.take() {
            tracing::debug!(target: "parley::engine", "releasing output device");
            if let Err(e) = output.close() {
                tracing::warn!(target: "parley::engine", error = %e, "failed to close output");
            }
        }
    }
}

pub struct VoiceEngine {
    config: Config,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn ErrorReporter>,
}

impl VoiceEngine {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            reporter: Arc::new(LogReporter),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts a session.
    ///
    /// Every device acquired here is released again if a later step fails,
    /// so a failed start leaves nothing open.
    ///
    /// # Errors
    /// `ConfigInvalidValue` for an invalid configuration, `Acquisition` if the
    /// microphone cannot be started, `Session` if the remote cannot be opened.
    pub async fn start(
        &self,
        mut source: Box<dyn FrameSource>,
        output: Box<dyn AudioOutput>,
        connector: &dyn SessionConnector,
    ) -> Result<EngineHandle> {
        let mut acquired = Acquired {
            source: None,
            output: Some(output),
        };
        self.config.validate()?;

        source.start()?;
        acquired.source = Some(source);

        let input_rate = acquired
            .source
            .as_ref()
            .map_or(self.config.audio.sample_rate, |s| s.sample_rate());
        let output_rate = acquired
            .output
            .as_ref()
            .map_or(self.config.playback.sample_rate, |o| o.sample_rate());
        let session_config =
            SessionConfig::from_settings(&self.config.session, input_rate, output_rate);

        let link = connector.open(&session_config).await?;

        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let tick_tx = control_tx.clone();
        let period = Duration::from_millis(self.config.watchdog.period_ms as u64);
        let watchdog = match Watchdog::spawn(period, move || {
            tick_tx.send(Control::WatchdogTick).is_ok()
        }) {
            Ok(watchdog) => watchdog,
            Err(e) => {
                link.session.close();
                return Err(e);
            }
        };

        let Some((source, output)) = acquired.release() else {
            link.session.close();
            return Err(ParleyError::Other("audio devices missing after start".to_string()));
        };

        tracing::info!(
            target: "parley::engine",
            voice = %session_config.voice,
            input_rate,
            output_rate,
            "voice session started"
        );

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(defaults::FRAME_BUFFER);
        let (scored_tx, scored_rx) = crossbeam_channel::bounded(defaults::FRAME_BUFFER);

        let (uplink, uplink_runner) = spawn_uplink(
            Arc::clone(&link.session),
            input_rate,
            defaults::UPLINK_BUFFER,
            Arc::clone(&self.reporter),
        );

        let coordinator = Coordinator::new(
            &self.config,
            PlaybackScheduler::new(output),
            Box::new(uplink),
            Arc::clone(&link.session),
            Arc::clone(&self.clock),
            events_tx,
        )
        .with_watchdog(watchdog);
        let shared = coordinator.shared();

        let vad_station = VadStation::new(VadConfig::from_settings(&self.config.vad, input_rate))
            .with_mute_flag(Arc::clone(&shared.input_muted));
        let vad_runner =
            StationRunner::spawn(vad_station, frame_rx, scored_tx, Arc::clone(&self.reporter));

        let frame_len = defaults::frame_samples(input_rate, self.config.audio.frame_ms);
        let capture = CaptureLoop::new(source, frame_len, Arc::clone(&self.clock));
        let running = Arc::clone(&shared.running);
        let fault_tx = control_tx.clone();
        let capture_thread = thread::spawn(move || {
            if let CaptureExit::Faulted(e) = capture.run(frame_tx, &running) {
                let _ = fault_tx.send(Control::CaptureFault(e.to_string()));
            }
        });

        let session_events = link.events;
        let coordinator_thread =
            thread::spawn(move || coordinator.run(scored_rx, session_events, control_rx));

        Ok(EngineHandle {
            control: control_tx,
            events: events_rx,
            shared,
            coordinator: Some(coordinator_thread),
            capture: Some(capture_thread),
            vad: Some(vad_runner),
            uplink: Some(uplink_runner),
        })
    }
}

/// Control surface of a running session.
pub struct EngineHandle {
    control: Sender<Control>,
    events: Receiver<EngineEvent>,
    shared: EngineShared,
    coordinator: Option<JoinHandle<()>>,
    capture: Option<JoinHandle<()>>,
    vad: Option<StationRunner<VadStation>>,
    uplink: Option<StationRunner<UplinkStation>>,
}

impl EngineHandle {
    pub fn state(&self) -> TurnState {
        self.shared.state.get()
    }

    /// Current input gain after ducking.
    pub fn gain(&self) -> f32 {
        self.shared.gain.get()
    }

    /// Event stream for the UI. Clones share one queue.
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.events.clone()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.shared.transcript()
    }

    /// Stops transmitting; captured audio is scored as silence meanwhile.
    pub fn mute(&self, muted: bool) {
        self.shared.input_muted.store(muted, Ordering::SeqCst);
        tracing::info!(target: "parley::engine", muted, "input mute changed");
    }

    pub fn is_muted(&self) -> bool {
        self.shared.is_input_muted()
    }

    pub fn mute_output(&self, muted: bool) {
        let _ = self.control.send(Control::MuteOutput(muted));
    }

    /// Whether the session is still live (false after close or a fatal fault).
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Closes the session and waits for every engine thread to exit.
    ///
    /// Safe after a fatal fault, when the session has already shut itself down.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let _ = self.control.send(Control::Close);

        let mut panicked = Vec::new();
        for (name, handle) in [
            ("coordinator", self.coordinator.take()),
            ("capture", self.capture.take()),
        ] {
            if let Some(handle) = handle
                && handle.join().is_err()
            {
                panicked.push(name.to_string());
            }
        }
        if let Some(runner) = self.vad.take()
            && let Err(e) = runner.join()
        {
            panicked.push(e);
        }
        if let Some(runner) = self.uplink.take()
            && let Err(e) = runner.join()
        {
            panicked.push(e);
        }

        if panicked.is_empty() {
            Ok(())
        } else {
            Err(ParleyError::Other(format!(
                "engine threads panicked: {}",
                panicked.join(", ")
            )))
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(target: "parley::engine", error = %e, "engine shutdown failed");
        }
    }
}
