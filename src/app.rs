//! Application entry points for the `parley` binary.
//!
//! `live` wires the microphone, speakers and a session transport into a
//! [`VoiceEngine`]; `analyze` replays a recording through the same
//! coordinator on a virtual clock.

use crate::audio::capture::{CaptureHints, CpalFrameSource};
use crate::audio::frame::FrameAssembler;
use crate::audio::output::{AudioOutput, VirtualOutput};
use crate::audio::source::FrameSource;
use crate::audio::speaker::CpalOutput;
use crate::audio::vad::VadConfig;
use crate::audio::wav::WavFrameSource;
use crate::clock::{Clock, ManualClock};
use crate::config::Config;
use crate::defaults;
use crate::engine::{Control, Coordinator, EngineEvent, VoiceEngine};
use crate::error::{ParleyError, Result};
use crate::pipeline::uplink::DirectUplink;
use crate::pipeline::vad_station::VadStation;
use crate::playback::PlaybackScheduler;
use crate::session::{ChannelConnector, MockConnector, MockSession, SessionConnector, SessionEvent};
use crate::turn::{Role, TurnState};
use crossbeam_channel::{Receiver, Sender};
use owo_colors::OwoColorize;
use std::fmt;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How often the live command checks whether the engine shut itself down.
const LIVE_POLL: Duration = Duration::from_millis(100);

/// Run a live session until Ctrl+C or a fatal fault.
///
/// With `stdio`, the JSON session protocol is spoken as NDJSON on
/// stdin/stdout so a bridge process can relay it to the remote. Without it,
/// the session is local only: turn-taking runs against the microphone but no
/// remote ever answers.
pub async fn run_live_command(config: Config, stdio: bool, quiet: bool) -> Result<()> {
    let hints = CaptureHints {
        noise_suppression: config.audio.noise_suppression,
        echo_cancellation: config.audio.echo_cancellation,
        auto_gain_control: config.audio.auto_gain_control,
    };
    let source: Box<dyn FrameSource> = Box::new(CpalFrameSource::new(
        config.audio.device.as_deref(),
        config.audio.sample_rate,
        hints,
    )?);
    let output: Box<dyn AudioOutput> = Box::new(CpalOutput::open(
        config.playback.device.as_deref(),
        config.playback.sample_rate,
    )?);

    let connector: Box<dyn SessionConnector> = if stdio {
        Box::new(stdio_connector())
    } else {
        if !quiet {
            eprintln!("{}", "No transport given (--stdio); running a local session.".yellow());
        }
        Box::new(MockConnector::new())
    };

    let engine = VoiceEngine::new(config);
    let handle = engine.start(source, output, connector.as_ref()).await?;

    let events = handle.events();
    let renderer = thread::spawn(move || render_events(events, quiet));

    if !quiet {
        eprintln!("{}", "Listening... (Ctrl+C to stop)".green());
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|e| ParleyError::Other(format!("Failed to wait for Ctrl+C: {}", e)))?;
            if !quiet {
                eprintln!("\nShutting down...");
            }
        }
        _ = wait_until_stopped(|| handle.is_running()) => {}
    }

    let transcript = handle.transcript();
    handle.close()?;
    if renderer.join().is_err() {
        tracing::warn!("event renderer panicked");
    }

    if !quiet && !transcript.is_empty() {
        eprintln!();
        eprintln!("{}", "Transcript:".bold());
        for entry in transcript {
            eprintln!("  {}", entry);
        }
    }
    Ok(())
}

async fn wait_until_stopped(running: impl Fn() -> bool) {
    while running() {
        tokio::time::sleep(LIVE_POLL).await;
    }
}

/// Connector whose transport is NDJSON on stdin/stdout.
fn stdio_connector() -> ChannelConnector {
    let (outgoing_tx, outgoing_rx) = crossbeam_channel::bounded(defaults::UPLINK_BUFFER);
    let (incoming_tx, incoming_rx) = crossbeam_channel::unbounded();

    thread::spawn(move || write_lines(outgoing_rx));
    thread::spawn(move || read_lines(incoming_tx));

    ChannelConnector::new(outgoing_tx, incoming_rx)
}

fn write_lines(outgoing: Receiver<String>) {
    let stdout = std::io::stdout();
    for message in outgoing {
        let mut out = stdout.lock();
        if writeln!(out, "{}", message).and_then(|()| out.flush()).is_err() {
            tracing::warn!(target: "parley::session", "stdout closed, transport down");
            return;
        }
    }
}

fn read_lines(incoming: Sender<String>) {
    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        if incoming.send(line).is_err() {
            return;
        }
    }
    tracing::debug!(target: "parley::session", "stdin closed");
}

fn render_events(events: Receiver<EngineEvent>, quiet: bool) {
    for event in events {
        if quiet && !matches!(event, EngineEvent::Fault(_)) {
            continue;
        }
        render_event(&event);
    }
}

/// Render one engine event to stderr.
pub fn render_event(event: &EngineEvent) {
    match event {
        EngineEvent::StateChanged(state) => {
            eprintln!("{}", format!("[{}]", state).dimmed());
        }
        EngineEvent::TranscriptAppended(entry) => match entry.role {
            Role::User => eprintln!("{} {}", "you:".cyan().bold(), entry.text),
            Role::Assistant => eprintln!("{} {}", "assistant:".magenta().bold(), entry.text),
        },
        EngineEvent::LiveUserPartial(text) if !text.is_empty() => {
            eprintln!("{} {}", "you...".cyan(), text.dimmed());
        }
        EngineEvent::LiveAssistantPartial(text) if !text.is_empty() => {
            eprintln!("{} {}", "assistant...".magenta(), text.dimmed());
        }
        EngineEvent::LiveUserPartial(_) | EngineEvent::LiveAssistantPartial(_) => {}
        EngineEvent::Fault(reason) => {
            eprintln!("{}", format!("Error: {}", reason).red());
        }
    }
}

/// Outcome of replaying a recording through VAD and turn-taking.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub duration: Duration,
    pub frames: u64,
    pub frames_sent: u64,
    /// Every state change, keyed by recording time.
    pub transitions: Vec<(Duration, TurnState)>,
    pub turns: usize,
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (at, state) in &self.transitions {
            writeln!(f, "{:>8.2}s  {}", at.as_secs_f64(), state)?;
        }
        writeln!(f)?;
        writeln!(f, "duration:    {:.2}s", self.duration.as_secs_f64())?;
        writeln!(f, "frames:      {}", self.frames)?;
        writeln!(f, "transmitted: {}", self.frames_sent)?;
        write!(f, "turns:       {}", self.turns)
    }
}

/// Replay a WAV file (or stdin when `path` is `None`).
pub fn run_analyze_command(config: &Config, path: Option<&Path>) -> Result<AnalysisReport> {
    let sample_rate = config.audio.sample_rate;
    let source = match path {
        Some(path) => WavFrameSource::open(path, sample_rate)?,
        None => WavFrameSource::from_stdin(sample_rate)?,
    };
    analyze_source(config, Box::new(source))
}

/// Drives the coordinator frame by frame on a virtual clock.
///
/// The remote is simulated as answering every turn immediately with no audio,
/// so each utterance in the recording gets its own turn.
pub fn analyze_source(config: &Config, mut source: Box<dyn FrameSource>) -> Result<AnalysisReport> {
    config.validate()?;
    let sample_rate = source.sample_rate();
    let frame_len = defaults::frame_samples(sample_rate, config.audio.frame_ms);
    let frame_period = Duration::from_millis(config.audio.frame_ms as u64);
    let watchdog_period = Duration::from_millis(config.watchdog.period_ms as u64);

    let clock = ManualClock::new();
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let origin = shared_clock.now();
    let output = VirtualOutput::new(Arc::clone(&shared_clock), config.playback.sample_rate);
    let session = Arc::new(MockSession::new());
    let (events_tx, events_rx) = crossbeam_channel::unbounded();

    let mut coordinator = Coordinator::new(
        config,
        PlaybackScheduler::new(Box::new(output)),
        Box::new(DirectUplink::new(session.clone(), sample_rate)),
        session,
        Arc::clone(&shared_clock),
        events_tx,
    );
    let mut vad = VadStation::new(VadConfig::from_settings(&config.vad, sample_rate));
    let mut assembler = FrameAssembler::new(frame_len, sample_rate);

    let mut report = AnalysisReport {
        duration: Duration::ZERO,
        frames: 0,
        frames_sent: 0,
        transitions: Vec::new(),
        turns: 0,
    };

    source.start()?;
    coordinator.handle_session_event(SessionEvent::Opened);
    record_transitions(&events_rx, Duration::ZERO, &mut report.transitions);

    let mut since_watchdog = Duration::ZERO;
    loop {
        let samples = source.read_samples()?;
        if samples.is_empty() {
            break;
        }
        for chunk in samples.chunks(frame_len) {
            let at = shared_clock.now().saturating_duration_since(origin);
            for frame in assembler.push(chunk, shared_clock.now()) {
                let scored = vad.score(frame);
                coordinator.handle_frame(&scored);
                report.frames += 1;
            }
            record_transitions(&events_rx, at, &mut report.transitions);

            clock.advance(frame_period);
            since_watchdog += frame_period;
            coordinator.tick();
            if since_watchdog >= watchdog_period {
                since_watchdog = Duration::ZERO;
                coordinator.handle_control(Control::WatchdogTick);
            }
            if coordinator.state() == TurnState::Processing {
                coordinator.handle_session_event(SessionEvent::TurnComplete);
                report.turns += 1;
            }
            let at = shared_clock.now().saturating_duration_since(origin);
            record_transitions(&events_rx, at, &mut report.transitions);
        }
    }

    source.stop()?;
    report.duration = shared_clock.now().saturating_duration_since(origin);
    report.frames_sent = coordinator.frames_sent();
    coordinator.handle_control(Control::Close);

    Ok(report)
}

fn record_transitions(
    events: &Receiver<EngineEvent>,
    at: Duration,
    transitions: &mut Vec<(Duration, TurnState)>,
) {
    for event in events.try_iter() {
        if let EngineEvent::StateChanged(state) = event {
            transitions.push((at, state));
        }
    }
}
