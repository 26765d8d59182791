//! Shared fixtures for integration tests.

#![allow(dead_code)]

use crossbeam_channel::Receiver;
use parley::audio::frame::Frame;
use parley::audio::output::VirtualOutput;
use parley::audio::vad::VadConfig;
use parley::clock::{Clock, ManualClock};
use parley::config::Config;
use parley::engine::{Control, Coordinator, EngineEvent};
use parley::pipeline::uplink::DirectUplink;
use parley::pipeline::vad_station::VadStation;
use parley::playback::PlaybackScheduler;
use parley::session::{MockSession, SessionEvent};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const INPUT_RATE: u32 = 16000;
pub const OUTPUT_RATE: u32 = 24000;
pub const FRAME: Duration = Duration::from_millis(10);
pub const FRAME_LEN: usize = 160;

/// A sine tone as 16-bit PCM.
pub fn tone(freq: f32, amplitude: f32, len: usize, sample_rate: u32) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((2.0 * std::f32::consts::PI * freq * t).sin() * amplitude * i16::MAX as f32) as i16
        })
        .collect()
}

/// PCM16LE payload of `samples` silent samples.
pub fn chunk(samples: usize) -> Vec<u8> {
    vec![0u8; samples * 2]
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// A coordinator on a manual clock with a virtual speaker and a mock remote.
pub struct Rig {
    pub clock: ManualClock,
    pub output: VirtualOutput,
    pub session: MockSession,
    pub events: Receiver<EngineEvent>,
    pub vad: VadStation,
    pub coordinator: Coordinator,
    sequence: u64,
    since_watchdog: Duration,
    watchdog_period: Duration,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let clock = ManualClock::new();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let output = VirtualOutput::new(Arc::clone(&shared_clock), OUTPUT_RATE);
        let session = MockSession::new();
        let (events_tx, events) = crossbeam_channel::unbounded();
        let coordinator = Coordinator::new(
            &config,
            PlaybackScheduler::new(Box::new(output.clone())),
            Box::new(DirectUplink::new(Arc::new(session.clone()), INPUT_RATE)),
            Arc::new(session.clone()),
            shared_clock,
            events_tx,
        );
        let vad = VadStation::new(VadConfig::from_settings(&config.vad, INPUT_RATE))
            .with_mute_flag(Arc::clone(&coordinator.shared().input_muted));
        Self {
            clock,
            output,
            session,
            events,
            vad,
            coordinator,
            sequence: 0,
            since_watchdog: Duration::ZERO,
            watchdog_period: Duration::from_millis(config.watchdog.period_ms as u64),
        }
    }

    /// A rig whose session has reported `Opened`.
    pub fn armed() -> Self {
        let mut rig = Self::new();
        rig.remote(SessionEvent::Opened);
        rig
    }

    pub fn remote(&mut self, event: SessionEvent) {
        self.coordinator.handle_session_event(event);
    }

    /// Feeds `count` frames of speech-like tone or silence, one frame period each.
    pub fn frames(&mut self, count: usize, voiced: bool) {
        for _ in 0..count {
            let samples = if voiced {
                tone(440.0, 0.3, FRAME_LEN, INPUT_RATE)
            } else {
                vec![0; FRAME_LEN]
            };
            let frame = Frame::new(self.sequence, self.clock.now(), samples);
            self.sequence += 1;
            let scored = self.vad.score(frame);
            self.coordinator.handle_frame(&scored);
            self.step();
        }
    }

    /// Lets time pass with no captured audio.
    pub fn wait(&mut self, duration: Duration) {
        for _ in 0..(duration.as_millis() / FRAME.as_millis()) {
            self.step();
        }
    }

    fn step(&mut self) {
        self.clock.advance(FRAME);
        self.coordinator.tick();
        self.since_watchdog += FRAME;
        if self.since_watchdog >= self.watchdog_period {
            self.since_watchdog = Duration::ZERO;
            self.coordinator.handle_control(Control::WatchdogTick);
        }
    }

    pub fn drain_events(&self) -> Vec<EngineEvent> {
        self.events.try_iter().collect()
    }
}
