//! Turn state machine.
//!
//! Pure decision logic: it consumes VAD decisions, session events and ticks
//! with explicit timestamps and queues [`Action`]s for the coordinator to
//! carry out. It never touches audio devices, channels or the clock itself.

use crate::audio::vad::VadDecision;
use crate::config::TurnSettings;
use crate::engine::events::EngineEvent;
use crate::session::SessionEvent;
use crate::turn::state::TurnState;
use crate::turn::transcript::{Role, Transcript, Utterance};
use std::time::{Duration, Instant};

/// Thresholds and dwell times for turn transitions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnConfig {
    /// Confidence that must be exceeded to confirm user speech.
    pub onset_threshold: f32,
    /// Confidence above which frames are sent ahead of confirmation.
    pub intent_threshold: f32,
    /// Confidence below which silence counts toward end of utterance.
    pub release_threshold: f32,
    pub onset_dwell: Duration,
    pub silence_dwell: Duration,
    /// Pause before re-arming after turn-complete.
    pub settle: Duration,
    /// Count the settle from playback drain as well as from turn-complete,
    /// so the input stays ducked until the remote's audio has finished.
    pub settle_after_drain: bool,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self::from_settings(&TurnSettings::default())
    }
}

impl TurnConfig {
    pub fn from_settings(settings: &TurnSettings) -> Self {
        Self {
            onset_threshold: settings.onset_threshold,
            intent_threshold: settings.intent_threshold,
            release_threshold: settings.release_threshold,
            onset_dwell: Duration::from_millis(settings.onset_dwell_ms as u64),
            silence_dwell: Duration::from_millis(settings.silence_dwell_ms as u64),
            settle: Duration::from_millis(settings.settle_ms as u64),
            settle_after_drain: settings.settle_after_drain,
        }
    }
}

/// Side effects requested by the machine, in the order they must happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Emit(EngineEvent),
    /// Schedule a PCM16LE chunk for playback.
    Play(Vec<u8>),
    /// Stop all scheduled playback immediately.
    Flush,
    /// Tear the session down; `fault` is surfaced to the UI once.
    Shutdown { fault: Option<String> },
}

#[derive(Debug, Clone, Copy)]
struct PendingRelease {
    completed_at: Instant,
    drained_at: Option<Instant>,
}

pub struct TurnMachine {
    config: TurnConfig,
    state: TurnState,
    entered_at: Instant,
    user: Utterance,
    assistant: Utterance,
    transcript: Transcript,
    onset_start: Option<Instant>,
    silence_start: Option<Instant>,
    release: Option<PendingRelease>,
    outbox: Vec<Action>,
}

impl TurnMachine {
    pub fn new(config: TurnConfig, now: Instant) -> Self {
        Self {
            config,
            state: TurnState::Idle,
            entered_at: now,
            user: Utterance::new(Role::User),
            assistant: Utterance::new(Role::Assistant),
            transcript: Transcript::default(),
            onset_start: None,
            silence_start: None,
            release: None,
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// When the current state was entered.
    pub fn entered_at(&self) -> Instant {
        self.entered_at
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn user_text(&self) -> &str {
        self.user.text()
    }

    pub fn assistant_text(&self) -> &str {
        self.assistant.text()
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    /// Takes every queued action.
    pub fn drain_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.outbox)
    }

    fn emit(&mut self, event: EngineEvent) {
        self.outbox.push(Action::Emit(event));
    }

    fn transition(&mut self, to: TurnState, now: Instant) {
        if self.state == to {
            return;
        }
        tracing::debug!(target: "parley::turn", from = %self.state, to = %to, "state change");
        self.state = to;
        self.entered_at = now;
        self.onset_start = None;
        self.silence_start = None;
        self.release = None;
        self.emit(EngineEvent::StateChanged(to));
    }

    /// Feeds one scored frame spanning `start..end`.
    ///
    /// Returns whether the frame should be sent to the remote.
    pub fn on_frame(&mut self, decision: &VadDecision, start: Instant, end: Instant) -> bool {
        let confidence = decision.confidence;
        match self.state {
            TurnState::Idle | TurnState::Processing => false,
            TurnState::Armed => {
                if confidence <= 0.0 {
                    self.onset_start = None;
                } else if decision.voiced && self.onset_start.is_none() {
                    self.onset_start = Some(start);
                }

                if let Some(onset) = self.onset_start
                    && confidence > self.config.onset_threshold
                    && end.saturating_duration_since(onset) >= self.config.onset_dwell
                {
                    self.transition(TurnState::Listening, end);
                    return true;
                }
                confidence > self.config.intent_threshold
            }
            TurnState::Listening => {
                if !decision.voiced {
                    self.silence_start.get_or_insert(start);
                } else if confidence >= self.config.release_threshold {
                    self.silence_start = None;
                }

                if let Some(silence) = self.silence_start
                    && confidence < self.config.release_threshold
                    && end.saturating_duration_since(silence) >= self.config.silence_dwell
                {
                    self.transition(TurnState::Processing, end);
                    return false;
                }
                true
            }
            TurnState::Speaking => confidence > self.config.intent_threshold,
        }
    }

    /// Applies one event from the remote session.
    pub fn on_session_event(&mut self, event: SessionEvent, now: Instant) {
        if self.state == TurnState::Idle
            && !matches!(
                event,
                SessionEvent::Opened | SessionEvent::Closed | SessionEvent::Error(_)
            )
        {
            tracing::debug!(target: "parley::turn", ?event, "ignoring event while idle");
            return;
        }

        match event {
            SessionEvent::Opened => {
                if self.state == TurnState::Idle {
                    self.transition(TurnState::Armed, now);
                }
            }
            SessionEvent::PartialUserText(text) => {
                self.user.append(&text);
                let full = self.user.text().to_string();
                self.emit(EngineEvent::LiveUserPartial(full));
            }
            SessionEvent::PartialAssistantText(text) => {
                self.assistant.append(&text);
                let full = self.assistant.text().to_string();
                self.emit(EngineEvent::LiveAssistantPartial(full));
            }
            SessionEvent::AudioChunk(bytes) => {
                self.outbox.push(Action::Play(bytes));
                if self.state == TurnState::Speaking {
                    // A new turn's audio supersedes a pending release.
                    self.release = None;
                } else {
                    self.transition(TurnState::Speaking, now);
                }
            }
            SessionEvent::Interrupted => {
                self.outbox.push(Action::Flush);
                let had_text = !self.assistant.text().is_empty();
                self.assistant.clear();
                if had_text {
                    self.emit(EngineEvent::LiveAssistantPartial(String::new()));
                }
                self.transition(TurnState::Armed, now);
                self.release = None;
            }
            SessionEvent::TurnComplete => {
                self.finalize_turn();
                if self.state == TurnState::Speaking {
                    self.release = Some(PendingRelease {
                        completed_at: now,
                        drained_at: None,
                    });
                } else {
                    self.transition(TurnState::Armed, now);
                }
            }
            SessionEvent::Closed => {
                self.transition(TurnState::Idle, now);
                self.outbox.push(Action::Shutdown { fault: None });
            }
            SessionEvent::Error(reason) => {
                self.transition(TurnState::Idle, now);
                self.outbox.push(Action::Shutdown {
                    fault: Some(reason),
                });
            }
        }
    }

    fn finalize_turn(&mut self) {
        for entry in [self.user.finalize(), self.assistant.finalize()]
            .into_iter()
            .flatten()
        {
            self.transcript.push(entry.clone());
            self.emit(EngineEvent::TranscriptAppended(entry));
        }
    }

    /// Periodic update; `playback_busy` is whether any scheduled audio is
    /// still pending or audible.
    pub fn on_tick(&mut self, now: Instant, playback_busy: bool) {
        if self.state != TurnState::Speaking {
            return;
        }
        let Some(release) = self.release.as_mut() else {
            return;
        };

        let settle_from = if self.config.settle_after_drain {
            if playback_busy {
                release.drained_at = None;
                return;
            }
            let drained_at = *release.drained_at.get_or_insert(now);
            drained_at.max(release.completed_at)
        } else {
            release.completed_at
        };
        if now.saturating_duration_since(settle_from) >= self.config.settle {
            self.transition(TurnState::Armed, now);
        }
    }

    /// Forces the machine back to `Armed` (watchdog recovery).
    ///
    /// Returns the state it was recovered from.
    pub fn force_armed(&mut self, now: Instant) -> TurnState {
        let from = self.state;
        self.transition(TurnState::Armed, now);
        from
    }

    /// Explicit close from the UI.
    pub fn close(&mut self, now: Instant) {
        if self.state != TurnState::Idle {
            self.transition(TurnState::Idle, now);
        }
        self.outbox.push(Action::Shutdown { fault: None });
    }
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self::new(TurnConfig::default(), Instant::now())
    }
}
