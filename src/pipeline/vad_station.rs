//! Scores captured frames for voice activity.

use crate::audio::frame::Frame;
use crate::audio::vad::{FormantVad, VadConfig, VadDecision};
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// A frame together with its VAD decision.
#[derive(Debug, Clone)]
pub struct ScoredFrame {
    pub frame: Frame,
    pub decision: VadDecision,
    /// Capture time just after the frame's last sample.
    pub end: Instant,
}

pub struct VadStation {
    vad: FormantVad,
    sample_rate: u32,
    muted: Arc<AtomicBool>,
    scored: u64,
}

impl VadStation {
    pub fn new(config: VadConfig) -> Self {
        let sample_rate = config.sample_rate;
        Self {
            vad: FormantVad::new(config),
            sample_rate,
            muted: Arc::new(AtomicBool::new(false)),
            scored: 0,
        }
    }

    /// Shares the input mute flag; muted frames are scored as silence.
    pub fn with_mute_flag(mut self, muted: Arc<AtomicBool>) -> Self {
        self.muted = muted;
        self
    }

    /// Scores one frame without going through a channel.
    pub fn score(&mut self, frame: Frame) -> ScoredFrame {
        let decision = if self.muted.load(Ordering::Relaxed) {
            self.vad.score_silence()
        } else {
            self.vad.score(&frame.samples)
        };
        self.scored += 1;
        let end = frame.end(self.sample_rate);
        ScoredFrame {
            frame,
            decision,
            end,
        }
    }
}

impl Station for VadStation {
    type Input = Frame;
    type Output = ScoredFrame;

    fn process(&mut self, input: Frame) -> Result<Option<ScoredFrame>, StationError> {
        Ok(Some(self.score(input)))
    }

    fn name(&self) -> &'static str {
        "vad"
    }

    fn shutdown(&mut self) {
        tracing::debug!(target: "parley::vad", frames = self.scored, "vad station finished");
    }
}
