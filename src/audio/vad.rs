//! Voice Activity Detection (VAD) module.
//!
//! Scores each frame by its spectral energy in the vocal formant band and
//! integrates that into a confidence value that rises quickly on voiced
//! frames and decays slowly otherwise. Classification uses two thresholds so
//! the speech flag does not chatter around a single boundary.

use crate::config::VadSettings;
use crate::defaults;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Configuration for Voice Activity Detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// Sample rate of incoming frames (Hz).
    pub sample_rate: u32,
    /// Confidence added per voiced frame.
    pub step_up: f32,
    /// Confidence removed per unvoiced frame.
    pub step_down: f32,
    /// Mean band magnitude above which a frame counts as voiced.
    pub energy_threshold: f32,
    pub band_low_hz: f32,
    pub band_high_hz: f32,
    /// `is_speech` turns on above this confidence...
    pub speech_threshold: f32,
    /// ...and off below this one.
    pub silence_threshold: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::INPUT_SAMPLE_RATE,
            step_up: defaults::VAD_STEP_UP,
            step_down: defaults::VAD_STEP_DOWN,
            energy_threshold: defaults::VAD_ENERGY_THRESHOLD,
            band_low_hz: defaults::FORMANT_LOW_HZ,
            band_high_hz: defaults::FORMANT_HIGH_HZ,
            speech_threshold: defaults::SPEECH_THRESHOLD,
            silence_threshold: defaults::SILENCE_THRESHOLD,
        }
    }
}

impl VadConfig {
    pub fn from_settings(settings: &VadSettings, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            step_up: settings.step_up,
            step_down: settings.step_down,
            energy_threshold: settings.energy_threshold,
            band_low_hz: settings.band_low_hz,
            band_high_hz: settings.band_high_hz,
            speech_threshold: settings.speech_threshold,
            silence_threshold: settings.silence_threshold,
        }
    }
}

/// Per-frame VAD output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadDecision {
    /// Integrated confidence in [0, 1].
    pub confidence: f32,
    /// Hysteresis-filtered speech flag.
    pub is_speech: bool,
    /// Whether this frame alone exceeded the energy threshold.
    pub voiced: bool,
    /// Mean formant-band magnitude of this frame.
    pub energy: f32,
}

impl VadDecision {
    /// Decision for a frame that carries no signal (e.g. while muted).
    pub fn silent(confidence: f32) -> Self {
        Self {
            confidence,
            is_speech: false,
            voiced: false,
            energy: 0.0,
        }
    }
}

/// Formant-band energy detector.
pub struct FormantVad {
    config: VadConfig,
    confidence: f32,
    is_speech: bool,
    planner: FftPlanner<f32>,
    plan: Option<(usize, Arc<dyn Fft<f32>>, Vec<f32>)>,
    scratch: Vec<Complex<f32>>,
}

impl FormantVad {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            confidence: 0.0,
            is_speech: false,
            planner: FftPlanner::new(),
            plan: None,
            scratch: Vec::new(),
        }
    }

    /// Scores one frame and advances the confidence accumulator.
    pub fn score(&mut self, samples: &[i16]) -> VadDecision {
        let energy = self.band_energy(samples);
        let voiced = energy > self.config.energy_threshold;
        self.integrate(voiced, energy)
    }

    /// Advances the accumulator as if an unvoiced frame had been scored.
    pub fn score_silence(&mut self) -> VadDecision {
        self.integrate(false, 0.0)
    }

    fn integrate(&mut self, voiced: bool, energy: f32) -> VadDecision {
        let delta = if voiced {
            self.config.step_up
        } else {
            -self.config.step_down
        };
        self.confidence = (self.confidence + delta).clamp(0.0, 1.0);

        if self.confidence > self.config.speech_threshold {
            self.is_speech = true;
        } else if self.confidence < self.config.silence_threshold {
            self.is_speech = false;
        }

        VadDecision {
            confidence: self.confidence,
            is_speech: self.is_speech,
            voiced,
            energy,
        }
    }

    /// Mean single-sided magnitude over the formant band, with samples
    /// normalized to [-1, 1] and a Hann window applied.
    pub fn band_energy(&mut self, samples: &[i16]) -> f32 {
        let n = samples.len();
        if n < 2 || self.config.sample_rate == 0 {
            return 0.0;
        }

        if !matches!(&self.plan, Some((len, _, _)) if *len == n) {
            let fft = self.planner.plan_fft_forward(n);
            self.plan = Some((n, fft, hann_window(n)));
        }
        let Some((_, fft, window)) = &self.plan else {
            return 0.0;
        };

        self.scratch.clear();
        self.scratch.extend(
            samples
                .iter()
                .zip(window.iter())
                .map(|(&s, &w)| Complex::new(s as f32 / 32768.0 * w, 0.0)),
        );
        fft.process(&mut self.scratch);

        let resolution = self.config.sample_rate as f32 / n as f32;
        let nyquist_bin = n / 2;
        let low = (self.config.band_low_hz / resolution).ceil().max(0.0) as usize;
        let high = ((self.config.band_high_hz / resolution).floor() as usize).min(nyquist_bin);
        if low > high {
            return 0.0;
        }

        let scale = 2.0 / n as f32;
        let sum: f32 = self.scratch[low..=high]
            .iter()
            .map(|bin| bin.norm() * scale)
            .sum();
        sum / (high - low + 1) as f32
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn is_speech(&self) -> bool {
        self.is_speech
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Returns the accumulator to silence.
    pub fn reset(&mut self) {
        self.confidence = 0.0;
        self.is_speech = false;
    }
}

fn hann_window(n: usize) -> Vec<f32> {
    let n_f = n as f32;
    (0..n)
        .map(|i| 0.5 - 0.5 * ((2.0 * std::f32::consts::PI * i as f32) / n_f).cos())
        .collect()
}

/// Sine tone generator used by tests across the crate.
#[cfg(test)]
pub(crate) fn tone(frequency: f32, amplitude: f32, len: usize, sample_rate: u32) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((2.0 * std::f32::consts::PI * frequency * t).sin() * amplitude * 32767.0) as i16
        })
        .collect()
}
