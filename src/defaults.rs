//! Default configuration constants for parley.
//!
//! Every heuristic threshold here is a starting point for acoustic tuning;
//! all of them can be overridden through [`crate::config::Config`].

/// Microphone sample rate in Hz (uplink audio is 16 kHz mono PCM).
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of synthesized speech coming back from the remote session.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Capture frame length in milliseconds.
///
/// 10 ms frames (160 samples at 16 kHz) keep the dwell-time guards accurate
/// to a frame while staying cheap enough to score on every callback.
pub const FRAME_MS: u32 = 10;

/// Confidence added per frame whose formant-band energy exceeds the threshold.
pub const VAD_STEP_UP: f32 = 0.1;

/// Confidence removed per frame below the energy threshold.
pub const VAD_STEP_DOWN: f32 = 0.05;

/// Mean single-sided magnitude in the formant band above which a frame counts as voiced.
pub const VAD_ENERGY_THRESHOLD: f32 = 0.002;

/// Lower edge of the vocal formant band in Hz.
pub const FORMANT_LOW_HZ: f32 = 300.0;

/// Upper edge of the vocal formant band in Hz.
pub const FORMANT_HIGH_HZ: f32 = 3400.0;

/// Confidence above which the VAD reports speech.
pub const SPEECH_THRESHOLD: f32 = 0.7;

/// Confidence below which the VAD stops reporting speech.
pub const SILENCE_THRESHOLD: f32 = 0.4;

/// Intent threshold: frames are sent early from `Armed` above this confidence.
pub const INTENT_THRESHOLD: f32 = 0.4;

/// Minimum sustained onset before `Armed → Listening` (milliseconds).
pub const ONSET_DWELL_MS: u32 = 300;

/// Minimum silence before `Listening → Processing` (milliseconds).
pub const SILENCE_DWELL_MS: u32 = 600;

/// Delay after turn-complete and playback drain before re-arming (milliseconds).
pub const SETTLE_MS: u32 = 300;

/// How long `Processing` may wait for the remote before the watchdog re-arms.
pub const PROCESSING_TIMEOUT_MS: u32 = 15_000;

/// Input gain while the machine is speaking (≈ −18 dB).
pub const DUCKED_GAIN: f32 = 0.12;

/// Time constant for ducking down (milliseconds).
pub const DUCK_ATTACK_MS: u32 = 50;

/// Time constant for restoring gain (milliseconds).
pub const DUCK_RELEASE_MS: u32 = 150;

/// Watchdog period (milliseconds).
pub const WATCHDOG_PERIOD_MS: u32 = 500;

/// How long the remote may take to confirm a new session before it is abandoned.
pub const SESSION_OPEN_TIMEOUT_MS: u32 = 10_000;

/// Interval at which the coordinator advances gain and reaps finished chunks.
pub const CONTROL_TICK_MS: u64 = 10;

/// Default voice identity passed to the remote session.
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Default system instruction passed to the remote session.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful voice assistant. \
     Answer concisely in a clear, natural speaking style.";

/// Capacity of the lock-free ring between the input callback and the capture
/// loop, in milliseconds of audio.
pub const CAPTURE_RING_MS: u32 = 1000;

/// Bounded channel capacities between stations.
pub const FRAME_BUFFER: usize = 256;
pub const UPLINK_BUFFER: usize = 64;
pub const SESSION_EVENT_BUFFER: usize = 256;

/// Number of samples in one capture frame at the given rate.
pub fn frame_samples(sample_rate: u32, frame_ms: u32) -> usize {
    ((sample_rate as u64 * frame_ms as u64) / 1000) as usize
}
