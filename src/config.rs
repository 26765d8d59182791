use crate::defaults;
use crate::error::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub vad: VadSettings,
    pub turn: TurnSettings,
    pub duck: DuckSettings,
    pub playback: PlaybackSettings,
    pub session: SessionSettings,
    pub watchdog: WatchdogSettings,
}

/// Microphone capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub frame_ms: u32,
    /// Host processing hints. The cpal backend has no switch for them, so they
    /// are advisory: logged at start for matching against the sound server's
    /// own filters (e.g. PipeWire echo-cancel). parley never re-implements them.
    pub noise_suppression: bool,
    pub echo_cancellation: bool,
    pub auto_gain_control: bool,
}

/// Voice activity detector tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadSettings {
    pub step_up: f32,
    pub step_down: f32,
    pub energy_threshold: f32,
    pub band_low_hz: f32,
    pub band_high_hz: f32,
    pub speech_threshold: f32,
    pub silence_threshold: f32,
}

/// Turn-taking thresholds and dwell times
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TurnSettings {
    pub onset_threshold: f32,
    pub intent_threshold: f32,
    pub release_threshold: f32,
    pub onset_dwell_ms: u32,
    pub silence_dwell_ms: u32,
    pub settle_ms: u32,
    /// Start the settle delay only once playback has drained (default), or
    /// straight from turn-complete when false.
    pub settle_after_drain: bool,
    pub processing_timeout_ms: u32,
}

/// Input ducking while the remote is speaking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DuckSettings {
    pub ducked_gain: f32,
    pub attack_ms: u32,
    pub release_ms: u32,
}

/// Speaker output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackSettings {
    pub device: Option<String>,
    pub sample_rate: u32,
}

/// Values passed through to the remote speech session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    pub voice: String,
    pub system_instruction: String,
    /// How long the remote may take to confirm the session is open.
    pub open_timeout_ms: u32,
}

/// Liveness watchdog configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchdogSettings {
    pub period_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::INPUT_SAMPLE_RATE,
            frame_ms: defaults::FRAME_MS,
            noise_suppression: true,
            echo_cancellation: true,
            auto_gain_control: true,
        }
    }
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
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

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            onset_threshold: defaults::SPEECH_THRESHOLD,
            intent_threshold: defaults::INTENT_THRESHOLD,
            release_threshold: defaults::SILENCE_THRESHOLD,
            onset_dwell_ms: defaults::ONSET_DWELL_MS,
            silence_dwell_ms: defaults::SILENCE_DWELL_MS,
            settle_ms: defaults::SETTLE_MS,
            settle_after_drain: true,
            processing_timeout_ms: defaults::PROCESSING_TIMEOUT_MS,
        }
    }
}

impl Default for DuckSettings {
    fn default() -> Self {
        Self {
            ducked_gain: defaults::DUCKED_GAIN,
            attack_ms: defaults::DUCK_ATTACK_MS,
            release_ms: defaults::DUCK_RELEASE_MS,
        }
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::OUTPUT_SAMPLE_RATE,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            voice: defaults::DEFAULT_VOICE.to_string(),
            system_instruction: defaults::DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            open_timeout_ms: defaults::SESSION_OPEN_TIMEOUT_MS,
        }
    }
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            period_ms: defaults::WATCHDOG_PERIOD_MS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Missing fields use default values; invalid TOML is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist.
    ///
    /// Only a missing file falls back to defaults; every other failure is returned.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(ParleyError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - PARLEY_AUDIO_DEVICE → audio.device
    /// - PARLEY_VOICE → session.voice
    /// - PARLEY_SYSTEM_INSTRUCTION → session.system_instruction
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(device) = std::env::var("PARLEY_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        if let Ok(voice) = std::env::var("PARLEY_VOICE")
            && !voice.is_empty()
        {
            self.session.voice = voice;
        }

        if let Ok(instruction) = std::env::var("PARLEY_SYSTEM_INSTRUCTION")
            && !instruction.is_empty()
        {
            self.session.system_instruction = instruction;
        }

        self
    }

    /// Check value ranges and cross-field ordering.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> ParleyError {
            ParleyError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        fn unit(key: &str, value: f32) -> Result<()> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(invalid(key, "must be within [0, 1]"))
            }
        }

        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if self.audio.frame_ms == 0 {
            return Err(invalid("audio.frame_ms", "must be positive"));
        }
        if self.playback.sample_rate == 0 {
            return Err(invalid("playback.sample_rate", "must be positive"));
        }

        unit("vad.speech_threshold", self.vad.speech_threshold)?;
        unit("vad.silence_threshold", self.vad.silence_threshold)?;
        unit("turn.onset_threshold", self.turn.onset_threshold)?;
        unit("turn.intent_threshold", self.turn.intent_threshold)?;
        unit("turn.release_threshold", self.turn.release_threshold)?;
        unit("duck.ducked_gain", self.duck.ducked_gain)?;

        if !(self.vad.step_up > 0.0 && self.vad.step_up <= 1.0) {
            return Err(invalid("vad.step_up", "must be in (0, 1]"));
        }
        if !(self.vad.step_down > 0.0 && self.vad.step_down <= 1.0) {
            return Err(invalid("vad.step_down", "must be in (0, 1]"));
        }
        if self.vad.energy_threshold < 0.0 {
            return Err(invalid("vad.energy_threshold", "must not be negative"));
        }
        if self.vad.silence_threshold > self.vad.speech_threshold {
            return Err(invalid(
                "vad.silence_threshold",
                "must not exceed vad.speech_threshold",
            ));
        }
        if self.vad.band_low_hz >= self.vad.band_high_hz {
            return Err(invalid("vad.band_low_hz", "must be below vad.band_high_hz"));
        }
        if self.vad.band_high_hz > self.audio.sample_rate as f32 / 2.0 {
            return Err(invalid("vad.band_high_hz", "must not exceed Nyquist"));
        }
        if self.turn.intent_threshold > self.turn.onset_threshold {
            return Err(invalid(
                "turn.intent_threshold",
                "must not exceed turn.onset_threshold",
            ));
        }
        if self.turn.onset_dwell_ms == 0 {
            return Err(invalid("turn.onset_dwell_ms", "must be positive"));
        }
        if self.turn.silence_dwell_ms == 0 {
            return Err(invalid("turn.silence_dwell_ms", "must be positive"));
        }
        if self.duck.attack_ms == 0 || self.duck.release_ms == 0 {
            return Err(invalid("duck", "time constants must be positive"));
        }
        if self.watchdog.period_ms == 0 {
            return Err(invalid("watchdog.period_ms", "must be positive"));
        }
        if self.session.open_timeout_ms == 0 {
            return Err(invalid("session.open_timeout_ms", "must be positive"));
        }

        Ok(())
    }

    /// Serialize to TOML text.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ParleyError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/parley/config.toml on Linux
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("parley").join("config.toml"))
            .ok_or_else(|| ParleyError::Other("could not determine config directory".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_parley_env() {
        remove_env("PARLEY_AUDIO_DEVICE");
        remove_env("PARLEY_VOICE");
        remove_env("PARLEY_SYSTEM_INSTRUCTION");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.device, None);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.frame_ms, 10);
        assert!(config.audio.echo_cancellation);

        assert_eq!(config.vad.step_up, 0.1);
        assert_eq!(config.vad.step_down, 0.05);
        assert_eq!(config.turn.onset_threshold, 0.7);
        assert_eq!(config.turn.intent_threshold, 0.4);
        assert_eq!(config.turn.onset_dwell_ms, 300);
        assert_eq!(config.turn.silence_dwell_ms, 600);
        assert!(config.turn.settle_after_drain);

        assert_eq!(config.duck.ducked_gain, 0.12);
        assert_eq!(config.playback.sample_rate, 24000);
        assert_eq!(config.session.voice, "Zephyr");
        assert_eq!(config.watchdog.period_ms, 500);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [audio]
            device = "hw:1,0"
            frame_ms = 20

            [turn]
            onset_dwell_ms = 250
            intent_threshold = 0.3

            [session]
            voice = "Kore"
        "#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.audio.device, Some("hw:1,0".to_string()));
        assert_eq!(config.audio.frame_ms, 20);
        assert_eq!(config.turn.onset_dwell_ms, 250);
        assert_eq!(config.turn.intent_threshold, 0.3);
        assert_eq!(config.session.voice, "Kore");

        // Untouched sections keep their defaults
        assert_eq!(config.duck, DuckSettings::default());
        assert_eq!(config.turn.silence_dwell_ms, 600);
    }

    #[test]
    fn test_load_invalid_toml_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[audio\nframe_ms = ").unwrap();

        assert!(Config::load(file.path()).is_err());
        assert!(Config::load_or_default(file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_toml_roundtrip_preserves_values() {
        let mut config = Config::default();
        config.session.voice = "Puck".to_string();
        config.vad.energy_threshold = 0.004;

        let text = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects_intent_above_onset() {
        let mut config = Config::default();
        config.turn.intent_threshold = 0.9;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("turn.intent_threshold"));
    }

    #[test]
    fn test_validate_rejects_band_above_nyquist() {
        let mut config = Config::default();
        config.vad.band_high_hz = 9000.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("vad.band_high_hz"));
    }

    #[test]
    fn test_validate_rejects_gain_out_of_range() {
        let mut config = Config::default();
        config.duck.ducked_gain = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_parley_env();

        set_env("PARLEY_AUDIO_DEVICE", "pipewire");
        set_env("PARLEY_VOICE", "Charon");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.audio.device, Some("pipewire".to_string()));
        assert_eq!(config.session.voice, "Charon");
        assert_eq!(
            config.session.system_instruction,
            defaults::DEFAULT_SYSTEM_INSTRUCTION
        );

        clear_parley_env();
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_parley_env();

        set_env("PARLEY_VOICE", "");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.session.voice, "Zephyr");

        clear_parley_env();
    }

    #[test]
    fn test_default_path_ends_with_config_toml() {
        if let Ok(path) = Config::default_path() {
            assert!(path.ends_with("parley/config.toml"));
        }
    }
}
