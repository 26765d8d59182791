//! Remote speech session abstraction.
//!
//! The engine never talks to a network API directly. A [`SessionConnector`]
//! opens a [`RemoteSession`] that accepts encoded uplink frames and yields a
//! stream of [`SessionEvent`]s on a channel.

pub mod channel;
pub mod mock;
pub mod wire;

use crate::audio::codec::EncodedFrame;
use crate::config::SessionSettings;
use crate::defaults;
use crate::error::Result;
use crossbeam_channel::Receiver;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use channel::{ChannelConnector, ChannelSession};
pub use mock::{MockConnector, MockSession};

/// Tagged events produced by a remote session, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The remote channel is ready.
    Opened,
    /// Transcription fragment of the user's speech.
    PartialUserText(String),
    /// Transcription fragment of the remote's speech.
    PartialAssistantText(String),
    /// Raw PCM16LE audio at the output rate.
    AudioChunk(Vec<u8>),
    /// The remote cut its own turn short (user barged in).
    Interrupted,
    /// The remote finished its turn.
    TurnComplete,
    /// The remote closed the channel normally.
    Closed,
    /// The channel failed.
    Error(String),
}

/// Prebuilt voice identity. Passed through to the remote untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Voice {
    #[default]
    Zephyr,
    Puck,
    Charon,
    Kore,
    Fenrir,
    Custom(String),
}

impl Voice {
    /// The identities the remote is known to offer.
    pub const BUILTIN: [Voice; 5] = [
        Voice::Zephyr,
        Voice::Puck,
        Voice::Charon,
        Voice::Kore,
        Voice::Fenrir,
    ];

    pub fn name(&self) -> &str {
        match self {
            Voice::Zephyr => "Zephyr",
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
            Voice::Custom(name) => name,
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Voice {
    type Err = std::convert::Infallible;

    /// Known names match case-insensitively; anything else is passed on as-is.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(Voice::BUILTIN
            .into_iter()
            .find(|voice| voice.name().eq_ignore_ascii_case(trimmed))
            .unwrap_or_else(|| Voice::Custom(trimmed.to_string())))
    }
}

/// What the remote is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub voice: Voice,
    pub system_instruction: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub input_transcription: bool,
    pub output_transcription: bool,
    /// Bound on the remote's confirmation that the channel is ready.
    pub open_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            voice: Voice::default(),
            system_instruction: defaults::DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            input_sample_rate: defaults::INPUT_SAMPLE_RATE,
            output_sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            input_transcription: true,
            output_transcription: true,
            open_timeout: Duration::from_millis(defaults::SESSION_OPEN_TIMEOUT_MS as u64),
        }
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &SessionSettings, input_rate: u32, output_rate: u32) -> Self {
        let voice = match settings.voice.parse::<Voice>() {
            Ok(voice) => voice,
            Err(never) => match never {},
        };
        Self {
            voice,
            system_instruction: settings.system_instruction.clone(),
            input_sample_rate: input_rate,
            output_sample_rate: output_rate,
            input_transcription: true,
            output_transcription: true,
            open_timeout: Duration::from_millis(settings.open_timeout_ms as u64),
        }
    }
}

/// An open bidirectional session.
///
/// `send` must not block on the network; implementations queue and report
/// failure as `Transmission`. After `close`, sends are refused.
pub trait RemoteSession: Send + Sync {
    fn send(&self, frame: &EncodedFrame) -> Result<()>;

    /// Close the channel. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// An opened session plus its event stream.
pub struct SessionLink {
    pub session: Arc<dyn RemoteSession>,
    pub events: Receiver<SessionEvent>,
}

/// Opens remote sessions.
///
/// `open` returns once the remote has accepted the session; the first event
/// on the link is then `Opened`. Connectors that cannot confirm during `open`
/// deliver `Opened` later, and the coordinator abandons the session if it
/// has not arrived within `open_timeout`.
#[async_trait::async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(&self, config: &SessionConfig) -> Result<SessionLink>;
}
