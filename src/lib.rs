//! parley - Real-time voice session engine
//!
//! Full-duplex spoken conversation with a remote speech model: formant-band
//! VAD, turn-taking, input ducking and gapless playback.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod duck;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod playback;
pub mod session;
pub mod turn;

#[cfg(feature = "cli")]
pub mod cli;

// Composition root - needs everything
#[cfg(all(feature = "cpal-audio", feature = "cli"))]
pub mod app;

// Core traits (source → engine → output)
pub use audio::output::AudioOutput;
pub use audio::source::FrameSource;
pub use session::{RemoteSession, SessionConnector};

// Engine
pub use engine::{EngineEvent, EngineHandle, VoiceEngine};
pub use turn::{TranscriptEntry, TurnState};

// Error handling
pub use error::{ParleyError, Result};

// Config
pub use config::Config;

// Station framework (for advanced users)
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::station::Station;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
