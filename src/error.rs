//! Error types for parley.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParleyError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Hardware acquisition errors (fatal to session start)
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio acquisition failed: {message}")]
    Acquisition { message: String },

    #[error("Audio capture failed: {message}")]
    Capture { message: String },

    // Remote session errors (fatal to the session)
    #[error("Remote session error: {message}")]
    Session { message: String },

    // Per-frame / per-chunk faults (absorbed locally)
    #[error("Frame transmission failed: {message}")]
    Transmission { message: String },

    #[error("Audio chunk decode failed: {message}")]
    Decode { message: String },

    // Wire protocol errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ParleyError {
    /// Structural faults end the session; transient ones are dropped where they occur.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ParleyError::Transmission { .. }
                | ParleyError::Decode { .. }
                | ParleyError::Protocol { .. }
                | ParleyError::Capture { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
