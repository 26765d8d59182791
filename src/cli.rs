//! Command-line interface for parley
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Real-time voice sessions with a remote speech model
#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Real-time voice sessions with a remote speech model")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug logs, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a live session with the microphone and speakers
    Live {
        /// Speak the JSON session protocol as NDJSON on stdin/stdout
        #[arg(long)]
        stdio: bool,

        /// Audio input device (overrides config)
        #[arg(long, value_name = "DEVICE")]
        device: Option<String>,

        /// Voice identity (Zephyr, Puck, Charon, Kore, Fenrir)
        #[arg(long, value_name = "VOICE")]
        voice: Option<String>,
    },

    /// Replay a WAV file through the VAD and turn machine
    Analyze {
        /// WAV file to analyze (reads stdin when omitted)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// List available audio devices
    Devices,

    /// View and write configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
