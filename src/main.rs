use anyhow::Result;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use parley::app::{run_analyze_command, run_live_command};
use parley::audio::capture::{DeviceKind, list_devices};
use parley::cli::{Cli, Commands, ConfigAction};
use parley::config::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Live {
            stdio,
            device,
            voice,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(device) = device {
                config.audio.device = Some(device);
            }
            if let Some(voice) = voice {
                config.session.voice = voice;
            }
            run_live_command(config, stdio, cli.quiet).await?;
        }
        Commands::Analyze { file } => {
            let config = load_config(cli.config.as_deref())?;
            let report = run_analyze_command(&config, file.as_deref())?;
            println!("{}", report);
        }
        Commands::Devices => {
            list_audio_devices()?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "parley", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Install the tracing subscriber on stderr.
///
/// `RUST_LOG` wins; otherwise `-q` → warn, default → info, `-v` → debug,
/// `-vv` → trace.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("parley={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn config_path(custom_path: Option<&Path>) -> Result<PathBuf> {
    match custom_path {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(Config::default_path()?),
    }
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/parley/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path()?)?,
    };
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// List available audio devices.
fn list_audio_devices() -> Result<()> {
    let devices = list_devices()?;

    if devices.is_empty() {
        eprintln!("No audio devices found");
        std::process::exit(1);
    }

    for (title, kind) in [("Input devices:", DeviceKind::Input), ("Output devices:", DeviceKind::Output)] {
        println!("{}", title.bold());
        for (idx, device) in devices.iter().filter(|d| d.kind == kind).enumerate() {
            if device.recommended {
                println!("  [{}] {} {}", idx, device.name, "(recommended)".green());
            } else {
                println!("  [{}] {}", idx, device.name);
            }
        }
    }

    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let path = config_path(custom_path)?;

    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                eprintln!(
                    "{}",
                    format!("Config already exists at {} (use --force to overwrite)", path.display())
                        .yellow()
                );
                std::process::exit(1);
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, Config::default().to_toml()?)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
