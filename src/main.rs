//! Macropad bridge CLI - drive the macropad through the BLE-to-TCP bridge.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use macropad_bridge as app;
use serde::Serialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use app::bridge::{CommandService, HostState, appearance_by_name, is_port_open};
use app::config::{AppConfig, ConfigLoadResult};
use app::keymap::{KeyBinding, MacroStep, parse_byte};

/// Command client for the 4-key display macropad.
#[derive(Parser)]
#[command(name = "macropad-bridge", version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override bridge host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Override bridge port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch bridge connection status
    Status,
    /// Fetch device info (battery, firmware, modes)
    Info,
    /// Push a host state to the device, then report status
    State {
        /// e.g. session-start, pre-tool-use, stop
        state: HostState,
    },
    /// Write a file to device flash in 4K chunks
    Upload {
        /// Flash address, decimal or 0x hex, 4K aligned
        #[arg(long, value_parser = parse_address)]
        address: u32,
        #[arg(long)]
        file: PathBuf,
    },
    /// Read the picture state of a mode
    PicState { mode: u8 },
    /// Select the picture range shown for a mode
    SetPic {
        mode: u8,
        start: u16,
        count: u16,
        /// Animation frame rate (defaults to [upload] default_fps)
        #[arg(long)]
        fps: Option<u16>,
    },
    /// Program a key
    Key {
        mode: u8,
        index: u8,
        #[command(subcommand)]
        binding: KeyArg,
    },
    /// Rename the device's BLE advertisement
    Name { name: String },
    /// Set the BLE appearance, by name (e.g. keyboard) or value
    Appearance {
        #[arg(value_parser = parse_appearance)]
        appearance: u16,
    },
    /// Persist device configuration
    Save,
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum KeyArg {
    /// HID keycodes pressed together, e.g. 0xE0 0x06
    Shortcut { keycodes: Vec<String> },
    /// Macro steps as action:param, e.g. 1:0x04 3:10 2:0x04
    Macro { steps: Vec<String> },
    /// Label shown for the key
    Describe { text: String },
}

impl KeyArg {
    fn into_binding(self) -> app::Result<KeyBinding> {
        Ok(match self {
            Self::Shortcut { keycodes } => {
                KeyBinding::Shortcut(keycodes.iter().map(|k| parse_byte(k)).collect::<app::Result<_>>()?)
            }
            Self::Macro { steps } => {
                KeyBinding::Macro(steps.iter().map(|s| s.parse::<MacroStep>()).collect::<app::Result<_>>()?)
            }
            Self::Describe { text } => KeyBinding::Description(text),
        })
    }
}

/// Hook output for `state`.
#[derive(Serialize)]
struct StateReport {
    state: &'static str,
    status: app::bridge::DeviceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<app::bridge::DeviceInfo>,
}

fn parse_address(s: &str) -> Result<u32, String> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("invalid address '{s}': {e}"))
}

fn parse_appearance(s: &str) -> Result<u16, String> {
    if let Some(value) = appearance_by_name(s) {
        return Ok(value);
    }
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|_| format!("unknown appearance '{s}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_file.as_deref())?;

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    tracing::debug!("Config path: {:?}", config_path);

    if let Command::InitConfig { force } = cli.command {
        return init_config(&config_path, force);
    }

    let mut config = match AppConfig::try_load(&config_path) {
        ConfigLoadResult::Loaded(config) => config,
        ConfigLoadResult::Missing => {
            tracing::debug!("Config missing, using defaults");
            AppConfig::default()
        }
        ConfigLoadResult::Invalid(e) => bail!("Config invalid ({}): {}", config_path.display(), e),
    };
    if let Some(host) = cli.host {
        config.bridge.host = host;
    }
    if let Some(port) = cli.port {
        config.bridge.port = port;
    }

    run(cli.command, &config).await
}

/// Install the fmt subscriber on stderr, plus a file layer when asked.
fn init_logging(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(path) = log_file else {
        tracing_subscriber::registry().with(filter).with(stderr_layer).init();
        return Ok(None);
    };

    let file_name = path
        .file_name()
        .with_context(|| format!("log file path has no file name: {}", path.display()))?;
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Ok(Some(guard))
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    AppConfig::default().save(path)?;
    tracing::info!("Wrote default config to {}", path.display());
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Command, config: &AppConfig) -> anyhow::Result<()> {
    let bridge = &config.bridge;

    // Hook path: stay silent and succeed when no bridge is running.
    if matches!(command, Command::State { .. })
        && !is_port_open(&bridge.host, bridge.port, bridge.connect_timeout()).await
    {
        tracing::info!("Bridge {}:{} not reachable, skipping", bridge.host, bridge.port);
        return Ok(());
    }

    let service = CommandService::new(bridge.timeout(), bridge.connect_timeout());
    service
        .connect(&bridge.host, bridge.port)
        .await
        .with_context(|| format!("connecting to bridge at {}:{}", bridge.host, bridge.port))?;

    let result = execute(&service, command, config).await;
    service.disconnect();
    result
}

async fn execute(service: &CommandService, command: Command, config: &AppConfig) -> anyhow::Result<()> {
    let timeout = service.timeout();
    match command {
        Command::Status => print_json(&service.fetch_status(timeout).await?),
        Command::Info => print_json(&service.fetch_info(timeout).await?),
        Command::State { state } => {
            service.update_state(state).await?;
            let status = service.fetch_status(timeout).await?;
            let info = if status.is_target {
                Some(service.fetch_info(timeout).await?)
            } else {
                None
            };
            print_json(&StateReport {
                state: state.name(),
                status,
                info,
            })
        }
        Command::Upload { address, file } => {
            let data = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            tracing::info!("Uploading {} bytes to 0x{:08X}", data.len(), address);
            service
                .write_large_data_with_progress(address, &data, timeout, |sent, total| {
                    tracing::info!("Progress: {}/{} bytes", sent, total);
                })
                .await?;
            tracing::info!("Upload complete");
            Ok(())
        }
        Command::PicState { mode } => print_json(&service.read_pic_state(mode).await?),
        Command::SetPic {
            mode,
            start,
            count,
            fps,
        } => {
            let fps = fps.unwrap_or(config.upload.default_fps);
            service.update_pic(mode, start, count, fps).await?;
            Ok(())
        }
        Command::Key { mode, index, binding } => {
            let binding = binding.into_binding()?;
            service.set_key_binding(mode, index, &binding).await?;
            tracing::info!("Key {}/{} set to {}", mode, index, binding.label());
            Ok(())
        }
        Command::Name { name } => {
            service.change_name(&name).await?;
            Ok(())
        }
        Command::Appearance { appearance } => {
            service.change_appearance(appearance).await?;
            Ok(())
        }
        Command::Save => {
            service.save_config().await?;
            Ok(())
        }
        Command::InitConfig { .. } => Ok(()),
    }
}
