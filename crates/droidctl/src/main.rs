//! droidctl - exercise the droid_core device I/O library from the shell
//!
//! Usage:
//!     droidctl [OPTIONS] <COMMAND>
//!
//! Environment Variables:
//!     DROID_CORE_SERIAL: target device serial (default: 127.0.0.1:5555)
//!     DROID_CORE_ADB_PATH: adb binary to use (default: adb from PATH)
//!     DROID_CORE_RETRY_TRIES: retry budget per call (default: 5)

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use droid_core::{CaptureMethod, ControlMethod, CoreConfig, Device};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Device I/O toolbox - screenshots and touch injection over adb
#[derive(Parser, Debug)]
#[command(name = "droidctl")]
#[command(about = "Device I/O toolbox - screenshots and touch injection over adb")]
#[command(after_help = r#"Examples:
    # List attached devices
    droidctl devices

    # Capture a screenshot from an emulator
    droidctl -s 127.0.0.1:16384 screenshot -o screen.png

    # Force the raw screencap backend
    droidctl -s emulator-5554 --capture-method screencap-raw screenshot

    # Tap and swipe
    droidctl -s emulator-5554 tap 640 360
    droidctl -s emulator-5554 swipe 100 500 100 100

    # Report which backends are usable on the target
    droidctl -s 127.0.0.1:16384 doctor
"#)]
struct Cli {
    /// Target device serial
    #[arg(short = 's', long, env = "DROID_CORE_SERIAL", default_value = "127.0.0.1:5555")]
    serial: String,

    /// adb binary to use
    #[arg(long, env = "DROID_CORE_ADB_PATH")]
    adb_path: Option<String>,

    /// Capture backend (auto, screencap-png, screencap-raw, swiftcap)
    #[arg(long, default_value = "auto")]
    capture_method: String,

    /// Control backend (auto, shell-input, touchd)
    #[arg(long, default_value = "auto")]
    control_method: String,

    /// Verbose logging (repeat for debug)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List devices known to adb
    Devices,
    /// Capture one screenshot
    Screenshot {
        /// Output file (PNG)
        #[arg(short = 'o', long, default_value = "screenshot.png")]
        output: PathBuf,
    },
    /// Tap at screen coordinates
    Tap { x: i32, y: i32 },
    /// Swipe between two points
    Swipe { x1: i32, y1: i32, x2: i32, y2: i32 },
    /// Long press at screen coordinates
    LongPress {
        x: i32,
        y: i32,
        /// Hold duration in milliseconds
        #[arg(long, default_value = "1000")]
        duration_ms: u64,
    },
    /// Probe the target and report backend availability
    Doctor {
        /// Emit the probe report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_capture_method(s: &str) -> Result<CaptureMethod> {
    match s {
        "auto" => Ok(CaptureMethod::Auto),
        "screencap-png" => Ok(CaptureMethod::ScreencapPng),
        "screencap-raw" => Ok(CaptureMethod::ScreencapRaw),
        "swiftcap" => Ok(CaptureMethod::SwiftCap),
        "vendor-shm" => Err(anyhow!(
            "vendor-shm requires an embedding application that loads the vendor library"
        )),
        other => Err(anyhow!("unknown capture method: {}", other)),
    }
}

fn parse_control_method(s: &str) -> Result<ControlMethod> {
    match s {
        "auto" => Ok(ControlMethod::Auto),
        "shell-input" => Ok(ControlMethod::ShellInput),
        "touchd" => Ok(ControlMethod::Touchd),
        "vendor-shm" => Err(anyhow!(
            "vendor-shm requires an embedding application that loads the vendor library"
        )),
        other => Err(anyhow!("unknown control method: {}", other)),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("droid_core={0},droidctl={0}", default)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_config(cli: &Cli) -> Result<CoreConfig> {
    let adb_path = match &cli.adb_path {
        Some(path) => Some(path.clone()),
        None => {
            // Resolve early for a readable error instead of a spawn failure
            which::which("adb")
                .map(|p| p.display().to_string())
                .map(Some)
                .context("adb not found in PATH; install platform-tools or pass --adb-path")?
        }
    };

    let mut config = CoreConfig::new()
        .with_capture_method(parse_capture_method(&cli.capture_method)?)
        .with_control_method(parse_control_method(&cli.control_method)?);
    config.adb_path = adb_path;
    Ok(config)
}

async fn connect(cli: &Cli) -> Result<Device> {
    let config = build_config(cli)?;
    let device = Device::connect(&cli.serial, config, None)
        .await
        .with_context(|| format!("cannot connect to {}", cli.serial))?;
    Ok(device)
}

async fn cmd_devices(cli: &Cli) -> Result<()> {
    let config = build_config(cli)?;
    let transport = droid_core::AdbTransport::new(
        config.adb_path.as_deref().unwrap_or("adb"),
        &cli.serial,
        config.timing.connection.clone(),
    );
    let devices = transport.list_devices().await?;
    if devices.is_empty() {
        println!("No devices attached");
        return Ok(());
    }
    for entry in devices {
        println!(
            "{:<24} {:<10} {:?}{}",
            entry.serial,
            entry.status,
            entry.connection_type,
            entry
                .model
                .map(|m| format!("  model:{}", m))
                .unwrap_or_default()
        );
    }
    Ok(())
}

async fn cmd_screenshot(cli: &Cli, output: &PathBuf) -> Result<()> {
    let mut device = connect(cli).await?;
    let frame = device.screenshot().await?;
    frame
        .image()
        .save(output)
        .with_context(|| format!("cannot write {}", output.display()))?;
    println!(
        "{}x{} frame ({:?}) -> {}",
        frame.width(),
        frame.height(),
        device.capture_method(),
        output.display()
    );
    device.close().await;
    Ok(())
}

async fn cmd_doctor(cli: &Cli, json: bool) -> Result<()> {
    let mut device = connect(cli).await?;
    let identity = device
        .session()
        .identity()
        .ok_or_else(|| anyhow!("device connected but not identified"))?;
    if json {
        let report = serde_json::json!({
            "serial": identity.serial,
            "abi": identity.cpu_abi,
            "sdk": identity.sdk_version,
            "backends": device.backends(),
            "capture": format!("{:?}", device.capture_method()),
            "control": format!("{:?}", device.control_method()),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        device.close().await;
        return Ok(());
    }
    println!("serial:  {}", identity.serial);
    println!("abi:     {}", identity.cpu_abi);
    println!("sdk:     {}", identity.sdk_version);
    println!();
    println!("{:<22} {:<8} installed compatible", "backend", "kind");
    for backend in device.backends() {
        println!(
            "{:<22} {:<8} {:<9} {}",
            backend.name,
            format!("{:?}", backend.kind).to_lowercase(),
            backend.helper_installed,
            backend.compatible
        );
    }
    println!();
    println!("capture -> {:?}", device.capture_method());
    println!("control -> {:?}", device.control_method());
    device.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Devices => cmd_devices(&cli).await,
        Commands::Screenshot { output } => cmd_screenshot(&cli, output).await,
        Commands::Tap { x, y } => {
            let mut device = connect(&cli).await?;
            device.tap(*x, *y).await?;
            device.close().await;
            Ok(())
        }
        Commands::Swipe { x1, y1, x2, y2 } => {
            let mut device = connect(&cli).await?;
            device.swipe((*x1, *y1), (*x2, *y2)).await?;
            device.close().await;
            Ok(())
        }
        Commands::LongPress { x, y, duration_ms } => {
            let mut device = connect(&cli).await?;
            device.long_press(*x, *y, *duration_ms).await?;
            device.close().await;
            Ok(())
        }
        Commands::Doctor { json } => cmd_doctor(&cli, *json).await,
    }
}
