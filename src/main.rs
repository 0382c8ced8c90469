use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use navibelt_lib::constants::{DEFAULT_BAUD_RATE, VIBROMOTOR_COUNT};
use navibelt_lib::{
    BeltAddress, BeltConfig, BeltController, BeltDiscovery, BeltEvent, BeltMode, ObserverError, SerialPortDiscovery,
    VibrationParams, VibrationPattern,
};

/// Command line client for the naviGuertel haptic belt.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Serial or RFCOMM device of the belt (e.g., /dev/rfcomm0).
    #[arg(short, long, global = true, conflicts_with = "tcp")]
    serial: Option<String>,
    /// Baud rate of the serial device.
    #[arg(short, long, global = true)]
    baud: Option<u32>,
    /// Address of a serial-over-TCP bridge (e.g., 127.0.0.1:7000).
    #[arg(long, global = true)]
    tcp: Option<String>,
    /// Name fragment used to discover the belt when no address is given.
    #[arg(short, long, global = true)]
    name: Option<String>,
    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long, global = true)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial devices that could be a belt.
    List,
    /// Connect and print what the belt reports.
    Info,
    /// Print the effective configuration as JSON.
    Config,
    /// Start a vibration.
    Vibrate {
        /// Vibromotor positions, 0 is the front, clockwise.
        #[arg(long, num_args = 1.., allow_negative_numbers = true, conflicts_with_all = ["angle", "bearing"])]
        position: Vec<i32>,
        /// Angle in degrees, 0 is the front, clockwise.
        #[arg(long, allow_negative_numbers = true, conflicts_with = "bearing")]
        angle: Option<f32>,
        /// Direction relative to magnetic North in degrees.
        #[arg(long, allow_negative_numbers = true)]
        bearing: Option<f32>,
        #[arg(long, default_value_t = 0)]
        channel: u8,
        /// Intensity in percent, negative for the belt default.
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        intensity: i32,
        /// Pattern id (0 continuous, 1 wait, 2 wait connected, 5 single pulse, 6 double pulse).
        #[arg(long, default_value_t = 0)]
        pattern: u8,
        /// Stop the vibration on other channels.
        #[arg(long)]
        stop_others: bool,
        /// Stop again after this many milliseconds; keep vibrating if omitted.
        #[arg(long)]
        duration_ms: Option<u64>,
    },
    /// Stop vibrations.
    Stop {
        /// Channel to stop, negative for all channels.
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        channel: i32,
    },
    /// Switch the belt mode.
    Mode {
        #[arg(value_enum)]
        mode: ModeArg,
        /// Send the request even if the belt already reports this mode.
        #[arg(long)]
        force: bool,
    },
    /// Walk a vibration around the belt.
    Rotate {
        #[arg(long, default_value_t = 1)]
        rounds: u32,
        /// Time on each vibromotor.
        #[arg(long, default_value_t = 100)]
        step_ms: u64,
    },
    /// Print mode changes and button presses until Ctrl+C.
    Monitor,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Standby,
    Wait,
    Compass,
    App,
    Pause,
    Calibration,
}

impl From<ModeArg> for BeltMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Standby => BeltMode::Standby,
            ModeArg::Wait => BeltMode::Wait,
            ModeArg::Compass => BeltMode::Compass,
            ModeArg::App => BeltMode::AppMode,
            ModeArg::Pause => BeltMode::Pause,
            ModeArg::Calibration => BeltMode::Calibration,
        }
    }
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // -v gives DEBUG, -vv TRACE; RUST_LOG still wins when set
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    if let Err(e) = run(cli).await {
        error!("{:?}", e);
        process::exit(1);
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<BeltConfig> {
    let mut config = match &cli.config {
        Some(path) => BeltConfig::from_json_file(path).with_context(|| format!("Failed to load config {:?}", path))?,
        None => BeltConfig::default(),
    };
    if let Some(name) = &cli.name {
        config.belt_name = name.clone();
    }
    if let Some(path) = &cli.serial {
        config.address = Some(BeltAddress::Serial {
            path: path.clone(),
            baud_rate: cli.baud.unwrap_or(DEFAULT_BAUD_RATE),
        });
    } else if let Some(addr) = &cli.tcp {
        config.address = Some(BeltAddress::tcp(addr.clone()));
    } else if let (Some(BeltAddress::Serial { baud_rate, .. }), Some(baud)) = (config.address.as_mut(), cli.baud) {
        *baud_rate = baud;
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let baud_rate = cli.baud.unwrap_or(DEFAULT_BAUD_RATE);

    match cli.command {
        Command::List => list_belts(baud_rate),
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Info => {
            let belt = connect(config, None, baud_rate).await?;
            println!("Mode:              {}", belt.mode());
            println!("Firmware version:  {}", display_or_unknown(belt.firmware_version()));
            println!("Default intensity: {}", display_or_unknown(belt.default_intensity()));
            println!("Channels:          {}", display_or_unknown(belt.channel_count()));
            belt.disconnect(true).await;
            Ok(())
        }
        Command::Vibrate {
            position,
            angle,
            bearing,
            channel,
            intensity,
            pattern,
            stop_others,
            duration_ms,
        } => {
            let params = VibrationParams::on_channel(channel)
                .with_intensity(intensity)
                .with_pattern(VibrationPattern::from(pattern))
                .stopping_other_channels(stop_others);
            if position.is_empty() && angle.is_none() && bearing.is_none() {
                anyhow::bail!("one of --position, --angle or --bearing is required");
            }
            let belt = connect(config, None, baud_rate).await?;
            if let Some(angle) = angle {
                belt.vibrate_at_angle(angle, params, true).await?;
            } else if let Some(bearing) = bearing {
                belt.vibrate_at_magnetic_bearing(bearing, params, true).await?;
            } else {
                belt.vibrate_at_positions(&position, params, true).await?;
            }
            if let Some(ms) = duration_ms {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                belt.stop_vibration(i32::from(channel), true).await?;
            }
            belt.disconnect(true).await;
            Ok(())
        }
        Command::Stop { channel } => {
            let belt = connect(config, None, baud_rate).await?;
            belt.stop_vibration(channel, true).await?;
            belt.disconnect(true).await;
            Ok(())
        }
        Command::Mode { mode, force } => {
            let belt = connect(config, None, baud_rate).await?;
            belt.switch_mode(mode.into(), force, true).await?;
            println!("Belt mode: {}", belt.mode());
            belt.disconnect(true).await;
            Ok(())
        }
        Command::Rotate { rounds, step_ms } => {
            let belt = connect(config, None, baud_rate).await?;
            info!(rounds, step_ms, "Starting rotation");
            for _ in 0..rounds {
                for position in 0..i32::from(VIBROMOTOR_COUNT) {
                    belt.vibrate_at_positions(&[position], VibrationParams::default(), false)
                        .await?;
                    tokio::time::sleep(Duration::from_millis(step_ms)).await;
                }
            }
            belt.stop_vibration(-1, true).await?;
            belt.disconnect(true).await;
            Ok(())
        }
        Command::Monitor => monitor(config, baud_rate).await,
    }
}

fn list_belts(baud_rate: u32) -> Result<()> {
    let belts = SerialPortDiscovery { baud_rate }
        .discover()
        .context("Failed to list serial devices")?;
    if belts.is_empty() {
        println!("No serial devices found.");
    }
    for belt in belts {
        println!("{:<40} {}", belt.name, belt.address);
    }
    Ok(())
}

fn display_or_unknown(value: Option<u8>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

async fn connect(
    config: BeltConfig,
    observer: Option<Arc<dyn navibelt_lib::BeltObserver>>,
    baud_rate: u32,
) -> Result<BeltController> {
    let address = config.address.clone();
    let belt = match observer {
        Some(observer) => BeltController::with_observer(config, observer),
        None => BeltController::new(config),
    };

    let report = match address {
        Some(address) => belt
            .connect(&address)
            .await
            .with_context(|| format!("Unable to connect to the belt at {}", address))?,
        None => belt
            .connect_discovered(&SerialPortDiscovery { baud_rate })
            .await
            .context("Unable to find or connect to the belt")?,
    };
    if !report.is_complete() {
        warn!(missing = ?report.missing, "Belt did not report all parameters");
    }
    Ok(belt)
}

async fn monitor(config: BeltConfig, baud_rate: u32) -> Result<()> {
    let observer = |event: &BeltEvent| -> Result<(), ObserverError> {
        if event.button_id > 0 {
            println!(
                "#{:<4} mode {:<18} button {} press {}",
                event.sequence, event.mode, event.button_id, event.press_type
            );
        } else {
            println!("#{:<4} mode {}", event.sequence, event.mode);
        }
        Ok(())
    };
    let belt = connect(config, Some(Arc::new(observer)), baud_rate).await?;
    info!("Monitoring belt events, press Ctrl+C to stop");

    let mut interval = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Ctrl+C received, disconnecting");
                break;
            }
            _ = interval.tick() => {
                if !belt.is_connected() {
                    warn!("Belt connection lost");
                    break;
                }
            }
        }
    }
    belt.disconnect(true).await;
    Ok(())
}
