use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};

use ready4sky_bridge::config::{AppConfig, CONFIG_FILE_NAME};
use ready4sky_bridge::core::bluetooth::BluestTransport;
use ready4sky_bridge::core::protocol::{CookProgram, Rgb, COOKER_PROGRAMS};
use ready4sky_bridge::{logging, ApplianceState, BluetoothManager, DeviceHandle};

#[derive(Parser)]
#[command(name = "ready4sky-bridge", version, about = "Control Ready4Sky appliances over BLE")]
struct Cli {
    /// Device configuration file
    #[arg(short, long, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Configured device to talk to; defaults to the first one
    #[arg(short, long)]
    mac: Option<String>,

    /// Log debug output, including every frame
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List nearby appliances
    Scan {
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
    },
    /// Print the current state
    Status,
    /// Boil (kettles) or start (everything else)
    On,
    Off,
    /// Heat to a temperature and keep it
    Temp { celsius: u8 },
    /// Fan speed 0-6, 0 switches off
    Fan { speed: u8 },
    /// Humidifier ionizer
    Ion { state: Toggle },
    /// Start a named multicooker program
    Cook { program: String },
    /// Change the cooker timer
    Timer { hours: u8, minutes: u8 },
    /// Nightlight colour as rrggbb
    Color { rgb: String },
    /// Kettle beeps
    Sound { state: Toggle },
    /// Keep the connection open and print every state change
    Watch,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl From<Toggle> for bool {
    fn from(toggle: Toggle) -> Self {
        matches!(toggle, Toggle::On)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    let manager = BluetoothManager::new().await?;

    if let Commands::Scan { seconds } = cli.command {
        for device in manager.discover(Some(Duration::from_secs(seconds))).await? {
            let family = device
                .device_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "unsupported".into());
            println!(
                "{}  {:<12} {:>5}  {}",
                device.address,
                device.name,
                device.rssi.map(|r| r.to_string()).unwrap_or_default(),
                family
            );
        }
        return Ok(());
    }

    let config = AppConfig::load_config(&cli.config).await?;
    let device = config.device(cli.mac.as_deref())?;
    let handle = manager.connect_with_config(device).await?;

    let result = run(&handle, cli.command).await;
    handle.shutdown().await?;
    result
}

async fn run(handle: &DeviceHandle<BluestTransport>, command: Commands) -> Result<()> {
    match command {
        Commands::Scan { .. } => return Ok(()),
        Commands::Status => handle.refresh().await?,
        Commands::On => handle.turn_on().await?,
        Commands::Off => handle.turn_off().await?,
        Commands::Temp { celsius } => handle.set_temperature(celsius).await?,
        Commands::Fan { speed } => handle.set_fan_speed(speed).await?,
        Commands::Ion { state } => handle.set_ionization(state.into()).await?,
        Commands::Cook { program } => {
            let Some(program) = CookProgram::preset(&program) else {
                let names: Vec<_> = COOKER_PROGRAMS.iter().map(|(name, _)| *name).collect();
                bail!("Unknown program {:?}, expected one of {}", program, names.join(", "));
            };
            handle.set_cook_program(program).await?
        }
        Commands::Timer { hours, minutes } => handle.set_timer(hours, minutes).await?,
        Commands::Color { rgb } => {
            let color: Rgb = rgb.parse()?;
            handle.set_nightlight_color(color).await?
        }
        Commands::Sound { state } => handle.set_sound(state.into()).await?,
        Commands::Watch => {
            print_state(&handle.state())?;
            let printer = handle.on_change(|state| {
                if let Err(e) = print_state(&state) {
                    log::error!("Failed to print state: {}", e);
                }
            });
            info!("Watching, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            printer.abort();
            return Ok(());
        }
    }

    print_state(&handle.state())
}

fn print_state(state: &ApplianceState) -> Result<()> {
    let json = serde_json::to_string_pretty(state)?;
    println!("{json}");
    Ok(())
}
