use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use elk_fastlink::effects::{self, Effect};
use elk_fastlink::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, trace};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// MAC address or platform id of the LED controller
    #[arg(short, long)]
    address: Option<String>,

    /// JSON file holding the last known state of each device
    #[arg(long, default_value = config::DEFAULT_STATE_FILE)]
    state_file: PathBuf,

    /// Seconds to scan for the device before giving up
    #[arg(long, default_value_t = 10)]
    scan_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Demonstration of LED features
    Demo {
        /// Duration of each demo step in seconds
        #[arg(short, long, default_value_t = 5)]
        duration: u64,
    },
    /// Turn LED strip on, restoring the last color
    On,
    /// Turn LED strip off
    Off,
    /// Set custom RGB color
    Color {
        /// Red value (0-255)
        red: u8,
        /// Green value (0-255)
        green: u8,
        /// Blue value (0-255)
        blue: u8,
        /// Brightness (1-255)
        #[arg(short, long)]
        brightness: Option<u8>,
    },
    /// Set brightness
    Brightness {
        /// Brightness level (1-255)
        level: u8,
    },
    /// Set color temperature
    ColorTemp {
        /// Color temperature in Kelvin (2700-6500)
        kelvin: u32,
        /// Brightness (1-255)
        #[arg(short, long)]
        brightness: Option<u8>,
    },
    /// Start an effect by name or id, or `none` for static color
    Effect {
        /// Effect name (see `effects`), numeric id, or `none`
        effect: String,
        /// Effect speed (1-31)
        #[arg(short, long)]
        speed: Option<u8>,
    },
    /// Set effect speed
    EffectSpeed {
        /// Speed (1-31)
        speed: u8,
    },
    /// Set how brightness is sent to the device
    Mode {
        /// auto, rgb or native
        mode: BrightnessMode,
    },
    /// List available effects
    Effects,
    /// Show the persisted state of the device
    Status,
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    // Initialize tracing with pretty colors
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("elk_fastlink=info")),
        )
        .compact()
        .init();

    // Initialize color-eyre for pretty error reporting
    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    if let Commands::Effects = cli.command {
        list_effects();
        return Ok(());
    }

    let address = cli
        .address
        .ok_or_else(|| eyre!("--address is required for this command"))?;

    if let Commands::Status = cli.command {
        let record = StateStore::new(&cli.state_file).load(&address);
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let transport = BtleTransport::new()
        .await?
        .with_scan_timeout(Duration::from_secs(cli.scan_timeout));
    let config = ControllerConfig::default().with_state_path(cli.state_file);

    let device = match DeviceController::new(Arc::new(transport), &address, config).await {
        Ok(dev) => dev,
        Err(e) => {
            error!("Failed to initialize device: {}", e);
            return Err(e.into());
        }
    };

    let result = run(&device, cli.command).await;
    device.shutdown().await;
    result
}

async fn run(device: &DeviceController, command: Commands) -> Result<()> {
    match command {
        Commands::Demo { duration } => run_demo(device, duration).await?,
        Commands::On => device.turn_on().await?,
        Commands::Off => device.turn_off().await?,
        Commands::Color {
            red,
            green,
            blue,
            brightness,
        } => device.set_color((red, green, blue), brightness).await?,
        Commands::Brightness { level } => device.set_brightness(level).await?,
        Commands::ColorTemp { kelvin, brightness } => {
            device
                .set_color_temperature_kelvin(kelvin, brightness)
                .await?
        }
        Commands::Effect { effect, speed } => {
            let effect = effects::parse_selector(&effect).map_err(|e| eyre!(e))?;
            if let Some(speed) = speed {
                device.set_effect_speed(speed).await?;
            }
            device.set_effect(effect).await?;
        }
        Commands::EffectSpeed { speed } => device.set_effect_speed(speed).await?,
        Commands::Mode { mode } => device.set_brightness_mode(mode).await?,
        Commands::Effects | Commands::Status => debug!("Nothing to send to the device"),
    }

    Ok(())
}

fn list_effects() {
    println!("{:<50} {:>6}  {}", "name", "id", "label");
    println!("{:<50} {:>6}  {}", effects::NONE_NAME, "0x00", "Static");
    for effect in Effect::ALL {
        println!(
            "{:<50} {:>#6x}  {}",
            effect.name(),
            effect.id(),
            effect.label()
        );
    }
}

/// Sleep for specified number of seconds
#[instrument]
async fn sleep(seconds: u64) {
    trace!("Sleeping for {}s", seconds);
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    trace!("Sleep completed");
}

/// Run a demonstration of various LED strip features
#[instrument(skip(device))]
async fn run_demo(device: &DeviceController, duration: u64) -> Result<()> {
    info!("Running LED strip demo with {}s intervals", duration);

    info!("Turning LEDs on");
    device.turn_on().await?;
    sleep(duration).await;

    for (label, rgb) in [
        ("red", (255, 0, 0)),
        ("green", (0, 255, 0)),
        ("blue", (0, 0, 255)),
    ] {
        info!("Setting color to {}", label);
        device.set_color(rgb, None).await?;
        sleep(duration).await;
    }

    info!("Setting brightness to half");
    device.set_brightness(128).await?;
    sleep(duration).await;

    info!("Setting warm white (2700K)");
    device.set_color_temperature_kelvin(2700, Some(255)).await?;
    sleep(duration).await;

    info!("Setting cool white (6500K)");
    device.set_color_temperature_kelvin(6500, None).await?;
    sleep(duration).await;

    for effect in [
        Effect::CrossfadeRedGreenBlueYellowCyanMagentaWhite,
        Effect::JumpRedGreenBlue,
        Effect::BlinkRedGreenBlueYellowCyanMagentaWhite,
    ] {
        info!("Setting {} effect", effect.label());
        device.set_effect(Some(effect.id())).await?;
        sleep(duration).await;
    }

    info!("Setting effect speed to slow (5)");
    device.set_effect_speed(5).await?;
    sleep(duration).await;

    info!("Setting effect speed to fast (28)");
    device.set_effect_speed(28).await?;
    sleep(duration).await;

    info!("Back to static color");
    device.set_effect(None).await?;
    sleep(1).await;

    info!("Turning LEDs off to end demo");
    device.turn_off().await?;

    info!("Demo completed!");
    Ok(())
}
