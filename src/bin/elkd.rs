use elk_fastlink::*;
use std::io::BufRead;
use std::sync::Arc;
use std::{env, io, thread};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

enum Outcome {
    Reply(String),
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the line protocol, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("elk_fastlink=warn")),
        )
        .with_writer(io::stderr)
        .compact()
        .init();

    // Get a target id/mac address from command line arguments.
    // If not provided, exit.
    let usage = "Usage: elkd <id/mac address> [state file]";
    let args: Vec<_> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{usage}");
        std::process::exit(1);
    }
    if args[1] == "-h" || args[1] == "--help" {
        eprintln!("{usage}");
        std::process::exit(0);
    }

    let mut config = ControllerConfig::default();
    if let Some(path) = args.get(2) {
        config = config.with_state_path(path);
    }

    let transport = Arc::new(BtleTransport::new().await?);
    let device = match DeviceController::new(transport, &args[1], config).await {
        Ok(device) => device,
        Err(e) => {
            println!("ERR {e}");
            return Err(e);
        }
    };

    // Inform about successful initialization
    println!("OK");

    let mut lines = spawn_stdin_reader();

    // Mainloop: wait for user input, line by line
    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        match handle(&device, line.trim()).await {
            Ok(Outcome::Reply(reply)) => println!("{reply}"),
            Ok(Outcome::Quit) => {
                println!("OK");
                break;
            }
            Err(message) => {
                warn!("{}", message);
                println!("ERR {message}");
            }
        }
    }

    device.shutdown().await;
    Ok(())
}

/// Forwards stdin lines to the async side; the channel closes on EOF
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Runs one `cmd[:args]` line against the device
async fn handle(device: &DeviceController, line: &str) -> std::result::Result<Outcome, String> {
    let (cmd, args) = match line.split_once(':') {
        Some((cmd, args)) => (cmd.trim(), Some(args.trim())),
        None => (line, None),
    };
    debug!("Command {:?} with {:?}", cmd, args);

    let ok = || Ok(Outcome::Reply("OK".to_string()));
    match cmd {
        "power_on" => device.turn_on().await.map_err(|e| e.to_string()).and_then(|_| ok()),
        "power_off" => device.turn_off().await.map_err(|e| e.to_string()).and_then(|_| ok()),
        "set_color" => {
            let values = parse_numbers::<u8>(required(args, "R,G,B[,brightness]")?)?;
            let (rgb, brightness) = match values.as_slice() {
                [r, g, b] => ((*r, *g, *b), None),
                [r, g, b, level] => ((*r, *g, *b), Some(*level)),
                _ => {
                    return Err(
                        "Invalid color format. Use R,G,B (e.g., 255,0,0 for red)".to_string(),
                    )
                }
            };
            device
                .set_color(rgb, brightness)
                .await
                .map_err(|e| e.to_string())?;
            ok()
        }
        "set_brightness" => {
            let level = parse_one::<u8>(required(args, "brightness (1-255)")?)?;
            device
                .set_brightness(level)
                .await
                .map_err(|e| e.to_string())?;
            ok()
        }
        "set_color_temp" => {
            let values = parse_numbers::<u32>(required(args, "kelvin[,brightness]")?)?;
            let (kelvin, brightness) = match values.as_slice() {
                [kelvin] => (*kelvin, None),
                [kelvin, level] => (
                    *kelvin,
                    Some(u8::try_from(*level).map_err(|_| "Brightness must be 1-255")?),
                ),
                _ => return Err("Invalid format. Use kelvin[,brightness]".to_string()),
            };
            device
                .set_color_temperature_kelvin(kelvin, brightness)
                .await
                .map_err(|e| e.to_string())?;
            ok()
        }
        "set_effect" => {
            let effect = effects::parse_selector(required(args, "effect name, id or none")?)?;
            device.set_effect(effect).await.map_err(|e| e.to_string())?;
            ok()
        }
        "set_effect_speed" => {
            let speed = parse_one::<u8>(required(args, "speed (1-31)")?)?;
            device
                .set_effect_speed(speed)
                .await
                .map_err(|e| e.to_string())?;
            ok()
        }
        "set_brightness_mode" => {
            let mode: BrightnessMode = required(args, "auto, rgb or native")?.parse()?;
            device
                .set_brightness_mode(mode)
                .await
                .map_err(|e| e.to_string())?;
            ok()
        }
        "state" => Ok(Outcome::Reply(describe(device).await)),
        "quit" | "exit" => Ok(Outcome::Quit),
        "" => Err("No command given".to_string()),
        other => Err(format!("Unknown command: {other}")),
    }
}

fn required<'a>(args: Option<&'a str>, what: &str) -> std::result::Result<&'a str, String> {
    args.filter(|args| !args.is_empty())
        .ok_or_else(|| format!("Missing argument: {what}"))
}

fn parse_one<T: std::str::FromStr>(input: &str) -> std::result::Result<T, String> {
    input
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {input}"))
}

fn parse_numbers<T: std::str::FromStr>(input: &str) -> std::result::Result<Vec<T>, String> {
    input.split(',').map(parse_one).collect()
}

async fn describe(device: &DeviceController) -> String {
    let state = device.state();
    let (r, g, b) = state.rgb_color;
    let effect = state
        .last_effect
        .map_or_else(|| effects::NONE_NAME.to_string(), |id| format!("{id:#04x}"));
    format!(
        "OK on={} rgb={},{},{} brightness={} kelvin={} effect={} speed={} mode={} connected={}",
        state.is_on,
        r,
        g,
        b,
        state.brightness,
        state.color_temp_kelvin,
        effect,
        state.effect_speed,
        state.brightness_mode,
        device.is_connected().await
    )
}
