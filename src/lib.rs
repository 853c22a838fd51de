/*!
 # ELK-BLEDOM Fastlink

 A resilient Bluetooth LE driver for ELK-BLEDOM and similar LED strip controllers.
 Supports ELK-BLE, ELK-BLEDDM, LEDBLE, MELK, ELK-BULB, ELK-BULB2 and ELK-LAMPL devices.

 The driver keeps a single connection to one peripheral alive in the background,
 retries transient radio failures, and persists the last color, brightness, color
 temperature and brightness mode so they survive restarts.

 ## Features

 * Power on/off control with automatic color restore
 * RGB color control
 * Emulated color temperature
 * Brightness adjustment (scaled RGB, native opcode, or adaptive)
 * Effect modes (jump, crossfade, blink) and effect speed
 * Background reconnect and liveness checking
 * JSON state persistence

 ## Example

 ```rust,no_run
 use elk_fastlink::*;
 use std::sync::Arc;

 #[tokio::main]
 async fn main() -> Result<()> {
     // Initialize tracing for logs
     tracing_subscriber::fmt::init();

     let transport = Arc::new(BtleTransport::new().await?);
     let device =
         DeviceController::new(transport, "BE:16:FA:00:12:34", ControllerConfig::default())
             .await?;

     device.turn_on().await?;
     device.set_color((255, 0, 0), None).await?; // Red
     device.set_brightness(200).await?;

     device.shutdown().await;
     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the ELK LED driver
#[derive(Error, Debug)]
pub enum Error {
    /// No Bluetooth adapters found
    #[error("No Bluetooth adapters found")]
    NoBluetoothAdapters,

    /// The peripheral is not in range or unknown to the host stack
    #[error("Bluetooth device {0} not found")]
    PeripheralNotFound(String),

    /// None of the known write characteristics is exposed by the peripheral
    #[error("Could not find required BLE characteristic (tried {0})")]
    CharacteristicNotFound(String),

    /// No live connection handle
    #[error("Not connected")]
    NotConnected,

    /// The host stack is busy with another operation
    #[error("BLE stack busy: {0}")]
    Busy(String),

    /// BLE communication error
    #[error("BLE communication error: {0}")]
    BleError(String),

    /// The retry budget ran out without a result
    #[error("Command failed after {0} attempts")]
    RetriesExhausted(u8),

    /// The controller cannot be constructed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// State file could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Error from btleplug
    #[error(transparent)]
    BtlePlugError(#[from] btleplug::Error),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod brightness;
pub mod config;
pub mod connection;
pub mod device;
pub mod effects;
pub mod profile;
pub mod protocol;
pub mod retry;
pub mod store;
pub mod transport;

// Re-export key types
pub use brightness::BrightnessMode;
pub use config::ControllerConfig;
pub use connection::ConnectionManager;
pub use device::{DeviceController, DeviceState};
pub use effects::Effect;
pub use profile::DeviceProfile;
pub use protocol::Frame;
pub use retry::{ErrorClass, RetryPolicy};
pub use store::{PersistedRecord, StateStore};
pub use transport::{btle::BtleTransport, DisconnectCallback, Link, ResolvedDevice, Transport};
