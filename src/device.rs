use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::{task, time};
use tracing::{debug, info, instrument, trace, warn};

use crate::brightness::{kelvin_to_rgb, BrightnessMode, BrightnessPolicy, FrameSink};
use crate::config::ControllerConfig;
use crate::connection::ConnectionManager;
use crate::profile::DeviceProfile;
use crate::protocol::{self, Frame};
use crate::retry::RetryPolicy;
use crate::store::{PersistedRecord, StateStore};
use crate::transport::Transport;
use crate::{Error, Result};

/// Lowest effect speed the firmware accepts
pub const MIN_EFFECT_SPEED: u8 = 1;
/// Highest effect speed the firmware accepts
pub const MAX_EFFECT_SPEED: u8 = 31;

/// What the controller last told the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    /// Current power state
    pub is_on: bool,
    /// Current RGB color, before brightness scaling
    pub rgb_color: (u8, u8, u8),
    /// Current brightness (1-255)
    pub brightness: u8,
    /// Last requested color temperature in Kelvin
    pub color_temp_kelvin: u32,
    /// Effect speed (1-31)
    pub effect_speed: u8,
    /// Active effect id; `None` means static color
    pub last_effect: Option<u8>,
    /// How brightness is realized
    pub brightness_mode: BrightnessMode,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            is_on: false,
            rgb_color: (255, 255, 255),
            brightness: 255,
            color_temp_kelvin: 5000,
            effect_speed: 16,
            last_effect: None,
            brightness_mode: BrightnessMode::Auto,
        }
    }
}

impl DeviceState {
    /// Rebuilds state from a persisted record; missing fields take defaults
    /// and values are clamped into the profile's ranges
    pub fn from_record(record: &PersistedRecord, profile: &DeviceProfile) -> Self {
        let defaults = Self::default();
        Self {
            rgb_color: record
                .rgb
                .map_or(defaults.rgb_color, |[r, g, b]| (r, g, b)),
            brightness: record
                .brightness
                .map_or(defaults.brightness, clamp_brightness),
            color_temp_kelvin: profile
                .clamp_kelvin(record.color_temp.unwrap_or(defaults.color_temp_kelvin)),
            brightness_mode: record.brightness_mode.unwrap_or_default(),
            ..defaults
        }
    }

    pub fn to_record(&self) -> PersistedRecord {
        let (r, g, b) = self.rgb_color;
        PersistedRecord {
            rgb: Some([r, g, b]),
            brightness: Some(self.brightness),
            color_temp: Some(self.color_temp_kelvin),
            brightness_mode: Some(self.brightness_mode),
        }
    }
}

/// Brightness 0 is never stored, "off" is tracked by `is_on`
fn clamp_brightness(value: u8) -> u8 {
    value.max(1)
}

/// Sends frames through the retry policy, connecting on demand
struct RetryingWriter<'a> {
    connection: &'a ConnectionManager,
    retry: &'a RetryPolicy,
    name: &'a str,
}

impl RetryingWriter<'_> {
    async fn write(&self, frame: Frame) -> Result<()> {
        trace!("{}: -> {}", self.name, protocol::to_hex(&frame));
        let connection = self.connection;
        let frame = &frame;
        self.retry
            .run("write", || async move {
                connection.ensure_connected().await;
                connection.write(frame).await
            })
            .await
    }
}

#[async_trait]
impl<'a> FrameSink for RetryingWriter<'a> {
    async fn send(&self, frame: Frame) -> Result<()> {
        self.write(frame).await
    }
}

/// Controls one LED strip
///
/// All commands take `&self`; share the controller behind an `Arc` to issue
/// commands from several tasks. Commands are serialized, so the frames of one
/// command are never interleaved with another's.
pub struct DeviceController {
    address: String,
    name: String,
    profile: DeviceProfile,
    state: Mutex<DeviceState>,
    store: StateStore,
    connection: ConnectionManager,
    policy: BrightnessPolicy,
    retry: RetryPolicy,
    settle_delay: Duration,
    command_lock: tokio::sync::Mutex<()>,
}

impl DeviceController {
    /// Resolves the device, restores its persisted state and starts the
    /// background connection tasks. The first connect is deferred; commands
    /// connect on demand.
    ///
    /// Fails with [`Error::Configuration`] when the transport does not know
    /// the address.
    #[instrument(skip(transport, config))]
    pub async fn new(
        transport: Arc<dyn Transport>,
        address: &str,
        config: ControllerConfig,
    ) -> Result<Self> {
        let device = match transport.resolve(address).await {
            Ok(device) => device,
            Err(Error::PeripheralNotFound(_))
            | Err(Error::BtlePlugError(btleplug::Error::DeviceNotFound)) => {
                return Err(Error::Configuration(format!(
                    "Bluetooth device {address} not found"
                )))
            }
            Err(e) => return Err(e),
        };

        let profile = DeviceProfile::for_name(device.name.as_deref());
        let name = device.name.clone().unwrap_or_else(|| address.to_string());
        info!(
            "Using {} profile for {} ({})",
            profile.device_type.name(),
            name,
            address
        );

        let store = StateStore::new(config.state_path.clone());
        let state = DeviceState::from_record(&store.load(address), &profile);
        debug!("Initial state: {:?}", state);

        let command_delay = config
            .command_delay
            .unwrap_or(Duration::from_millis(profile.command_delay));
        let connection =
            ConnectionManager::new(transport, address, &name, &config, command_delay);
        connection.start();

        Ok(Self {
            address: address.to_string(),
            name,
            profile,
            state: Mutex::new(state),
            store,
            connection,
            policy: BrightnessPolicy::new(config.native_settle_delay),
            retry: config.retry,
            settle_delay: config.settle_delay,
            command_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn writer(&self) -> RetryingWriter<'_> {
        RetryingWriter {
            connection: &self.connection,
            retry: &self.retry,
            name: &self.name,
        }
    }

    /// Saves the current state off the async workers; returns once it is written
    async fn persist(&self) {
        let record = self.state.lock().to_record();
        let store = self.store.clone();
        let address = self.address.clone();
        if let Err(e) = task::spawn_blocking(move || store.save(&address, &record)).await {
            warn!("{}: state save task failed: {}", self.name, e);
        }
    }

    /// Sends a static color through the brightness policy and records it.
    /// Callers hold the command lock and persist afterwards.
    async fn apply_static(&self, rgb: (u8, u8, u8), brightness: u8) -> Result<()> {
        let mode = self.state.lock().brightness_mode;
        self.policy
            .apply(&self.writer(), mode, rgb, brightness)
            .await?;

        let mut state = self.state.lock();
        state.rgb_color = rgb;
        state.brightness = brightness;
        state.last_effect = None;
        state.is_on = true;
        Ok(())
    }

    /// Turns the LED strip on and restores the last color and brightness
    #[instrument(skip(self), fields(device = %self.name))]
    pub async fn turn_on(&self) -> Result<()> {
        let _guard = self.command_lock.lock().await;
        debug!("Turning LED strip on");

        self.writer().write(self.profile.turn_on_frame).await?;
        self.state.lock().is_on = true;

        // the power-on frame resets the color to the firmware default
        time::sleep(self.settle_delay).await;
        let (rgb, brightness) = {
            let state = self.state.lock();
            (state.rgb_color, state.brightness)
        };
        self.apply_static(rgb, brightness).await?;
        self.persist().await;

        info!("LED strip powered on");
        Ok(())
    }

    /// Turns the LED strip off
    #[instrument(skip(self), fields(device = %self.name))]
    pub async fn turn_off(&self) -> Result<()> {
        let _guard = self.command_lock.lock().await;
        debug!("Turning LED strip off");

        // last chance before the strip may lose power
        self.persist().await;
        self.writer().write(self.profile.turn_off_frame).await?;
        self.state.lock().is_on = false;

        info!("LED strip powered off");
        Ok(())
    }

    /// Sets a static color, optionally together with a new brightness
    ///
    /// # Arguments
    ///
    /// * `rgb` - Unscaled color (0-255 per channel)
    /// * `brightness` - Brightness (1-255); `None` keeps the current level
    #[instrument(skip(self), fields(device = %self.name))]
    pub async fn set_color(&self, rgb: (u8, u8, u8), brightness: Option<u8>) -> Result<()> {
        let _guard = self.command_lock.lock().await;
        self.set_color_locked(rgb, brightness).await?;
        self.persist().await;
        Ok(())
    }

    async fn set_color_locked(&self, rgb: (u8, u8, u8), brightness: Option<u8>) -> Result<()> {
        let brightness = brightness
            .map(clamp_brightness)
            .unwrap_or_else(|| self.state.lock().brightness);

        debug!(
            "Setting color to RGB({}, {}, {}) at brightness {}",
            rgb.0, rgb.1, rgb.2, brightness
        );
        self.apply_static(rgb, brightness).await?;

        info!(
            "Color set to RGB({}, {}, {}) at brightness {}",
            rgb.0, rgb.1, rgb.2, brightness
        );
        Ok(())
    }

    /// Sets the brightness level (1-255), re-applying the current color
    #[instrument(skip(self), fields(device = %self.name))]
    pub async fn set_brightness(&self, value: u8) -> Result<()> {
        let _guard = self.command_lock.lock().await;
        let brightness = clamp_brightness(value);
        if brightness != value {
            warn!("Brightness {} out of range (1-255), using {}", value, brightness);
        }

        let rgb = self.state.lock().rgb_color;
        self.apply_static(rgb, brightness).await?;
        self.persist().await;

        info!("Brightness set to {}", brightness);
        Ok(())
    }

    /// Sets an emulated white of the given color temperature
    ///
    /// # Arguments
    ///
    /// * `value` - Color temperature in Kelvin, clamped to the profile's range
    /// * `brightness` - Brightness (1-255); `None` keeps the current level
    #[instrument(skip(self), fields(device = %self.name))]
    pub async fn set_color_temperature_kelvin(
        &self,
        value: u32,
        brightness: Option<u8>,
    ) -> Result<()> {
        let _guard = self.command_lock.lock().await;
        let kelvin = self.profile.clamp_kelvin(value);
        if kelvin != value {
            warn!(
                "Color temperature {} out of range ({}-{}), adjusting to {}",
                value,
                self.profile.min_color_temp_kelvin,
                self.profile.max_color_temp_kelvin,
                kelvin
            );
        }

        let rgb = kelvin_to_rgb(
            kelvin,
            self.profile.min_color_temp_kelvin,
            self.profile.max_color_temp_kelvin,
        );
        debug!("{}K emulated as RGB{:?}", kelvin, rgb);

        self.set_color_locked(rgb, brightness).await?;
        self.state.lock().color_temp_kelvin = kelvin;
        self.persist().await;

        info!("Color temperature set to {}K", kelvin);
        Ok(())
    }

    /// Starts a firmware effect, or returns to static color for `None` / `0`
    #[instrument(skip(self), fields(device = %self.name))]
    pub async fn set_effect(&self, effect: Option<u8>) -> Result<()> {
        let _guard = self.command_lock.lock().await;

        let Some(id) = effect.filter(|id| *id != 0) else {
            debug!("Leaving effect mode");
            let (rgb, brightness) = {
                let state = self.state.lock();
                (state.rgb_color, state.brightness)
            };
            self.apply_static(rgb, brightness).await?;
            self.persist().await;
            info!("Static color restored");
            return Ok(());
        };

        debug!("Setting effect mode to code: {:#04x}", id);
        let writer = self.writer();
        writer.write(protocol::effect(id)).await?;
        {
            let mut state = self.state.lock();
            state.last_effect = Some(id);
            state.is_on = true;
        }

        // the firmware resets the speed when an effect starts
        time::sleep(self.settle_delay).await;
        let speed = self.state.lock().effect_speed;
        writer.write(protocol::effect_speed(speed)).await?;
        self.persist().await;

        info!("Effect {:#04x} running at speed {}", id, speed);
        Ok(())
    }

    /// Sets the effect speed (1-31)
    #[instrument(skip(self), fields(device = %self.name))]
    pub async fn set_effect_speed(&self, speed: u8) -> Result<()> {
        let _guard = self.command_lock.lock().await;
        let speed = speed.clamp(MIN_EFFECT_SPEED, MAX_EFFECT_SPEED);

        let writer = self.writer();
        writer.write(protocol::effect_speed(speed)).await?;
        let active = {
            let mut state = self.state.lock();
            state.effect_speed = speed;
            state.last_effect
        };

        if let Some(id) = active {
            // re-select the running effect so it picks up the new speed
            time::sleep(self.settle_delay).await;
            writer.write(protocol::effect(id)).await?;
        } else {
            debug!("No active effect, speed applies to the next one");
        }
        self.persist().await;

        info!("Effect speed set to {}", speed);
        Ok(())
    }

    /// Switches the brightness mode. A change restarts the session because
    /// some firmware only honors the new mode on a fresh connection.
    #[instrument(skip(self), fields(device = %self.name))]
    pub async fn set_brightness_mode(&self, mode: BrightnessMode) -> Result<()> {
        let _guard = self.command_lock.lock().await;
        {
            let mut state = self.state.lock();
            if state.brightness_mode == mode {
                debug!("Brightness mode already {}", mode);
                return Ok(());
            }
            state.brightness_mode = mode;
        }

        self.persist().await;
        self.connection.reconnect().await;

        info!("Brightness mode set to {}", mode);
        Ok(())
    }

    /// Persists state and closes the link. Idempotent, never fails; the
    /// background tasks keep running and may connect again.
    pub async fn stop(&self) {
        self.persist().await;
        self.connection.disconnect().await;
    }

    /// Persists state, stops the background tasks and closes the link
    pub async fn shutdown(&self) {
        self.persist().await;
        self.connection.shutdown().await;
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Advertised name, or the address when the device has none
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Snapshot of the whole state
    pub fn state(&self) -> DeviceState {
        self.state.lock().clone()
    }

    pub fn is_on(&self) -> bool {
        self.state.lock().is_on
    }

    pub fn rgb_color(&self) -> (u8, u8, u8) {
        self.state.lock().rgb_color
    }

    pub fn brightness(&self) -> u8 {
        self.state.lock().brightness
    }

    pub fn color_temp_kelvin(&self) -> u32 {
        self.state.lock().color_temp_kelvin
    }

    pub fn min_color_temp_kelvin(&self) -> u32 {
        self.profile.min_color_temp_kelvin
    }

    pub fn max_color_temp_kelvin(&self) -> u32 {
        self.profile.max_color_temp_kelvin
    }

    /// Active effect id, `None` for static color
    pub fn current_effect(&self) -> Option<u8> {
        self.state.lock().last_effect
    }

    pub fn effect_speed(&self) -> u8 {
        self.state.lock().effect_speed
    }

    pub fn brightness_mode(&self) -> BrightnessMode {
        self.state.lock().brightness_mode
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }
}
