/*!
 # Brightness handling

 Firmware revisions disagree on how brightness is realized. Some honor the
 native brightness opcode, others silently ignore it, so brightness can be
 baked into the RGB channels instead. Color temperature is not a device mode at
 all; it is emulated by blending two RGB anchors.
*/

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

use crate::protocol::{self, Frame};
use crate::Result;

/// Warmest emulated white
pub const WARM_ANCHOR: (u8, u8, u8) = (255, 77, 12);
/// Coolest emulated white
pub const COOL_ANCHOR: (u8, u8, u8) = (255, 255, 255);

/// How brightness is sent to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrightnessMode {
    /// Try native brightness, fall back to scaled RGB on failure
    #[default]
    Auto,
    /// Scale the color channels
    Rgb,
    /// Send the color unscaled, then the native brightness opcode
    Native,
}

impl BrightnessMode {
    pub const ALL: [BrightnessMode; 3] =
        [BrightnessMode::Auto, BrightnessMode::Rgb, BrightnessMode::Native];

    pub fn as_str(&self) -> &'static str {
        match self {
            BrightnessMode::Auto => "auto",
            BrightnessMode::Rgb => "rgb",
            BrightnessMode::Native => "native",
        }
    }
}

impl fmt::Display for BrightnessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrightnessMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BrightnessMode::Auto),
            "rgb" => Ok(BrightnessMode::Rgb),
            "native" => Ok(BrightnessMode::Native),
            other => Err(format!("unknown brightness mode: {other} (auto, rgb, native)")),
        }
    }
}

/// `round(channel * brightness / 255)` in integer arithmetic
pub fn scale_channel(channel: u8, brightness: u8) -> u8 {
    ((u32::from(channel) * u32::from(brightness) + 127) / 255) as u8
}

pub fn scale_rgb(rgb: (u8, u8, u8), brightness: u8) -> (u8, u8, u8) {
    (
        scale_channel(rgb.0, brightness),
        scale_channel(rgb.1, brightness),
        scale_channel(rgb.2, brightness),
    )
}

/// Brightness as the 0-100 percentage the native opcode expects
pub fn brightness_percent(brightness: u8) -> u8 {
    ((u32::from(brightness) * 100 + 127) / 255) as u8
}

/// Emulates a white of the given temperature by blending from the warm to the
/// cool anchor across `[min_kelvin, max_kelvin]`
pub fn kelvin_to_rgb(kelvin: u32, min_kelvin: u32, max_kelvin: u32) -> (u8, u8, u8) {
    let t = if max_kelvin > min_kelvin {
        let k = kelvin.clamp(min_kelvin, max_kelvin);
        f64::from(k - min_kelvin) / f64::from(max_kelvin - min_kelvin)
    } else {
        1.0
    };

    let blend = |warm: u8, cool: u8| -> u8 {
        let value = f64::from(warm) + (f64::from(cool) - f64::from(warm)) * t;
        value.round().clamp(0.0, 255.0) as u8
    };

    (
        blend(WARM_ANCHOR.0, COOL_ANCHOR.0),
        blend(WARM_ANCHOR.1, COOL_ANCHOR.1),
        blend(WARM_ANCHOR.2, COOL_ANCHOR.2),
    )
}

/// Single scaled color frame
pub fn rgb_frame(rgb: (u8, u8, u8), brightness: u8) -> Frame {
    let (r, g, b) = scale_rgb(rgb, brightness);
    protocol::color(r, g, b)
}

/// Unscaled color frame followed by the native brightness frame
pub fn native_frames(rgb: (u8, u8, u8), brightness: u8) -> [Frame; 2] {
    [
        protocol::color(rgb.0, rgb.1, rgb.2),
        protocol::native_brightness(brightness_percent(brightness)),
    ]
}

/// Destination for frames produced by the policy
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, frame: Frame) -> Result<()>;
}

/// Decides which frames realize a color at a brightness level
#[derive(Debug, Clone)]
pub struct BrightnessPolicy {
    /// Pause between the color frame and the native brightness frame
    pub native_settle: Duration,
}

impl BrightnessPolicy {
    pub fn new(native_settle: Duration) -> Self {
        Self { native_settle }
    }

    pub async fn apply<S>(
        &self,
        sink: &S,
        mode: BrightnessMode,
        rgb: (u8, u8, u8),
        brightness: u8,
    ) -> Result<()>
    where
        S: FrameSink + ?Sized,
    {
        match mode {
            BrightnessMode::Rgb => sink.send(rgb_frame(rgb, brightness)).await,
            BrightnessMode::Native => self.send_native(sink, rgb, brightness).await,
            BrightnessMode::Auto => match self.send_native(sink, rgb, brightness).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    warn!("Native brightness failed ({}), falling back to scaled RGB", e);
                    sink.send(rgb_frame(rgb, brightness)).await
                }
            },
        }
    }

    async fn send_native<S>(&self, sink: &S, rgb: (u8, u8, u8), brightness: u8) -> Result<()>
    where
        S: FrameSink + ?Sized,
    {
        let [color, level] = native_frames(rgb, brightness);
        sink.send(color).await?;
        time::sleep(self.native_settle).await;
        debug!("Native brightness {}%", brightness_percent(brightness));
        sink.send(level).await
    }
}
