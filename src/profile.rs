/*!
 # Device profiles

 Per-model constants selected once from the advertised device name.
*/

use uuid::Uuid;

use crate::protocol::Frame;

/// Write characteristics known to accept command frames, in discovery order
pub const WRITE_CHARACTERISTIC_UUIDS: [Uuid; 2] = [
    Uuid::from_u128(0x0000fff3_0000_1000_8000_00805f9b34fb),
    Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb),
];

const POWER_ON: Frame = [0x7e, 0x00, 0x04, 0xf0, 0x00, 0x01, 0xff, 0x00, 0xef];
const POWER_OFF: Frame = [0x7e, 0x00, 0x04, 0x00, 0x00, 0x00, 0xff, 0x00, 0xef];

/// Supported device types for LED control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// ELK-BLEDDM device type
    ElkBleddm,
    /// ELK-BLE device type
    ElkBle,
    /// LEDBLE device type
    LedBle,
    /// MELK device type
    Melk,
    /// ELK-BULB2 device type
    ElkBulb2,
    /// ELK-BULB device type
    ElkBulb,
    /// ELK-LAMPL device type
    ElkLampl,
    /// Unknown device type
    Unknown,
}

/// Advertised name prefixes and the device type each one selects
const NAME_TABLE: [(&str, DeviceType); 7] = [
    ("ELK-BLEDDM", DeviceType::ElkBleddm),
    ("ELK-BLE", DeviceType::ElkBle),
    ("LEDBLE", DeviceType::LedBle),
    ("MELK", DeviceType::Melk),
    ("ELK-BULB2", DeviceType::ElkBulb2),
    ("ELK-BULB", DeviceType::ElkBulb),
    ("ELK-LAMPL", DeviceType::ElkLampl),
];

impl DeviceType {
    /// Picks the device type whose prefix is the longest case-insensitive
    /// match of `name`
    pub fn from_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        NAME_TABLE
            .iter()
            .filter(|(prefix, _)| name.starts_with(&prefix.to_ascii_lowercase()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, device_type)| *device_type)
            .unwrap_or(DeviceType::Unknown)
    }

    /// Get the device type name as string
    pub fn name(&self) -> &'static str {
        match self {
            DeviceType::ElkBleddm => "ELK-BLEDDM",
            DeviceType::ElkBle => "ELK-BLE",
            DeviceType::LedBle => "LEDBLE",
            DeviceType::Melk => "MELK",
            DeviceType::ElkBulb2 => "ELK-BULB2",
            DeviceType::ElkBulb => "ELK-BULB",
            DeviceType::ElkLampl => "ELK-LAMPL",
            DeviceType::Unknown => "Unknown",
        }
    }
}

/// Immutable per-model configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Model this profile was selected for
    pub device_type: DeviceType,
    /// Command to turn the device on
    pub turn_on_frame: Frame,
    /// Command to turn the device off
    pub turn_off_frame: Frame,
    /// Minimum supported color temperature in Kelvin
    pub min_color_temp_kelvin: u32,
    /// Maximum supported color temperature in Kelvin
    pub max_color_temp_kelvin: u32,
    /// Minimum spacing between two frames in milliseconds
    pub command_delay: u64,
}

impl DeviceProfile {
    /// Profile for an advertised name, falling back to the generic profile
    pub fn for_name(name: Option<&str>) -> Self {
        let device_type = name.map_or(DeviceType::Unknown, DeviceType::from_name);
        Self::for_type(device_type)
    }

    /// Get configuration based on device type
    pub fn for_type(device_type: DeviceType) -> Self {
        // every known model shares the same power frames
        DeviceProfile {
            device_type,
            turn_on_frame: POWER_ON,
            turn_off_frame: POWER_OFF,
            min_color_temp_kelvin: 2700,
            max_color_temp_kelvin: 6500,
            command_delay: 15, // 15 seems to be the lowest value supported
        }
    }

    /// Clamps a requested temperature into this model's range
    pub fn clamp_kelvin(&self, kelvin: u32) -> u32 {
        kelvin.clamp(self.min_color_temp_kelvin, self.max_color_temp_kelvin)
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::for_type(DeviceType::Unknown)
    }
}
