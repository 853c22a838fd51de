/*!
 # Effect modes for LED strips

 This module defines the animations built into the controller firmware.
 An effect id of `0` means "no effect", i.e. static color.
*/

use std::fmt;
use std::str::FromStr;

/// Represents available effect modes for LED strips
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Effect {
    /// Red, green, blue jump effect
    JumpRedGreenBlue = 0x87,
    /// All colors jump effect
    JumpRedGreenBlueYellowCyanMagentaWhite = 0x88,
    /// Red, green, blue crossfade effect
    CrossfadeRedGreenBlue = 0x89,
    /// All colors crossfade effect
    CrossfadeRedGreenBlueYellowCyanMagentaWhite = 0x8a,
    /// Red crossfade effect
    CrossfadeRed = 0x8b,
    /// Green crossfade effect
    CrossfadeGreen = 0x8c,
    /// Blue crossfade effect
    CrossfadeBlue = 0x8d,
    /// Yellow crossfade effect
    CrossfadeYellow = 0x8e,
    /// Cyan crossfade effect
    CrossfadeCyan = 0x8f,
    /// Magenta crossfade effect
    CrossfadeMagenta = 0x90,
    /// White crossfade effect
    CrossfadeWhite = 0x91,
    /// Red and green crossfade effect
    CrossfadeRedGreen = 0x92,
    /// Red and blue crossfade effect
    CrossfadeRedBlue = 0x93,
    /// Green and blue crossfade effect
    CrossfadeGreenBlue = 0x94,
    /// All colors blink effect
    BlinkRedGreenBlueYellowCyanMagentaWhite = 0x95,
    /// Red blink effect
    BlinkRed = 0x96,
    /// Green blink effect
    BlinkGreen = 0x97,
    /// Blue blink effect
    BlinkBlue = 0x98,
    /// Yellow blink effect
    BlinkYellow = 0x99,
    /// Cyan blink effect
    BlinkCyan = 0x9a,
    /// Magenta blink effect
    BlinkMagenta = 0x9b,
    /// White blink effect
    BlinkWhite = 0x9c,
}

/// Name used for "no effect" in names and front-ends
pub const NONE_NAME: &str = "none";

impl Effect {
    /// Every effect, in firmware id order
    pub const ALL: [Effect; 22] = [
        Effect::JumpRedGreenBlue,
        Effect::JumpRedGreenBlueYellowCyanMagentaWhite,
        Effect::CrossfadeRedGreenBlue,
        Effect::CrossfadeRedGreenBlueYellowCyanMagentaWhite,
        Effect::CrossfadeRed,
        Effect::CrossfadeGreen,
        Effect::CrossfadeBlue,
        Effect::CrossfadeYellow,
        Effect::CrossfadeCyan,
        Effect::CrossfadeMagenta,
        Effect::CrossfadeWhite,
        Effect::CrossfadeRedGreen,
        Effect::CrossfadeRedBlue,
        Effect::CrossfadeGreenBlue,
        Effect::BlinkRedGreenBlueYellowCyanMagentaWhite,
        Effect::BlinkRed,
        Effect::BlinkGreen,
        Effect::BlinkBlue,
        Effect::BlinkYellow,
        Effect::BlinkCyan,
        Effect::BlinkMagenta,
        Effect::BlinkWhite,
    ];

    /// Firmware id sent in the effect frame
    pub const fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Effect> {
        Self::ALL.into_iter().find(|e| e.id() == id)
    }

    pub fn from_name(name: &str) -> Option<Effect> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }

    /// Snake case name
    pub const fn name(self) -> &'static str {
        match self {
            Effect::JumpRedGreenBlue => "jump_red_green_blue",
            Effect::JumpRedGreenBlueYellowCyanMagentaWhite => {
                "jump_red_green_blue_yellow_cyan_magenta_white"
            }
            Effect::CrossfadeRedGreenBlue => "crossfade_red_green_blue",
            Effect::CrossfadeRedGreenBlueYellowCyanMagentaWhite => {
                "crossfade_red_green_blue_yellow_cyan_magenta_white"
            }
            Effect::CrossfadeRed => "crossfade_red",
            Effect::CrossfadeGreen => "crossfade_green",
            Effect::CrossfadeBlue => "crossfade_blue",
            Effect::CrossfadeYellow => "crossfade_yellow",
            Effect::CrossfadeCyan => "crossfade_cyan",
            Effect::CrossfadeMagenta => "crossfade_magenta",
            Effect::CrossfadeWhite => "crossfade_white",
            Effect::CrossfadeRedGreen => "crossfade_red_green",
            Effect::CrossfadeRedBlue => "crossfade_red_blue",
            Effect::CrossfadeGreenBlue => "crossfade_green_blue",
            Effect::BlinkRedGreenBlueYellowCyanMagentaWhite => {
                "blink_red_green_blue_yellow_cyan_magenta_white"
            }
            Effect::BlinkRed => "blink_red",
            Effect::BlinkGreen => "blink_green",
            Effect::BlinkBlue => "blink_blue",
            Effect::BlinkYellow => "blink_yellow",
            Effect::BlinkCyan => "blink_cyan",
            Effect::BlinkMagenta => "blink_magenta",
            Effect::BlinkWhite => "blink_white",
        }
    }

    /// Short human label for front-ends
    pub const fn label(self) -> &'static str {
        match self {
            Effect::JumpRedGreenBlue => "Jump RGB",
            Effect::JumpRedGreenBlueYellowCyanMagentaWhite => "Jump All",
            Effect::CrossfadeRedGreenBlue => "Fade RGB",
            Effect::CrossfadeRedGreenBlueYellowCyanMagentaWhite => "Smooth Cycle",
            Effect::CrossfadeRed => "Fade Red",
            Effect::CrossfadeGreen => "Fade Green",
            Effect::CrossfadeBlue => "Fade Blue",
            Effect::CrossfadeYellow => "Fade Yellow",
            Effect::CrossfadeCyan => "Fade Cyan",
            Effect::CrossfadeMagenta => "Fade Magenta",
            Effect::CrossfadeWhite => "Fade White",
            Effect::CrossfadeRedGreen => "Fade R-G",
            Effect::CrossfadeRedBlue => "Fade R-B",
            Effect::CrossfadeGreenBlue => "Fade G-B",
            Effect::BlinkRedGreenBlueYellowCyanMagentaWhite => "Blink All",
            Effect::BlinkRed => "Blink Red",
            Effect::BlinkGreen => "Blink Green",
            Effect::BlinkBlue => "Blink Blue",
            Effect::BlinkYellow => "Blink Yellow",
            Effect::BlinkCyan => "Blink Cyan",
            Effect::BlinkMagenta => "Blink Magenta",
            Effect::BlinkWhite => "Blink White",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parses an effect selector: a catalogue name, `none`, or a numeric id
/// (decimal or `0x` hex). `Ok(None)` means static color.
pub fn parse_selector(input: &str) -> Result<Option<u8>, String> {
    let input = input.trim();
    if input.eq_ignore_ascii_case(NONE_NAME) {
        return Ok(None);
    }
    if let Some(effect) = Effect::from_name(&input.to_ascii_lowercase()) {
        return Ok(Some(effect.id()));
    }

    let id = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => u8::from_str(input),
    }
    .map_err(|_| format!("unknown effect: {input}"))?;

    Ok((id != 0).then_some(id))
}
