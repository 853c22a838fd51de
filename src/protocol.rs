/*!
 # Wire protocol

 Every command is a fixed 9-byte frame:
 `[0x7e, module, sub_cmd, p1, p2, p3, p4, 0x00, 0xef]`.
 The builders here do no validation beyond what their argument types enforce;
 callers clamp values before encoding.
*/

/// A single command buffer written to the write characteristic
pub type Frame = [u8; 9];

/// First byte of every frame
pub const HEADER: u8 = 0x7e;
/// Last byte of every frame
pub const TERMINATOR: u8 = 0xef;

const SUB_SPEED: u8 = 0x02;
const SUB_EFFECT: u8 = 0x03;
const SUB_COLOR: u8 = 0x05;
const MODULE_BRIGHTNESS: u8 = 0x04;
const COLOR_MARKER: u8 = 0x03;
const EFFECT_MARKER: u8 = 0x03;

/// Builds a frame from the six variable bytes
pub const fn frame(module: u8, sub_cmd: u8, p1: u8, p2: u8, p3: u8, p4: u8) -> Frame {
    [HEADER, module, sub_cmd, p1, p2, p3, p4, 0x00, TERMINATOR]
}

/// Static color frame. The channels are sent as given, so brightness scaling
/// has to happen before this call.
pub const fn color(r: u8, g: u8, b: u8) -> Frame {
    frame(0x00, SUB_COLOR, COLOR_MARKER, r, g, b)
}

/// Native brightness frame carrying a 0-100 percentage
pub const fn native_brightness(percent: u8) -> Frame {
    frame(MODULE_BRIGHTNESS, 0x01, percent, 0xff, 0x00, 0xff)
}

/// Selects a firmware effect
pub const fn effect(id: u8) -> Frame {
    frame(0x00, SUB_EFFECT, id, EFFECT_MARKER, 0x00, 0x00)
}

/// Sets the animation speed (1-31)
pub const fn effect_speed(speed: u8) -> Frame {
    frame(0x00, SUB_SPEED, speed, EFFECT_MARKER, 0x00, 0x00)
}

/// Renders a frame as space separated hex for logs
pub fn to_hex(frame: &Frame) -> String {
    frame
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
