//! Stadia HID report codec
//!
//! Turns raw input reports into [`LogicalControllerState`] and builds the
//! rumble output report. Pure functions, no I/O.
//!
//! Input report `0x03` layout (10+ bytes):
//!
//! | byte | content |
//! |------|---------|
//! | 0    | report id (`0x03`) |
//! | 1    | D-pad direction code (0..=7 clockwise from up, 8 = released) |
//! | 2    | R3, Back, Start, Guide, -, -, Assistant, Capture (MSB first) |
//! | 3    | -, A, B, X, Y, LB, RB, L3 (MSB first) |
//! | 4..8 | left X, left Y, right X, right Y |
//! | 8..10| left trigger, right trigger |

use crate::state::{Button, Buttons, LogicalControllerState, Stick, VibrationCommand};

/// Report id of the only recognized input report
pub const INPUT_REPORT_ID: u8 = 0x03;

/// Minimum length of an input report
pub const INPUT_REPORT_MIN_LEN: usize = 10;

/// Report id of the rumble output report
pub const VIBRATION_REPORT_ID: u8 = 0x05;

/// Report decoding failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("cannot decode empty report")]
    Empty,

    #[error("unknown report format; raw report was {}", hex::encode(.0))]
    UnknownFormat(Vec<u8>),
}

/// Bits of byte 2
mod system_bits {
    pub const RIGHT_THUMB: u8 = 0b1000_0000;
    pub const BACK: u8 = 0b0100_0000;
    pub const START: u8 = 0b0010_0000;
    pub const GUIDE: u8 = 0b0001_0000;
    pub const ASSISTANT: u8 = 0b0000_0010;
    pub const CAPTURE: u8 = 0b0000_0001;
}

/// Bits of byte 3
mod face_bits {
    pub const A: u8 = 0b0100_0000;
    pub const B: u8 = 0b0010_0000;
    pub const X: u8 = 0b0001_0000;
    pub const Y: u8 = 0b0000_1000;
    pub const LEFT_SHOULDER: u8 = 0b0000_0100;
    pub const RIGHT_SHOULDER: u8 = 0b0000_0010;
    pub const LEFT_THUMB: u8 = 0b0000_0001;
}

/// Decode one raw input report
pub fn decode(raw: &[u8]) -> Result<LogicalControllerState, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::Empty);
    }

    if raw[0] != INPUT_REPORT_ID || raw.len() < INPUT_REPORT_MIN_LEN {
        return Err(DecodeError::UnknownFormat(raw.to_vec()));
    }

    let (dpad, system, face) = (raw[1], raw[2], raw[3]);

    let mut buttons = dpad_buttons(dpad);

    let face_mappings = [
        (face_bits::A, Button::A),
        (face_bits::B, Button::B),
        (face_bits::X, Button::X),
        (face_bits::Y, Button::Y),
        (face_bits::LEFT_SHOULDER, Button::LeftShoulder),
        (face_bits::RIGHT_SHOULDER, Button::RightShoulder),
        (face_bits::LEFT_THUMB, Button::LeftThumbClick),
    ];
    for (bit, button) in face_mappings {
        buttons.set(button, face & bit != 0);
    }

    let system_mappings = [
        (system_bits::RIGHT_THUMB, Button::RightThumbClick),
        (system_bits::BACK, Button::Back),
        (system_bits::START, Button::Start),
        (system_bits::GUIDE, Button::Guide),
    ];
    for (bit, button) in system_mappings {
        buttons.set(button, system & bit != 0);
    }

    let [lx, ly, rx, ry] = [raw[4], raw[5], raw[6], raw[7]].map(remove_bias);

    Ok(LogicalControllerState {
        buttons,
        assistant_pressed: system & system_bits::ASSISTANT != 0,
        capture_pressed: system & system_bits::CAPTURE != 0,
        left_stick: Stick::new(x_axis(lx), y_axis(ly)),
        right_stick: Stick::new(x_axis(rx), y_axis(ry)),
        left_trigger: raw[8],
        right_trigger: raw[9],
    })
}

/// Build the rumble output report for the given motor intensities
pub fn vibration_report(command: VibrationCommand) -> [u8; 5] {
    let VibrationCommand {
        large_motor,
        small_motor,
    } = command;

    [
        VIBRATION_REPORT_ID,
        large_motor,
        large_motor,
        small_motor,
        small_motor,
    ]
}

/// D-pad direction code to buttons; anything outside 0..=7 is "released"
fn dpad_buttons(code: u8) -> Buttons {
    let directions: &[Button] = match code {
        0 => &[Button::Up],
        1 => &[Button::Up, Button::Right],
        2 => &[Button::Right],
        3 => &[Button::Right, Button::Down],
        4 => &[Button::Down],
        5 => &[Button::Down, Button::Left],
        6 => &[Button::Left],
        7 => &[Button::Left, Button::Up],
        _ => &[],
    };

    directions.iter().copied().collect()
}

/// The firmware centers the lower half of the range one step too high
fn remove_bias(value: u8) -> u8 {
    if value > 0x00 && value <= 0x7F {
        value - 1
    } else {
        value
    }
}

/// Widen a raw axis byte to the 16-bit range
fn widen_axis(value: u8) -> i32 {
    let value = value as i32;
    let wide = (value << 8) | ((value << 1) & 0b1111);

    if wide == 0xFFFE {
        0xFFFF
    } else {
        wide
    }
}

fn x_axis(value: u8) -> i16 {
    (widen_axis(value) - 0x8000) as i16
}

/// HID reports Y down, XUSB expects Y up
fn y_axis(value: u8) -> i16 {
    let y = -widen_axis(value) + 0x7FFF;

    if y == -1 {
        0
    } else {
        y as i16
    }
}
