//! Normalized controller state
//!
//! [`LogicalControllerState`] is what the report codec produces and what the
//! emulation sink consumes. It knows nothing about the Stadia wire format nor
//! about the XUSB layout of the virtual controller.

use serde::Serialize;
use std::fmt;

/// Standard buttons shared by the physical and the emulated controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Button {
    Up,
    Down,
    Left,
    Right,
    Start,
    Back,
    LeftThumbClick,
    RightThumbClick,
    LeftShoulder,
    RightShoulder,
    Guide,
    A,
    B,
    X,
    Y,
}

impl Button {
    /// Every button, in bit order of [`Buttons`]
    pub const ALL: [Button; 15] = [
        Button::Up,
        Button::Down,
        Button::Left,
        Button::Right,
        Button::Start,
        Button::Back,
        Button::LeftThumbClick,
        Button::RightThumbClick,
        Button::LeftShoulder,
        Button::RightShoulder,
        Button::Guide,
        Button::A,
        Button::B,
        Button::X,
        Button::Y,
    ];

    fn bit(self) -> u16 {
        1 << (self as u16)
    }

    /// Short name used in logs and the sniffer output
    pub fn name(self) -> &'static str {
        match self {
            Button::Up => "up",
            Button::Down => "down",
            Button::Left => "left",
            Button::Right => "right",
            Button::Start => "start",
            Button::Back => "back",
            Button::LeftThumbClick => "l3",
            Button::RightThumbClick => "r3",
            Button::LeftShoulder => "lb",
            Button::RightShoulder => "rb",
            Button::Guide => "guide",
            Button::A => "a",
            Button::B => "b",
            Button::X => "x",
            Button::Y => "y",
        }
    }
}

/// Buttons without an Xbox 360 equivalent, surfaced separately
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraButton {
    Assistant,
    Capture,
}

impl fmt::Display for ExtraButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtraButton::Assistant => write!(f, "Assistant"),
            ExtraButton::Capture => write!(f, "Capture"),
        }
    }
}

/// Set of pressed [`Button`]s
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Buttons(u16);

impl Buttons {
    pub const fn empty() -> Self {
        Buttons(0)
    }

    pub fn insert(&mut self, button: Button) {
        self.0 |= button.bit();
    }

    /// Insert `button` when `pressed` is true
    pub fn set(&mut self, button: Button, pressed: bool) {
        if pressed {
            self.insert(button);
        }
    }

    pub fn contains(&self, button: Button) -> bool {
        self.0 & button.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Button> + '_ {
        Button::ALL.into_iter().filter(|b| self.contains(*b))
    }
}

impl fmt::Debug for Buttons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<Button> for Buttons {
    fn from_iter<I: IntoIterator<Item = Button>>(iter: I) -> Self {
        let mut buttons = Buttons::empty();
        for button in iter {
            buttons.insert(button);
        }
        buttons
    }
}

impl Serialize for Buttons {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// Analog stick position, center at (0, 0), Y up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Stick {
    pub x: i16,
    pub y: i16,
}

impl Stick {
    pub const fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }
}

/// Decoded snapshot of one input report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct LogicalControllerState {
    pub buttons: Buttons,
    pub assistant_pressed: bool,
    pub capture_pressed: bool,
    pub left_stick: Stick,
    pub right_stick: Stick,
    pub left_trigger: u8,
    pub right_trigger: u8,
}

impl LogicalControllerState {
    /// Current value of one of the out-of-band buttons
    pub fn extra(&self, button: ExtraButton) -> bool {
        match button {
            ExtraButton::Assistant => self.assistant_pressed,
            ExtraButton::Capture => self.capture_pressed,
        }
    }
}

/// Rumble intensities requested by the emulated controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VibrationCommand {
    pub large_motor: u8,
    pub small_motor: u8,
}
