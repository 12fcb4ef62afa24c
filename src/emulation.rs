//! Emulation sinks - where decoded controller states go
//!
//! The production sink drives a virtual Xbox 360 controller through ViGEmBus
//! (Windows only). [`ConsoleSink`] logs states instead, for dry runs and
//! platforms without ViGEm.

#[cfg(windows)]
pub mod vigem;

use tracing::{debug, info};

use crate::state::{Button, LogicalControllerState};

#[cfg(windows)]
pub use vigem::VigemSink;

/// Sink failures; the bridge treats all of them as fatal
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("cannot connect to the virtual controller bus: {0}")]
    Connect(String),

    #[error("cannot update the virtual controller: {0}")]
    Update(String),
}

/// Receives every decoded state in read order
pub trait EmulationSink: Send {
    fn name(&self) -> &str;

    fn update(&mut self, state: &LogicalControllerState) -> Result<(), SinkError>;
}

/// XUSB button bit flags
///
/// Same values as the XInput `wButtons` field.
pub mod xusb_buttons {
    pub const DPAD_UP: u16 = 0x0001;
    pub const DPAD_DOWN: u16 = 0x0002;
    pub const DPAD_LEFT: u16 = 0x0004;
    pub const DPAD_RIGHT: u16 = 0x0008;
    pub const START: u16 = 0x0010;
    pub const BACK: u16 = 0x0020;
    pub const LEFT_THUMB: u16 = 0x0040;
    pub const RIGHT_THUMB: u16 = 0x0080;
    pub const LEFT_SHOULDER: u16 = 0x0100;
    pub const RIGHT_SHOULDER: u16 = 0x0200;
    pub const GUIDE: u16 = 0x0400;
    pub const A: u16 = 0x1000;
    pub const B: u16 = 0x2000;
    pub const X: u16 = 0x4000;
    pub const Y: u16 = 0x8000;
}

/// Xbox 360 wire report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XusbReport {
    pub buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub thumb_lx: i16,
    pub thumb_ly: i16,
    pub thumb_rx: i16,
    pub thumb_ry: i16,
}

impl XusbReport {
    fn button_flag(button: Button) -> u16 {
        use xusb_buttons::*;

        match button {
            Button::Up => DPAD_UP,
            Button::Down => DPAD_DOWN,
            Button::Left => DPAD_LEFT,
            Button::Right => DPAD_RIGHT,
            Button::Start => START,
            Button::Back => BACK,
            Button::LeftThumbClick => LEFT_THUMB,
            Button::RightThumbClick => RIGHT_THUMB,
            Button::LeftShoulder => LEFT_SHOULDER,
            Button::RightShoulder => RIGHT_SHOULDER,
            Button::Guide => GUIDE,
            Button::A => A,
            Button::B => B,
            Button::X => X,
            Button::Y => Y,
        }
    }
}

impl From<&LogicalControllerState> for XusbReport {
    fn from(state: &LogicalControllerState) -> Self {
        Self {
            buttons: state
                .buttons
                .iter()
                .fold(0, |acc, button| acc | Self::button_flag(button)),
            left_trigger: state.left_trigger,
            right_trigger: state.right_trigger,
            thumb_lx: state.left_stick.x,
            thumb_ly: state.left_stick.y,
            thumb_rx: state.right_stick.x,
            thumb_ry: state.right_stick.y,
        }
    }
}

/// ConsoleSink logs forwarded states
///
/// This is useful for:
/// - Checking the decoding without ViGEmBus installed
/// - Running on platforms without a virtual controller bus
pub struct ConsoleSink {
    name: String,
    last: Option<XusbReport>,
    update_count: u64,
}

impl ConsoleSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last: None,
            update_count: 0,
        }
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }
}

impl EmulationSink for ConsoleSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, state: &LogicalControllerState) -> Result<(), SinkError> {
        let report = XusbReport::from(state);
        self.update_count += 1;

        // Only log changes, the controller streams reports continuously
        if self.last != Some(report) {
            let pressed: Vec<_> = state.buttons.iter().map(Button::name).collect();
            info!(
                "🎮 [{}] buttons=[{}] L=({}, {}) R=({}, {}) LT={} RT={}",
                self.name,
                pressed.join(" "),
                report.thumb_lx,
                report.thumb_ly,
                report.thumb_rx,
                report.thumb_ry,
                report.left_trigger,
                report.right_trigger,
            );
        }
        debug!(sink = %self.name, update = self.update_count, raw_buttons = report.buttons, "ConsoleSink update");

        self.last = Some(report);
        Ok(())
    }
}
