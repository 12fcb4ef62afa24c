//! Stadia GW - Stadia controller to virtual Xbox 360 controller bridge
//!
//! Reads the Stadia controller over HID, decodes its reports and forwards
//! them to a virtual Xbox 360 controller; rumble flows back the other way.

pub mod bridge;
pub mod commands;
pub mod config;
pub mod emulation;
pub mod hid;
pub mod report;
pub mod session;
pub mod sniffer;
pub mod state;
pub mod supervisor;

pub use bridge::Bridge;
pub use config::Args;
pub use state::{LogicalControllerState, VibrationCommand};
