//! Command-line configuration
//!
//! Everything is process-lifetime: flags and environment variables (a
//! `.env` file is honored by the binary), nothing is persisted.

use anyhow::Result;
use clap::Parser;
use std::time::Duration;

use crate::commands::ButtonCommands;
use crate::hid::{DeviceMatcher, STADIA_PRODUCT_ID, STADIA_VENDOR_ID};
use crate::session::{OverflowPolicy, SessionOptions};
use crate::supervisor::{EnumerationPolicy, SupervisorOptions};

/// Stadia GW - Use a Stadia controller as a virtual Xbox 360 controller
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Milliseconds between scans while no controller is open
    #[arg(long, env = "STADIA_SCAN_INTERVAL_MS", default_value_t = 1000)]
    pub scan_interval_ms: u64,

    /// Reports buffered between the device and the virtual controller
    #[arg(long, default_value_t = 30)]
    pub queue_capacity: usize,

    /// What to discard when the report buffer is full
    #[arg(long, value_enum, default_value_t = OverflowPolicy::DropNewest)]
    pub overflow: OverflowPolicy,

    /// What to do when HID enumeration fails
    #[arg(long, value_enum, default_value_t = EnumerationPolicy::Permanent)]
    pub enumeration: EnumerationPolicy,

    /// USB vendor id to look for (hex)
    #[arg(long, value_parser = parse_hex_u16, default_value = "18D1")]
    pub vendor_id: u16,

    /// USB product id to look for (hex)
    #[arg(long, value_parser = parse_hex_u16, default_value = "9400")]
    pub product_id: u16,

    /// Ask for exclusive access to the controller where supported
    #[arg(long)]
    pub exclusive: bool,

    /// Shell used to run button commands (default: cmd on Windows, sh elsewhere)
    #[arg(long, env = "STADIA_SHELL")]
    pub shell: Option<String>,

    /// Command run when the Assistant button is pressed
    #[arg(long, env = "STADIA_ASSISTANT_PRESSED")]
    pub assistant_pressed: Option<String>,

    /// Command run when the Assistant button is released
    #[arg(long, env = "STADIA_ASSISTANT_RELEASED")]
    pub assistant_released: Option<String>,

    /// Command run when the Capture button is pressed
    #[arg(long, env = "STADIA_CAPTURE_PRESSED")]
    pub capture_pressed: Option<String>,

    /// Command run when the Capture button is released
    #[arg(long, env = "STADIA_CAPTURE_RELEASED")]
    pub capture_released: Option<String>,

    /// Log controller states instead of driving a virtual controller
    #[arg(long)]
    pub dry_run: bool,

    /// List HID devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Print raw and decoded controller reports
    #[arg(long)]
    pub sniff: bool,

    /// Print decoded reports as JSON (with --sniff)
    #[arg(long, requires = "sniff")]
    pub json: bool,
}

impl Args {
    /// Reject values that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_ms == 0 {
            anyhow::bail!("--scan-interval-ms must be greater than 0");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("--queue-capacity must be greater than 0");
        }
        if let Some(shell) = &self.shell {
            if shell.trim().is_empty() {
                anyhow::bail!("--shell cannot be empty");
            }
        }
        Ok(())
    }

    pub fn matcher(&self) -> DeviceMatcher {
        DeviceMatcher {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            queue_capacity: self.queue_capacity,
            overflow: self.overflow,
            ..SessionOptions::default()
        }
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            matcher: self.matcher(),
            scan_interval: Duration::from_millis(self.scan_interval_ms),
            exclusive: self.exclusive,
            enumeration: self.enumeration,
            session: self.session_options(),
        }
    }

    pub fn button_commands(&self) -> ButtonCommands {
        ButtonCommands {
            assistant_pressed: self.assistant_pressed.clone(),
            assistant_released: self.assistant_released.clone(),
            capture_pressed: self.capture_pressed.clone(),
            capture_released: self.capture_released.clone(),
        }
    }

    /// True when the ids differ from a stock Stadia controller
    pub fn custom_identity(&self) -> bool {
        self.vendor_id != STADIA_VENDOR_ID || self.product_id != STADIA_PRODUCT_ID
    }
}

/// Parse a USB id written in hex, with or without a `0x` prefix
pub fn parse_hex_u16(value: &str) -> Result<u16, String> {
    let digits = value
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");

    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex id '{}': {}", value, e))
}
