//! HID sniffer for debugging controller reports
//!
//! `--list-devices` prints what hidapi enumerates; `--sniff` prints every
//! report of the controller as hex next to its decoded state.

use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::hid::{DeviceMatcher, HidBackend};
use crate::report::{self, DecodeError};
use crate::session::SessionError;
use crate::state::LogicalControllerState;
use crate::supervisor::{Presence, SessionCell, Supervisor, SupervisorOptions};

/// List all HID devices, highlighting those the bridge would open
pub fn list_devices_formatted(backend: &dyn HidBackend, matcher: DeviceMatcher) -> Result<()> {
    println!("\n{}", "=== HID Devices ===".bold().cyan());

    let devices = backend.list_devices().context("Failed to enumerate HID devices")?;
    if devices.is_empty() {
        println!("  {}", "No HID devices found".dimmed());
        return Ok(());
    }

    let mut matching = 0;
    for device in &devices {
        if matcher.matches(device) {
            matching += 1;
            println!("  {} {}", "[MATCH]".bright_green(), device.to_string().bright_white());
        } else {
            println!("  {} {}", "       ".normal(), device.to_string().dimmed());
        }
    }

    println!(
        "\n{} device(s), {} matching {:04X}:{:04X}",
        devices.len(),
        matching.to_string().green(),
        matcher.vendor_id,
        matcher.product_id
    );

    Ok(())
}

/// One sniffed report, as printed with `--json`
#[derive(Debug, Serialize)]
pub struct SniffRecord<'a> {
    pub timestamp_ms: u64,
    pub raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<&'a LogicalControllerState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<'a> SniffRecord<'a> {
    pub fn new(
        timestamp_ms: u64,
        raw: &[u8],
        decoded: &'a Result<LogicalControllerState, DecodeError>,
    ) -> Self {
        Self {
            timestamp_ms,
            raw: hex::encode(raw),
            state: decoded.as_ref().ok(),
            error: decoded.as_ref().err().map(|e| e.to_string()),
        }
    }
}

/// Human readable line for one report
pub fn format_report(
    timestamp_ms: u64,
    raw: &[u8],
    decoded: &Result<LogicalControllerState, DecodeError>,
) -> String {
    let hex = hex::encode_upper(raw);

    match decoded {
        Ok(state) => {
            let mut pressed: Vec<String> = state.buttons.iter().map(|b| b.name().to_string()).collect();
            if state.assistant_pressed {
                pressed.push("assistant".to_string());
            }
            if state.capture_pressed {
                pressed.push("capture".to_string());
            }

            format!(
                "[{}ms] {} => [{}] L=({}, {}) R=({}, {}) LT={} RT={}",
                format!("{:08}", timestamp_ms).dimmed(),
                hex.bright_yellow(),
                pressed.join(" ").bright_blue(),
                state.left_stick.x,
                state.left_stick.y,
                state.right_stick.x,
                state.right_stick.y,
                state.left_trigger,
                state.right_trigger,
            )
        },
        Err(e) => format!(
            "[{}ms] {} => {}",
            format!("{:08}", timestamp_ms).dimmed(),
            hex.bright_black(),
            e.to_string().red()
        ),
    }
}

/// Print controller reports until `shutdown` resolves
///
/// Follows unplug/replug through the regular supervisor.
pub async fn run_sniffer(
    backend: Arc<dyn HidBackend>,
    options: SupervisorOptions,
    json: bool,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    tokio::pin!(shutdown);

    if !json {
        println!("{}", "=== Stadia Controller Sniffer ===".bold().cyan());
        println!("Press Ctrl+C to exit\n");
        println!("{}", "Format: [timestamp] HEX => BUTTONS AXES TRIGGERS".dimmed());
        println!("{}\n", "─".repeat(80).dimmed());
    }

    let cell = SessionCell::new();
    let supervisor = Supervisor::new(backend, cell.clone(), options).spawn();
    let start_time = Instant::now();

    let result = loop {
        let session = match cell.presence() {
            Presence::Open(session) => session,
            Presence::Faulted(err) => break Err(anyhow::anyhow!("HID enumeration failed: {}", err)),
            Presence::NoDevice => {
                tokio::select! {
                    _ = &mut shutdown => break Ok(()),
                    _ = cell.wait_for_device() => continue,
                }
            },
        };

        let raw = tokio::select! {
            _ = &mut shutdown => break Ok(()),
            raw = session.read_raw() => raw,
        };

        match raw {
            Ok(raw) => {
                let timestamp_ms = start_time.elapsed().as_millis() as u64;
                let decoded = report::decode(&raw);
                if json {
                    match serde_json::to_string(&SniffRecord::new(timestamp_ms, &raw, &decoded)) {
                        Ok(line) => println!("{}", line),
                        Err(e) => break Err(e.into()),
                    }
                } else {
                    println!("{}", format_report(timestamp_ms, &raw, &decoded));
                }
            },
            Err(SessionError::Disconnected { reason }) => {
                cell.clear_session(&session);
                if !json {
                    println!("{} {}", "Controller disconnected:".yellow(), reason);
                }
            },
            Err(e) => break Err(e.into()),
        }
    };

    supervisor.abort();
    if let Some(session) = cell.current() {
        cell.clear_session(&session);
    }

    if !json {
        println!("\n{}", "Sniffer stopped".yellow());
    }
    result
}
