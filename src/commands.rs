//! Edge-triggered commands for the Assistant and Capture buttons
//!
//! Neither button exists on an Xbox 360 controller, so instead of being
//! forwarded their press/release edges can run a shell command.

use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::state::{ExtraButton, LogicalControllerState};

/// A press or release of an out-of-band button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEdge {
    pub button: ExtraButton,
    pub pressed: bool,
}

/// Remembers the previous value of each extra button
#[derive(Debug, Default)]
pub struct EdgeTracker {
    assistant: bool,
    capture: bool,
}

impl EdgeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Edges between the previous state and `state`, Assistant first
    pub fn update(&mut self, state: &LogicalControllerState) -> Vec<ButtonEdge> {
        let mut edges = Vec::new();

        for (button, previous) in [
            (ExtraButton::Assistant, &mut self.assistant),
            (ExtraButton::Capture, &mut self.capture),
        ] {
            let pressed = state.extra(button);
            if *previous != pressed {
                *previous = pressed;
                edges.push(ButtonEdge { button, pressed });
            }
        }

        edges
    }
}

/// Commands bound to the extra buttons
#[derive(Debug, Clone, Default)]
pub struct ButtonCommands {
    pub assistant_pressed: Option<String>,
    pub assistant_released: Option<String>,
    pub capture_pressed: Option<String>,
    pub capture_released: Option<String>,
}

impl ButtonCommands {
    /// Command for an edge, ignoring empty strings
    pub fn command_for(&self, edge: ButtonEdge) -> Option<&str> {
        let command = match (edge.button, edge.pressed) {
            (ExtraButton::Assistant, true) => &self.assistant_pressed,
            (ExtraButton::Assistant, false) => &self.assistant_released,
            (ExtraButton::Capture, true) => &self.capture_pressed,
            (ExtraButton::Capture, false) => &self.capture_released,
        };

        command.as_deref().filter(|cmd| !cmd.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        [
            &self.assistant_pressed,
            &self.assistant_released,
            &self.capture_pressed,
            &self.capture_released,
        ]
        .iter()
        .all(|cmd| cmd.as_deref().map_or(true, |c| c.trim().is_empty()))
    }
}

/// Shell used when none is configured
pub fn default_shell() -> &'static str {
    if cfg!(windows) {
        "cmd"
    } else {
        "sh"
    }
}

/// Runs the command bound to each edge through a shell
pub struct CommandRunner {
    shell: String,
    commands: ButtonCommands,
}

impl CommandRunner {
    pub fn new(shell: Option<String>, commands: ButtonCommands) -> Self {
        Self {
            shell: shell.unwrap_or_else(|| default_shell().to_string()),
            commands,
        }
    }

    /// Flag passing a command string to the shell
    fn command_flag(&self) -> &'static str {
        let shell = self.shell.to_ascii_lowercase();
        if shell.ends_with("cmd") || shell.ends_with("cmd.exe") {
            "/C"
        } else if shell.contains("pwsh") || shell.contains("powershell") {
            "-Command"
        } else {
            "-c"
        }
    }

    /// Spawn the command bound to `edge`, if any
    ///
    /// Only a spawn failure is an error; the exit status is checked in the
    /// background and logged.
    pub fn run(&self, edge: ButtonEdge) -> std::io::Result<bool> {
        let Some(command) = self.commands.command_for(edge) else {
            debug!("No command bound to {} {}", edge.button, action(edge));
            return Ok(false);
        };

        info!("{} {}: running '{}'", edge.button, action(edge), command);

        let mut child = Command::new(&self.shell)
            .arg(self.command_flag())
            .arg(command)
            .stdin(Stdio::null())
            .spawn()?;

        let description = format!("{} {} {:?}", self.shell, self.command_flag(), command);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!("Command '{}' finished", description),
                Ok(status) => warn!("Command '{}' failed: {}", description, status),
                Err(e) => warn!("Command '{}' failed: {}", description, e),
            }
        });

        Ok(true)
    }
}

fn action(edge: ButtonEdge) -> &'static str {
    if edge.pressed {
        "pressed"
    } else {
        "released"
    }
}
