//! Main loop: controller reports in, virtual controller updates out
//!
//! Owns the emulation sink and the edge tracker, reads the session
//! currently published in the [`SessionCell`] and routes rumble requests
//! from the sink back to the physical controller.

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::commands::{CommandRunner, EdgeTracker};
use crate::emulation::EmulationSink;
use crate::session::{DeviceSession, SessionError};
use crate::state::{LogicalControllerState, VibrationCommand};
use crate::supervisor::{Presence, SessionCell};

pub struct Bridge {
    cell: SessionCell,
    sink: Box<dyn EmulationSink>,
    runner: CommandRunner,
    edges: EdgeTracker,
    vibration_rx: mpsc::UnboundedReceiver<VibrationCommand>,
    forwarded: u64,
}

impl Bridge {
    pub fn new(
        cell: SessionCell,
        sink: Box<dyn EmulationSink>,
        runner: CommandRunner,
        vibration_rx: mpsc::UnboundedReceiver<VibrationCommand>,
    ) -> Self {
        Self {
            cell,
            sink,
            runner,
            edges: EdgeTracker::new(),
            vibration_rx,
            forwarded: 0,
        }
    }

    /// Run until `shutdown` resolves or a fatal error occurs
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        info!("Forwarding controller to sink '{}'", self.sink.name());
        let mut waiting_logged = false;

        loop {
            let session = match self.cell.presence() {
                Presence::Open(session) => {
                    waiting_logged = false;
                    session
                },
                Presence::Faulted(err) => {
                    anyhow::bail!("controller discovery stopped: {}", err);
                },
                Presence::NoDevice => {
                    if !waiting_logged {
                        info!("⏳ Waiting for controller...");
                        waiting_logged = true;
                    }

                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = self.cell.wait_for_device() => {},
                        Some(command) = self.vibration_rx.recv() => {
                            debug!("No controller, dropping vibration {:?}", command);
                        }
                    }
                    continue;
                },
            };

            tokio::select! {
                _ = &mut shutdown => break,
                result = session.read() => self.on_read(&session, result)?,
                Some(command) = self.vibration_rx.recv() => {
                    session
                        .write(command)
                        .with_context(|| format!("Failed to send vibration to {}", session.identity()))?;
                }
            }
        }

        info!("Bridge stopped after {} forwarded report(s)", self.forwarded);
        Ok(())
    }

    fn on_read(
        &mut self,
        session: &Arc<DeviceSession>,
        result: Result<LogicalControllerState, SessionError>,
    ) -> Result<()> {
        match result {
            Ok(state) => self.forward(&state),
            Err(SessionError::Retryable(e)) => {
                trace!("Skipping report: {}", e);
                Ok(())
            },
            Err(SessionError::Disconnected { reason }) => {
                if self.cell.clear_session(session) {
                    info!("🔌 Controller {} disconnected ({})", session.identity(), reason);
                }
                Ok(())
            },
            Err(e @ SessionError::Fatal(_)) => Err(e).context("Controller session failed"),
        }
    }

    fn forward(&mut self, state: &LogicalControllerState) -> Result<()> {
        self.sink
            .update(state)
            .with_context(|| format!("Sink '{}' rejected controller state", self.sink.name()))?;
        self.forwarded += 1;

        for edge in self.edges.update(state) {
            self.runner
                .run(edge)
                .with_context(|| format!("Failed to start command for {}", edge.button))?;
        }

        Ok(())
    }
}
