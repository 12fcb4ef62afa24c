//! Device session: one open controller
//!
//! A dedicated thread pumps blocking HID reads into a bounded
//! [`ReportQueue`]; [`DeviceSession::read`] awaits the next report and
//! decodes it. Closing the session stops the pump within one read slice.

pub mod queue;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::hid::{DeviceIdentity, HidError, HidHandle};
use crate::report::{self, DecodeError};
use crate::state::{LogicalControllerState, VibrationCommand};

pub use queue::{OverflowPolicy, PushOutcome, ReportQueue};

/// Reports larger than this are truncated by the read pump
const MAX_REPORT_LEN: usize = 512;

/// Reason recorded when the session is closed locally
const CLOSED_REASON: &str = "device closed";

/// Session failures, classified by what the caller should do next
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Unusable report on a live device; keep the session
    #[error("unable to parse controller report: {0}")]
    Retryable(#[from] DecodeError),

    /// Read stream ended; drop the session and rescan
    #[error("controller disconnected: {reason}")]
    Disconnected { reason: String },

    /// Output path broken
    #[error("cannot write to controller: {0}")]
    Fatal(#[source] HidError),
}

/// Tunables for a session
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Length of one blocking read slice; also bounds how long a close or a
    /// rumble write waits for the pump to let go of the device
    pub read_timeout_ms: i32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 30,
            overflow: OverflowPolicy::DropNewest,
            read_timeout_ms: 10,
        }
    }
}

/// An open physical controller
pub struct DeviceSession {
    identity: DeviceIdentity,
    handle: Arc<dyn HidHandle>,
    queue: Arc<ReportQueue>,
    cancel: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl DeviceSession {
    /// Wrap an open handle and start its read pump
    pub fn start(
        identity: DeviceIdentity,
        handle: Arc<dyn HidHandle>,
        options: SessionOptions,
    ) -> Result<Self, HidError> {
        let queue = Arc::new(ReportQueue::new(options.queue_capacity, options.overflow));
        let cancel = Arc::new(AtomicBool::new(false));

        let pump = {
            let handle = handle.clone();
            let queue = queue.clone();
            let cancel = cancel.clone();
            std::thread::Builder::new()
                .name("stadia-read-pump".to_string())
                .spawn(move || read_pump(handle, queue, cancel, options.read_timeout_ms))
                .map_err(|e| HidError::Io(format!("cannot spawn read pump: {e}")))?
        };

        debug!("Read pump started for {}", identity);

        Ok(Self {
            identity,
            handle,
            queue,
            cancel,
            pump: Mutex::new(Some(pump)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Await and decode the next report
    pub async fn read(&self) -> Result<LogicalControllerState, SessionError> {
        let raw = self.read_raw().await?;
        report::decode(&raw).map_err(|e| {
            warn!("Unable to parse controller report: {}", e);
            SessionError::Retryable(e)
        })
    }

    /// Await the next report as received, report-ID prefix removed
    pub async fn read_raw(&self) -> Result<Vec<u8>, SessionError> {
        if self.is_closed() {
            return Err(self.disconnected());
        }

        match self.queue.pop().await {
            Some(raw) => {
                trace!("Report: {}", hex::encode(&raw));
                Ok(raw)
            },
            None => {
                let err = self.disconnected();
                if !self.closed.swap(true, Ordering::AcqRel) {
                    warn!("Unable to read from controller: {}", err);
                    self.stop_pump();
                }
                Err(err)
            },
        }
    }

    /// Send a rumble command to the controller
    pub fn write(&self, command: VibrationCommand) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Fatal(HidError::Io(CLOSED_REASON.to_string())));
        }

        let packet = report::vibration_report(command);
        let data = match self.handle.output_report_len() {
            Some(len) => {
                let mut padded = vec![0u8; len];
                let n = packet.len().min(len);
                padded[..n].copy_from_slice(&packet[..n]);
                padded
            },
            None => packet.to_vec(),
        };

        self.handle.write(&data).map_err(SessionError::Fatal)?;
        trace!("Vibration sent: {:?}", command);
        Ok(())
    }

    /// Stop the pump and release the device; safe to call repeatedly
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("Closing controller {}", self.identity);
        }
        self.stop_pump();
    }

    /// Reports discarded because the consumer fell behind
    pub fn dropped_reports(&self) -> u64 {
        self.queue.dropped()
    }

    fn disconnected(&self) -> SessionError {
        SessionError::Disconnected {
            reason: self
                .queue
                .close_reason()
                .unwrap_or_else(|| CLOSED_REASON.to_string()),
        }
    }

    fn stop_pump(&self) {
        self.cancel.store(true, Ordering::Release);
        self.queue.close(None);

        let Some(pump) = self.pump.lock().take() else {
            return;
        };

        let identity = self.identity.clone();
        let queue = self.queue.clone();
        let join = move || {
            if pump.join().is_err() {
                warn!("Read pump for {} panicked", identity);
            }
            let dropped = queue.dropped();
            if dropped > 0 {
                debug!("{} report(s) dropped by the {:?} policy", dropped, queue.policy());
            }
        };

        // The pump exits within one read slice; never wait for it on an async worker
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(join);
            },
            Err(_) => join(),
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Blocking read loop, runs on its own thread until cancelled or the device fails
fn read_pump(
    handle: Arc<dyn HidHandle>,
    queue: Arc<ReportQueue>,
    cancel: Arc<AtomicBool>,
    read_timeout_ms: i32,
) {
    let mut buf = [0u8; MAX_REPORT_LEN];

    while !cancel.load(Ordering::Acquire) {
        match handle.read_timeout(&mut buf, read_timeout_ms) {
            Ok(0) => continue,
            Ok(n) => {
                let report = strip_report_id(&buf[..n]);
                match queue.push(report.to_vec()) {
                    PushOutcome::Queued => {},
                    PushOutcome::DroppedNewest | PushOutcome::DroppedOldest => {
                        trace!("Report queue full, dropped one report");
                    },
                    PushOutcome::Closed => break,
                }
            },
            Err(e) => {
                queue.close(Some(e.to_string()));
                return;
            },
        }
    }

    queue.close(Some(CLOSED_REASON.to_string()));
}

/// Platforms without numbered reports prefix a zero byte
fn strip_report_id(report: &[u8]) -> &[u8] {
    match report {
        [0, rest @ ..] if !rest.is_empty() => rest,
        _ => report,
    }
}
