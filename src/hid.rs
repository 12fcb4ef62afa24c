//! HID device access
//!
//! The session and the supervisor only talk to devices through
//! [`HidBackend`] and [`HidHandle`], so they run unchanged against the
//! `hidapi` implementation in [`hidapi_backend`] or a fake in tests.

pub mod hidapi_backend;

use std::fmt;
use std::sync::Arc;

pub use hidapi_backend::HidapiBackend;

/// Google vendor id
pub const STADIA_VENDOR_ID: u16 = 0x18D1;

/// Stadia controller product id
pub const STADIA_PRODUCT_ID: u16 = 0x9400;

/// HID layer failures
#[derive(Debug, thiserror::Error)]
pub enum HidError {
    #[error("cannot enumerate HID devices: {0}")]
    Enumeration(String),

    #[error("cannot open device {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("device I/O failed: {0}")]
    Io(String),
}

/// An enumerated device, enough to match and reopen it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Platform path used to open the device
    pub path: String,
    pub product: Option<String>,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04X}:{:04X} \"{}\" ({})",
            self.vendor_id,
            self.product_id,
            self.product.as_deref().unwrap_or("Unknown"),
            self.path
        )
    }
}

/// Vendor/product pair the supervisor looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMatcher {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceMatcher {
    pub fn matches(&self, identity: &DeviceIdentity) -> bool {
        identity.vendor_id == self.vendor_id && identity.product_id == self.product_id
    }
}

impl Default for DeviceMatcher {
    fn default() -> Self {
        Self {
            vendor_id: STADIA_VENDOR_ID,
            product_id: STADIA_PRODUCT_ID,
        }
    }
}

/// Device enumeration and opening
pub trait HidBackend: Send + Sync {
    /// List currently visible devices
    fn list_devices(&self) -> Result<Vec<DeviceIdentity>, HidError>;

    /// Open a device for reading and writing
    fn open(&self, identity: &DeviceIdentity, exclusive: bool)
        -> Result<Arc<dyn HidHandle>, HidError>;
}

/// One open device
pub trait HidHandle: Send + Sync {
    /// Read one input report, waiting at most `timeout_ms`
    ///
    /// Returns `Ok(0)` when nothing arrived in time.
    fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, HidError>;

    /// Send one output report
    fn write(&self, data: &[u8]) -> Result<usize, HidError>;

    /// Declared output report length (report id included), if known
    fn output_report_len(&self) -> Option<usize> {
        None
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory backend for session, supervisor and bridge tests

    use super::*;
    use parking_lot::{Condvar, Mutex};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted input for a [`FakeHandle`]
    #[derive(Debug)]
    pub enum Step {
        Report(Vec<u8>),
        Fail(String),
    }

    #[derive(Default)]
    struct HandleState {
        steps: VecDeque<Step>,
        written: Vec<Vec<u8>>,
        reads: usize,
        last_timeout_ms: Option<i32>,
    }

    /// Device handle fed from a script; reads block until a step is pushed
    #[derive(Default)]
    pub struct FakeHandle {
        state: Mutex<HandleState>,
        ready: Condvar,
        pub output_len: Option<usize>,
        pub fail_writes: bool,
    }

    impl FakeHandle {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn with_output_len(len: usize) -> Arc<Self> {
            Arc::new(Self {
                output_len: Some(len),
                ..Self::default()
            })
        }

        pub fn failing_writes() -> Arc<Self> {
            Arc::new(Self {
                fail_writes: true,
                ..Self::default()
            })
        }

        pub fn push(&self, step: Step) {
            self.state.lock().steps.push_back(step);
            self.ready.notify_all();
        }

        pub fn push_report(&self, report: &[u8]) {
            self.push(Step::Report(report.to_vec()));
        }

        pub fn written(&self) -> Vec<Vec<u8>> {
            self.state.lock().written.clone()
        }

        pub fn reads(&self) -> usize {
            self.state.lock().reads
        }

        /// Timeout passed to the most recent read
        pub fn last_timeout_ms(&self) -> Option<i32> {
            self.state.lock().last_timeout_ms
        }
    }

    impl HidHandle for FakeHandle {
        fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, HidError> {
            let mut state = self.state.lock();
            state.last_timeout_ms = Some(timeout_ms);
            if state.steps.is_empty() {
                let timeout = Duration::from_millis(timeout_ms.max(0) as u64);
                let _ = self.ready.wait_for(&mut state, timeout);
            }

            match state.steps.pop_front() {
                None => Ok(0),
                Some(Step::Report(report)) => {
                    state.reads += 1;
                    let n = report.len().min(buf.len());
                    buf[..n].copy_from_slice(&report[..n]);
                    Ok(n)
                },
                Some(Step::Fail(reason)) => {
                    state.reads += 1;
                    Err(HidError::Io(reason))
                },
            }
        }

        fn write(&self, data: &[u8]) -> Result<usize, HidError> {
            if self.fail_writes {
                return Err(HidError::Io("write rejected".to_string()));
            }
            self.state.lock().written.push(data.to_vec());
            Ok(data.len())
        }

        fn output_report_len(&self) -> Option<usize> {
            self.output_len
        }
    }

    /// Backend returning a fixed device list and handing out prepared handles
    pub struct FakeBackend {
        pub devices: Mutex<Result<Vec<DeviceIdentity>, String>>,
        pub handles: Mutex<VecDeque<Arc<FakeHandle>>>,
        pub fail_open: Mutex<bool>,
        pub enumerations: AtomicUsize,
        pub opens: AtomicUsize,
    }

    impl Default for FakeBackend {
        fn default() -> Self {
            Self {
                devices: Mutex::new(Ok(Vec::new())),
                handles: Mutex::default(),
                fail_open: Mutex::default(),
                enumerations: AtomicUsize::default(),
                opens: AtomicUsize::default(),
            }
        }
    }

    impl FakeBackend {
        pub fn with_devices(devices: Vec<DeviceIdentity>) -> Arc<Self> {
            let backend = Self::default();
            *backend.devices.lock() = Ok(devices);
            Arc::new(backend)
        }

        pub fn add_handle(&self, handle: Arc<FakeHandle>) {
            self.handles.lock().push_back(handle);
        }

        pub fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        pub fn enumerations(&self) -> usize {
            self.enumerations.load(Ordering::SeqCst)
        }
    }

    impl HidBackend for FakeBackend {
        fn list_devices(&self) -> Result<Vec<DeviceIdentity>, HidError> {
            self.enumerations.fetch_add(1, Ordering::SeqCst);
            self.devices.lock().clone().map_err(HidError::Enumeration)
        }

        fn open(
            &self,
            identity: &DeviceIdentity,
            _exclusive: bool,
        ) -> Result<Arc<dyn HidHandle>, HidError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if *self.fail_open.lock() {
                return Err(HidError::Open {
                    path: identity.path.clone(),
                    reason: "access denied".to_string(),
                });
            }
            let handle = self.handles.lock().pop_front().unwrap_or_else(FakeHandle::new);
            Ok(handle as Arc<dyn HidHandle>)
        }
    }

    pub fn stadia(path: &str) -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: STADIA_VENDOR_ID,
            product_id: STADIA_PRODUCT_ID,
            path: path.to_string(),
            product: Some("Stadia Controller".to_string()),
        }
    }

    pub fn other(path: &str) -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: 0x045E,
            product_id: 0x028E,
            path: path.to_string(),
            product: Some("Xbox 360 Controller".to_string()),
        }
    }
}
