//! `hidapi` implementation of the HID capability traits

use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use std::ffi::CString;
use std::sync::Arc;
use tracing::trace;

use super::{DeviceIdentity, HidBackend, HidError, HidHandle};

/// HID backend on top of the system hidapi library
pub struct HidapiBackend {
    api: Mutex<HidApi>,
}

impl HidapiBackend {
    pub fn new() -> Result<Self, HidError> {
        let api = HidApi::new().map_err(|e| HidError::Enumeration(e.to_string()))?;
        Ok(Self {
            api: Mutex::new(api),
        })
    }
}

impl HidBackend for HidapiBackend {
    fn list_devices(&self) -> Result<Vec<DeviceIdentity>, HidError> {
        let mut api = self.api.lock();
        api.refresh_devices()
            .map_err(|e| HidError::Enumeration(e.to_string()))?;

        let devices: Vec<_> = api
            .device_list()
            .map(|info| DeviceIdentity {
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                path: info.path().to_string_lossy().into_owned(),
                product: info.product_string().map(str::to_string),
            })
            .collect();

        trace!("Enumerated {} HID device(s)", devices.len());
        Ok(devices)
    }

    fn open(
        &self,
        identity: &DeviceIdentity,
        exclusive: bool,
    ) -> Result<Arc<dyn HidHandle>, HidError> {
        let open_error = |reason: String| HidError::Open {
            path: identity.path.clone(),
            reason,
        };

        let path = CString::new(identity.path.as_str()).map_err(|e| open_error(e.to_string()))?;

        #[cfg_attr(not(target_os = "macos"), allow(unused_mut))]
        let mut api = self.api.lock();

        #[cfg(target_os = "macos")]
        api.set_open_exclusive(exclusive);

        #[cfg(not(target_os = "macos"))]
        if exclusive {
            tracing::debug!("Exclusive open not supported on this platform, opening shared");
        }

        let device = api.open_path(&path).map_err(|e| open_error(e.to_string()))?;

        let handle: Arc<dyn HidHandle> = Arc::new(HidapiHandle {
            device: Mutex::new(device),
        });
        Ok(handle)
    }
}

/// An open hidapi device
struct HidapiHandle {
    device: Mutex<HidDevice>,
}

impl HidHandle for HidapiHandle {
    fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, HidError> {
        self.device
            .lock()
            .read_timeout(buf, timeout_ms)
            .map_err(|e| HidError::Io(e.to_string()))
    }

    fn write(&self, data: &[u8]) -> Result<usize, HidError> {
        self.device
            .lock()
            .write(data)
            .map_err(|e| HidError::Io(e.to_string()))
    }
}
