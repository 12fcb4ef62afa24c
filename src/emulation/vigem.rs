//! ViGEmBus sink (Windows)
//!
//! Plugs a wired Xbox 360 target into the virtual bus and forwards rumble
//! notifications from the driver thread into a tokio channel, so device
//! writes never happen on the driver's callback thread.

use tokio::sync::mpsc;
use tracing::{info, trace};
use vigem_client::{Client, TargetId, XButtons, XGamepad, Xbox360Wired};

use super::{EmulationSink, SinkError, XusbReport};
use crate::state::{LogicalControllerState, VibrationCommand};

/// Virtual Xbox 360 controller, unplugged when dropped
pub struct VigemSink {
    target: Xbox360Wired<Client>,
    _notifications: std::thread::JoinHandle<()>,
}

impl VigemSink {
    /// Connect to ViGEmBus, plug a controller and start forwarding rumble
    pub fn connect(vibration_tx: mpsc::UnboundedSender<VibrationCommand>) -> Result<Self, SinkError> {
        let client = Client::connect().map_err(|e| SinkError::Connect(e.to_string()))?;

        let mut target = Xbox360Wired::new(client, TargetId::XBOX360_WIRED);
        target
            .plugin()
            .map_err(|e| SinkError::Connect(format!("cannot add Xbox 360 controller: {e}")))?;
        target
            .wait_ready()
            .map_err(|e| SinkError::Connect(format!("Xbox 360 controller not ready: {e}")))?;

        let notification = target.request_notification().map_err(|e| {
            SinkError::Connect(format!("cannot register vibration notification: {e}"))
        })?;

        let notifications = notification.spawn_thread(move |_, data| {
            let command = VibrationCommand {
                large_motor: data.large_motor,
                small_motor: data.small_motor,
            };
            trace!("Vibration requested: {:?}", command);
            // Receiver gone means the bridge is shutting down
            let _ = vibration_tx.send(command);
        });

        info!("✅ Virtual Xbox 360 controller plugged in");

        Ok(Self {
            target,
            _notifications: notifications,
        })
    }
}

impl EmulationSink for VigemSink {
    fn name(&self) -> &str {
        "vigem"
    }

    fn update(&mut self, state: &LogicalControllerState) -> Result<(), SinkError> {
        let report = XusbReport::from(state);
        let gamepad = XGamepad {
            buttons: XButtons { raw: report.buttons },
            left_trigger: report.left_trigger,
            right_trigger: report.right_trigger,
            thumb_lx: report.thumb_lx,
            thumb_ly: report.thumb_ly,
            thumb_rx: report.thumb_rx,
            thumb_ry: report.thumb_ry,
        };

        self.target
            .update(&gamepad)
            .map_err(|e| SinkError::Update(e.to_string()))
    }
}
