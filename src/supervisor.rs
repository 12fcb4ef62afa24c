//! Presence supervisor with hot-plug support
//!
//! Scans for the controller on a fixed interval while none is open and
//! installs a fresh [`DeviceSession`] into the shared [`SessionCell`]. The
//! consumer clears the cell when the session reports a disconnect; the next
//! tick then resumes scanning.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::hid::{DeviceIdentity, DeviceMatcher, HidBackend, HidError};
use crate::session::{DeviceSession, SessionOptions};

/// What the composition root currently knows about the controller
#[derive(Clone)]
pub enum Presence {
    NoDevice,
    Open(Arc<DeviceSession>),
    /// Enumeration failed and will not be retried
    Faulted(Arc<HidError>),
}

impl Presence {
    pub fn state(&self) -> SupervisorState {
        match self {
            Presence::NoDevice => SupervisorState::NoDevice,
            Presence::Open(_) => SupervisorState::DeviceOpen,
            Presence::Faulted(_) => SupervisorState::Faulted,
        }
    }
}

/// Supervisor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NoDevice,
    DeviceOpen,
    Faulted,
}

/// How to treat a failing enumeration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum EnumerationPolicy {
    /// Record a permanent fault and stop scanning
    #[default]
    Permanent,
    /// Log and try again on the next tick
    Retry,
}

/// The single place holding the open session, if any
///
/// Only [`install_session`](Self::install_session),
/// [`clear_session`](Self::clear_session) and
/// [`record_fault`](Self::record_fault) change it. Readers see either no
/// session or a fully started one.
#[derive(Clone)]
pub struct SessionCell {
    tx: Arc<watch::Sender<Presence>>,
}

impl SessionCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Presence::NoDevice);
        Self { tx: Arc::new(tx) }
    }

    pub fn presence(&self) -> Presence {
        self.tx.borrow().clone()
    }

    pub fn state(&self) -> SupervisorState {
        self.tx.borrow().state()
    }

    pub fn current(&self) -> Option<Arc<DeviceSession>> {
        match &*self.tx.borrow() {
            Presence::Open(session) => Some(session.clone()),
            _ => None,
        }
    }

    pub fn fault(&self) -> Option<Arc<HidError>> {
        match &*self.tx.borrow() {
            Presence::Faulted(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Publish a new session; refused unless the cell is empty
    pub fn install_session(&self, session: Arc<DeviceSession>) -> Result<(), Arc<DeviceSession>> {
        let mut rejected = None;
        self.tx.send_if_modified(|presence| match presence {
            Presence::NoDevice => {
                *presence = Presence::Open(session.clone());
                true
            },
            _ => {
                rejected = Some(session.clone());
                false
            },
        });

        match rejected {
            Some(session) => Err(session),
            None => Ok(()),
        }
    }

    /// Drop `session` from the cell if it is still the installed one
    pub fn clear_session(&self, session: &Arc<DeviceSession>) -> bool {
        let cleared = self.tx.send_if_modified(|presence| match presence {
            Presence::Open(current) if Arc::ptr_eq(current, session) => {
                *presence = Presence::NoDevice;
                true
            },
            _ => false,
        });

        if cleared {
            session.close();
        }
        cleared
    }

    /// Enter the terminal fault state
    pub fn record_fault(&self, err: HidError) {
        let err = Arc::new(err);
        self.tx.send_modify(|presence| *presence = Presence::Faulted(err));
    }

    /// Wait until a session is open or a fault is recorded
    pub async fn wait_for_device(&self) -> Presence {
        let mut rx = self.tx.subscribe();
        // Bound to a local so the borrow guard is released before `rx`
        #[allow(clippy::let_and_return)]
        let presence = match rx
            .wait_for(|presence| !matches!(presence, Presence::NoDevice))
            .await
        {
            Ok(presence) => presence.clone(),
            Err(_) => Presence::NoDevice,
        };
        presence
    }
}

impl Default for SessionCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Supervisor settings
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub matcher: DeviceMatcher,
    pub scan_interval: Duration,
    pub exclusive: bool,
    pub enumeration: EnumerationPolicy,
    pub session: SessionOptions,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            matcher: DeviceMatcher::default(),
            scan_interval: Duration::from_secs(1),
            exclusive: false,
            enumeration: EnumerationPolicy::Permanent,
            session: SessionOptions::default(),
        }
    }
}

/// Result of one supervisor step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A session is already open, nothing scanned
    AlreadyOpen,
    NotFound,
    Opened(DeviceIdentity),
    OpenFailed,
    /// Enumeration failed under [`EnumerationPolicy::Retry`]
    ScanFailed,
    Faulted,
}

/// Background device scanner
pub struct Supervisor {
    backend: Arc<dyn HidBackend>,
    cell: SessionCell,
    options: SupervisorOptions,
}

impl Supervisor {
    pub fn new(backend: Arc<dyn HidBackend>, cell: SessionCell, options: SupervisorOptions) -> Self {
        Self {
            backend,
            cell,
            options,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.cell.state()
    }

    /// One scan step; blocking, enumerates only while no device is open
    pub fn tick(&self) -> TickOutcome {
        match self.cell.state() {
            SupervisorState::Faulted => return TickOutcome::Faulted,
            SupervisorState::DeviceOpen => return TickOutcome::AlreadyOpen,
            SupervisorState::NoDevice => {},
        }

        let devices = match self.backend.list_devices() {
            Ok(devices) => devices,
            Err(e) => {
                return match self.options.enumeration {
                    EnumerationPolicy::Permanent => {
                        error!("Device enumeration failed, giving up: {}", e);
                        self.cell.record_fault(e);
                        TickOutcome::Faulted
                    },
                    EnumerationPolicy::Retry => {
                        warn!("Device enumeration failed (will retry): {}", e);
                        TickOutcome::ScanFailed
                    },
                };
            },
        };

        let Some(identity) = devices.into_iter().find(|d| self.options.matcher.matches(d)) else {
            trace!("No matching controller found");
            return TickOutcome::NotFound;
        };

        let handle = match self.backend.open(&identity, self.options.exclusive) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Cannot open device {}: {}", identity.path, e);
                return TickOutcome::OpenFailed;
            },
        };

        let session = match DeviceSession::start(identity.clone(), handle, self.options.session) {
            Ok(session) => Arc::new(session),
            Err(e) => {
                warn!("Cannot start session for {}: {}", identity.path, e);
                return TickOutcome::OpenFailed;
            },
        };

        match self.cell.install_session(session) {
            Ok(()) => {
                info!("✅ Opened controller {}", identity);
                TickOutcome::Opened(identity)
            },
            Err(session) => {
                session.close();
                TickOutcome::AlreadyOpen
            },
        }
    }

    /// Run [`tick`](Self::tick) on the scan interval until a permanent fault
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(Arc::new(self).run())
    }

    async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.options.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Scanning for controller every {:?}", self.options.scan_interval);

        loop {
            interval.tick().await;

            match self.cell.state() {
                SupervisorState::DeviceOpen => continue,
                SupervisorState::Faulted => break,
                SupervisorState::NoDevice => {},
            }

            let this = self.clone();
            match tokio::task::spawn_blocking(move || this.tick()).await {
                Ok(TickOutcome::Faulted) => break,
                Ok(outcome) => debug!("Scan tick: {:?}", outcome),
                Err(e) => warn!("Scan task failed: {}", e),
            }
        }

        info!("Controller scanning stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::fake::{self, FakeBackend};

    fn supervisor(backend: Arc<FakeBackend>, options: SupervisorOptions) -> (Supervisor, SessionCell) {
        let cell = SessionCell::new();
        (Supervisor::new(backend, cell.clone(), options), cell)
    }

    #[test]
    fn test_no_devices_stays_idle() {
        let backend = FakeBackend::with_devices(vec![]);
        let (supervisor, _cell) = supervisor(backend.clone(), SupervisorOptions::default());

        for _ in 0..5 {
            assert_eq!(supervisor.tick(), TickOutcome::NotFound);
        }
        assert_eq!(supervisor.state(), SupervisorState::NoDevice);
        assert_eq!(backend.opens(), 0);
        assert_eq!(backend.enumerations(), 5);
    }

    #[test]
    fn test_ignores_other_devices() {
        let backend = FakeBackend::with_devices(vec![fake::other("x0"), fake::other("x1")]);
        let (supervisor, _cell) = supervisor(backend.clone(), SupervisorOptions::default());

        assert_eq!(supervisor.tick(), TickOutcome::NotFound);
        assert_eq!(backend.opens(), 0);
    }

    #[test]
    fn test_opens_matching_device_once() {
        let backend =
            FakeBackend::with_devices(vec![fake::other("x0"), fake::stadia("s0"), fake::stadia("s1")]);
        let (supervisor, cell) = supervisor(backend.clone(), SupervisorOptions::default());

        assert_eq!(supervisor.tick(), TickOutcome::Opened(fake::stadia("s0")));
        assert_eq!(supervisor.state(), SupervisorState::DeviceOpen);

        for _ in 0..3 {
            assert_eq!(supervisor.tick(), TickOutcome::AlreadyOpen);
        }
        assert_eq!(backend.opens(), 1);
        assert_eq!(backend.enumerations(), 1);
        assert_eq!(cell.current().unwrap().identity().path, "s0");
    }

    #[test]
    fn test_open_failure_retries_next_tick() {
        let backend = FakeBackend::with_devices(vec![fake::stadia("s0")]);
        *backend.fail_open.lock() = true;
        let (supervisor, _cell) = supervisor(backend.clone(), SupervisorOptions::default());

        assert_eq!(supervisor.tick(), TickOutcome::OpenFailed);
        assert_eq!(supervisor.state(), SupervisorState::NoDevice);

        *backend.fail_open.lock() = false;
        assert!(matches!(supervisor.tick(), TickOutcome::Opened(_)));
        assert_eq!(backend.opens(), 2);
    }

    #[test]
    fn test_enumeration_failure_is_permanent() {
        let backend = FakeBackend::with_devices(vec![]);
        *backend.devices.lock() = Err("access denied".to_string());
        let (supervisor, cell) = supervisor(backend.clone(), SupervisorOptions::default());

        assert_eq!(supervisor.tick(), TickOutcome::Faulted);
        assert_eq!(supervisor.state(), SupervisorState::Faulted);

        *backend.devices.lock() = Ok(vec![fake::stadia("s0")]);
        assert_eq!(supervisor.tick(), TickOutcome::Faulted);
        assert_eq!(backend.enumerations(), 1);
        assert_eq!(backend.opens(), 0);
        assert!(cell.fault().unwrap().to_string().contains("access denied"));
    }

    #[test]
    fn test_enumeration_failure_retry_policy() {
        let backend = FakeBackend::with_devices(vec![]);
        *backend.devices.lock() = Err("busy".to_string());
        let options = SupervisorOptions {
            enumeration: EnumerationPolicy::Retry,
            ..Default::default()
        };
        let (supervisor, _cell) = supervisor(backend.clone(), options);

        assert_eq!(supervisor.tick(), TickOutcome::ScanFailed);
        assert_eq!(supervisor.state(), SupervisorState::NoDevice);

        *backend.devices.lock() = Ok(vec![fake::stadia("s0")]);
        assert!(matches!(supervisor.tick(), TickOutcome::Opened(_)));
    }

    #[test]
    fn test_replug_after_clear() {
        let backend = FakeBackend::with_devices(vec![fake::stadia("s0")]);
        let (supervisor, cell) = supervisor(backend.clone(), SupervisorOptions::default());

        assert!(matches!(supervisor.tick(), TickOutcome::Opened(_)));
        let session = cell.current().unwrap();

        assert!(cell.clear_session(&session));
        assert!(session.is_closed());
        assert_eq!(supervisor.state(), SupervisorState::NoDevice);

        assert!(matches!(supervisor.tick(), TickOutcome::Opened(_)));
        assert_eq!(backend.opens(), 2);
    }

    #[test]
    fn test_cell_rejects_second_session() {
        let backend = FakeBackend::with_devices(vec![fake::stadia("s0")]);
        let (supervisor, cell) = supervisor(backend, SupervisorOptions::default());
        assert!(matches!(supervisor.tick(), TickOutcome::Opened(_)));

        let extra = Arc::new(
            DeviceSession::start(
                fake::stadia("s1"),
                fake::FakeHandle::new(),
                SessionOptions::default(),
            )
            .unwrap(),
        );
        let rejected = cell.install_session(extra.clone()).unwrap_err();
        assert!(Arc::ptr_eq(&rejected, &extra));

        // Clearing a session that is not installed is a no-op
        assert!(!cell.clear_session(&extra));
        assert_eq!(cell.current().unwrap().identity().path, "s0");
    }

    #[tokio::test]
    async fn test_wait_for_device_wakes_on_install() {
        let cell = SessionCell::new();
        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.wait_for_device().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let session = Arc::new(
            DeviceSession::start(fake::stadia("s0"), fake::FakeHandle::new(), SessionOptions::default())
                .unwrap(),
        );
        assert!(cell.install_session(session.clone()).is_ok());

        let presence = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        match presence {
            Presence::Open(open) => assert!(Arc::ptr_eq(&open, &session)),
            _ => panic!("expected an open session"),
        }

        // Already open: returns without waiting
        let presence = tokio::time::timeout(Duration::from_millis(100), cell.wait_for_device())
            .await
            .expect("should not wait");
        assert_eq!(presence.state(), SupervisorState::DeviceOpen);
    }

    #[tokio::test]
    async fn test_spawned_supervisor_installs_session() {
        let backend = FakeBackend::with_devices(vec![fake::stadia("s0")]);
        let options = SupervisorOptions {
            scan_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let (supervisor, cell) = supervisor(backend.clone(), options);
        let task = supervisor.spawn();

        let presence = tokio::time::timeout(Duration::from_secs(5), cell.wait_for_device())
            .await
            .expect("device should be found");
        assert_eq!(presence.state(), SupervisorState::DeviceOpen);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.opens(), 1);

        task.abort();
    }

    #[tokio::test]
    async fn test_spawned_supervisor_stops_on_fault() {
        let backend = FakeBackend::with_devices(vec![]);
        *backend.devices.lock() = Err("no hid subsystem".to_string());
        let options = SupervisorOptions {
            scan_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let (supervisor, cell) = supervisor(backend.clone(), options);
        let task = supervisor.spawn();

        let presence = tokio::time::timeout(Duration::from_secs(5), cell.wait_for_device())
            .await
            .expect("fault should be published");
        assert_eq!(presence.state(), SupervisorState::Faulted);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("supervisor should stop")
            .unwrap();
        assert_eq!(backend.enumerations(), 1);
    }
}
