/// Start/stop/status for a named OS background service.
///
/// [`ServiceController`] enforces the precondition checks and the bounded wait;
/// the OS binding sits behind [`ServiceManager`] so the controller never talks
/// to the service control manager directly.  Status is never cached: every call
/// goes back to the OS.
///
/// On non-Windows platforms [`system_manager`] returns a binding whose every
/// request fails with [`Error::Unsupported`], so `status()` reports `Unknown`.
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::error::{Error, Result};

/// Upper bound on how long `start`/`stop` block waiting for the target state.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(30);
/// How often the state is re-queried while waiting.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Live state of a service as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    Stopped,
    Paused,
    Starting,
    Stopping,
    Unknown,
}

impl ServiceState {
    /// Maps a raw `SERVICE_STATUS.dwCurrentState` value.
    #[cfg_attr(not(windows), allow(dead_code))]
    pub fn from_scm(raw: u32) -> Self {
        match raw {
            1 => Self::Stopped,
            2 => Self::Starting,
            3 => Self::Stopping,
            4 => Self::Running,
            // CONTINUE_PENDING / PAUSE_PENDING are transitional like start/stop.
            5 => Self::Starting,
            6 => Self::Stopping,
            7 => Self::Paused,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Paused => "Paused",
            Self::Starting => "Starting",
            Self::Stopping => "Stopping",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// OS service-control primitives, addressed by service name.
pub trait ServiceManager: Send + Sync {
    fn query(&self, name: &str) -> Result<ServiceState>;
    fn start(&self, name: &str) -> Result<()>;
    fn stop(&self, name: &str) -> Result<()>;
}

/// Stateless wrapper around one named service.
#[derive(Clone)]
pub struct ServiceController {
    name: String,
    label: String,
    manager: Arc<dyn ServiceManager>,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl ServiceController {
    /// `name` is the OS service name; `label` is what status text shows.
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        manager: Arc<dyn ServiceManager>,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            manager,
            wait_timeout: WAIT_TIMEOUT,
            poll_interval: WAIT_POLL_INTERVAL,
        }
    }

    /// Overrides the wait bound and poll interval.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn with_wait(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.wait_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Starts the service if it is currently stopped and waits for it to run.
    ///
    /// Any other current state is logged as a warning and left alone.
    /// Failures and timeouts are logged; nothing propagates to the caller.
    pub fn start(&self) {
        match self.transition("start", ServiceState::Stopped, ServiceState::Running) {
            Ok(()) => info!(service = %self.name, "Started"),
            Err(e @ Error::ServiceStateConflict { .. }) => warn!("{e}"),
            Err(e) => error!(service = %self.name, "Failed to start: {e}"),
        }
    }

    /// Stops the service if it is currently running and waits for it to stop.
    pub fn stop(&self) {
        match self.transition("stop", ServiceState::Running, ServiceState::Stopped) {
            Ok(()) => info!(service = %self.name, "Stopped"),
            Err(e @ Error::ServiceStateConflict { .. }) => warn!("{e}"),
            Err(e) => error!(service = %self.name, "Failed to stop: {e}"),
        }
    }

    /// Queries the live state.  A failed query is logged and reported as `Unknown`.
    pub fn status(&self) -> ServiceState {
        match self.manager.query(&self.name) {
            Ok(state) => state,
            Err(e) => {
                error!(service = %self.name, "Failed to get status: {e}");
                ServiceState::Unknown
            }
        }
    }

    fn transition(
        &self,
        action: &'static str,
        required: ServiceState,
        target: ServiceState,
    ) -> Result<()> {
        let current = self.manager.query(&self.name)?;
        if current != required {
            return Err(Error::ServiceStateConflict {
                service: self.name.clone(),
                action,
                current: current.to_string(),
                expected: required.to_string(),
            });
        }

        info!(service = %self.name, "Requesting {action}");
        match target {
            ServiceState::Running => self.manager.start(&self.name)?,
            _ => self.manager.stop(&self.name)?,
        }
        self.wait_for(target)
    }

    fn wait_for(&self, target: ServiceState) -> Result<()> {
        let deadline = Instant::now() + self.wait_timeout;
        loop {
            if self.manager.query(&self.name)? == target {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::ServiceWaitTimeout {
                    service: self.name.clone(),
                    expected: target.to_string(),
                    secs: self.wait_timeout.as_secs(),
                });
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}

/// Returns the service-control binding for the current platform.
pub fn system_manager() -> Arc<dyn ServiceManager> {
    #[cfg(windows)]
    {
        Arc::new(imp::ScmServiceManager)
    }
    #[cfg(not(windows))]
    {
        Arc::new(UnsupportedServiceManager)
    }
}

#[cfg(not(windows))]
struct UnsupportedServiceManager;

#[cfg(not(windows))]
impl ServiceManager for UnsupportedServiceManager {
    fn query(&self, _name: &str) -> Result<ServiceState> {
        Err(Error::Unsupported("Service control"))
    }

    fn start(&self, _name: &str) -> Result<()> {
        Err(Error::Unsupported("Service control"))
    }

    fn stop(&self, _name: &str) -> Result<()> {
        Err(Error::Unsupported("Service control"))
    }
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use windows::core::PCWSTR;
    use windows::Win32::System::Services::{
        CloseServiceHandle, ControlService, OpenSCManagerW, OpenServiceW, QueryServiceStatus,
        StartServiceW, SC_HANDLE, SERVICE_STATUS,
    };

    use super::{ServiceManager, ServiceState};
    use crate::error::{Error, Result};

    const SC_MANAGER_CONNECT: u32 = 0x0001;
    const SERVICE_QUERY_STATUS: u32 = 0x0004;
    const SERVICE_START: u32 = 0x0010;
    const SERVICE_STOP: u32 = 0x0020;
    const SERVICE_CONTROL_STOP: u32 = 0x0001;

    /// Closes the SC handle when dropped.
    struct ScHandle(SC_HANDLE);

    impl Drop for ScHandle {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseServiceHandle(self.0);
            }
        }
    }

    /// Service handle plus the manager handle it was opened from.
    /// Field order makes the service handle close first.
    struct OpenedService {
        service: ScHandle,
        _manager: ScHandle,
    }

    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    fn open(name: &str, access: u32) -> Result<OpenedService> {
        let manager = unsafe { OpenSCManagerW(PCWSTR::null(), PCWSTR::null(), SC_MANAGER_CONNECT) }
            .map_err(|e| Error::os("OpenSCManagerW", name, e))?;
        let manager = ScHandle(manager);

        let name_w = to_wide(name);
        let service = unsafe { OpenServiceW(manager.0, PCWSTR::from_raw(name_w.as_ptr()), access) }
            .map_err(|e| Error::os("OpenServiceW", name, e))?;

        Ok(OpenedService {
            service: ScHandle(service),
            _manager: manager,
        })
    }

    pub struct ScmServiceManager;

    impl ServiceManager for ScmServiceManager {
        fn query(&self, name: &str) -> Result<ServiceState> {
            let opened = open(name, SERVICE_QUERY_STATUS)?;
            let mut status = SERVICE_STATUS::default();
            unsafe { QueryServiceStatus(opened.service.0, &mut status) }
                .map_err(|e| Error::os("QueryServiceStatus", name, e))?;
            Ok(ServiceState::from_scm(status.dwCurrentState.0))
        }

        fn start(&self, name: &str) -> Result<()> {
            let opened = open(name, SERVICE_START)?;
            unsafe { StartServiceW(opened.service.0, None) }
                .map_err(|e| Error::os("StartServiceW", name, e))
        }

        fn stop(&self, name: &str) -> Result<()> {
            let opened = open(name, SERVICE_STOP)?;
            let mut status = SERVICE_STATUS::default();
            unsafe { ControlService(opened.service.0, SERVICE_CONTROL_STOP, &mut status) }
                .map_err(|e| Error::os("ControlService", name, e))
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
