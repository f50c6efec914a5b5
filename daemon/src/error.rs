/// Error taxonomy shared by the monitor, ejector, and service controller.
///
/// None of these escape a component boundary except [`Error::InvalidArgument`]
/// at monitor start; everything else is logged and folded into a `bool` or a
/// [`crate::service::ServiceState`].
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The monitored path does not start with a drive letter (`X:`).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Lock-volume kept failing because other handles are open on the volume.
    #[error("Volume {drive} is busy: lock failed after {attempts} attempts")]
    DeviceBusy { drive: String, attempts: u32 },

    /// A single OS request (device control code, SCM call) failed.
    #[cfg_attr(not(windows), allow(dead_code))]
    #[error("{operation} failed for '{target}': {message}")]
    OsRequest {
        operation: &'static str,
        target: String,
        message: String,
    },

    /// A start/stop was requested while the service was not in the required state.
    #[error("Cannot {action} '{service}' with status {current}, expected {expected}")]
    ServiceStateConflict {
        service: String,
        action: &'static str,
        current: String,
        expected: String,
    },

    /// A start/stop was issued but the target state was not reached in time.
    #[error("Timed out after {secs}s waiting for '{service}' to become {expected}")]
    ServiceWaitTimeout {
        service: String,
        expected: String,
        secs: u64,
    },

    /// The OS primitive has no binding on this platform.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl Error {
    #[cfg_attr(not(windows), allow(dead_code))]
    pub fn os(operation: &'static str, target: impl Into<String>, message: impl ToString) -> Self {
        Self::OsRequest {
            operation,
            target: target.into(),
            message: message.to_string(),
        }
    }
}
