use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::error;

use crate::orchestrator::{FlagSnapshot, Notification, ServiceLine, StatusReport};

/// One dependent service as shown to the front-end.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ServiceStatus {
    /// OS service name.
    pub name: String,
    /// Display label.
    pub label: String,
    /// Live state at the time of writing (`Running`, `Stopped`, ...).
    pub state: String,
}

impl From<&ServiceLine> for ServiceStatus {
    fn from(line: &ServiceLine) -> Self {
        Self {
            name: line.name.clone(),
            label: line.label.clone(),
            state: line.state.to_string(),
        }
    }
}

/// Most recent connect/disconnect notification.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LastNotification {
    pub title: String,
    pub body: String,
    /// RFC 3339 local time at which the notification was raised.
    pub timestamp: String,
}

/// Runtime status written by the daemon to %APPDATA%\UsbWatch\status.toml.
/// A tray front-end reads this file (read-only) to render menu text and balloons.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    /// Watched path, e.g. `E:\Databases`.
    pub volume_path: String,
    /// Whether the watched path existed when the status was written.
    pub volume_connected: bool,
    pub auto_start_database: bool,
    pub auto_start_broker: bool,
    pub auto_eject: bool,
    pub database: ServiceStatus,
    pub broker: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_notification: Option<LastNotification>,
}

impl DaemonStatus {
    /// Builds a status from a fresh report and the current flags.
    pub fn new(volume_path: &str, report: &StatusReport, flags: FlagSnapshot) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            volume_path: volume_path.to_string(),
            volume_connected: report.volume_connected,
            auto_start_database: flags.auto_start_database,
            auto_start_broker: flags.auto_start_broker,
            auto_eject: flags.auto_eject,
            database: ServiceStatus::from(&report.database),
            broker: ServiceStatus::from(&report.broker),
            last_notification: None,
        }
    }

    /// Replaces the live fields, keeping the last notification.
    pub fn refresh(&mut self, report: &StatusReport, flags: FlagSnapshot) {
        let last = self.last_notification.take();
        *self = Self::new(&self.volume_path, report, flags);
        self.last_notification = last;
    }

    pub fn record_notification(&mut self, notification: &Notification) {
        self.last_notification = Some(LastNotification {
            title: notification.title.clone(),
            body: notification.body.clone(),
            timestamp: chrono::Local::now().to_rfc3339(),
        });
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Failures are logged, never returned.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!("Failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                error!("Failed to write status file: {e}");
            }
        }
        Err(e) => error!("Failed to serialize status: {e}"),
    }
}
