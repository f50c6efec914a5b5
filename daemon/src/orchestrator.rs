/// Sequences service start/stop and the safe eject around volume transitions.
///
/// The orchestrator itself holds no state beyond the three automation flags.
/// Every response runs synchronously to completion and blocks for as long as
/// the bounded service waits and the lock retry loop allow, so callers run it
/// off the async executor (see the event loop in `main.rs`).
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::ejector::VolumeEjector;
use crate::monitor::{ConnectionEvent, VolumePresence};
use crate::service::{ServiceController, ServiceState};

/// User-controlled switches.  Written only by toggle intents, read by the
/// transition handlers; both may run at the same time.
#[derive(Debug)]
pub struct AutomationFlags {
    auto_start_database: AtomicBool,
    auto_start_broker: AtomicBool,
    auto_eject: AtomicBool,
}

/// Point-in-time copy of [`AutomationFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagSnapshot {
    pub auto_start_database: bool,
    pub auto_start_broker: bool,
    pub auto_eject: bool,
}

impl AutomationFlags {
    pub fn new(auto_start_database: bool, auto_start_broker: bool, auto_eject: bool) -> Self {
        Self {
            auto_start_database: AtomicBool::new(auto_start_database),
            auto_start_broker: AtomicBool::new(auto_start_broker),
            auto_eject: AtomicBool::new(auto_eject),
        }
    }

    pub fn snapshot(&self) -> FlagSnapshot {
        FlagSnapshot {
            auto_start_database: self.auto_start_database.load(Ordering::SeqCst),
            auto_start_broker: self.auto_start_broker.load(Ordering::SeqCst),
            auto_eject: self.auto_eject.load(Ordering::SeqCst),
        }
    }

    fn toggle(flag: &AtomicBool) -> bool {
        !flag.fetch_xor(true, Ordering::SeqCst)
    }
}

/// All automation is on unless configured otherwise.
impl Default for AutomationFlags {
    fn default() -> Self {
        Self::new(true, true, true)
    }
}

/// One service's line in the status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLine {
    pub label: String,
    pub name: String,
    pub state: ServiceState,
}

/// Fresh snapshot of the volume and both services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub volume_connected: bool,
    pub database: ServiceLine,
    pub broker: ServiceLine,
}

impl StatusReport {
    pub fn volume_text(&self) -> String {
        format!("Volume: {}", connection_word(self.volume_connected))
    }

    pub fn database_text(&self) -> String {
        format!("{}: {}", self.database.label, self.database.state)
    }

    pub fn broker_text(&self) -> String {
        format!("{}: {}", self.broker.label, self.broker.state)
    }
}

/// Balloon-style payload raised after every connect/disconnect response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

impl Notification {
    fn new(connected: bool, report: &StatusReport) -> Self {
        Self {
            title: connection_word(connected).to_string(),
            body: [
                report.volume_text(),
                report.database_text(),
                report.broker_text(),
            ]
            .join("\n"),
        }
    }
}

fn connection_word(connected: bool) -> &'static str {
    if connected {
        "Connected"
    } else {
        "Disconnected"
    }
}

pub struct Orchestrator {
    flags: AutomationFlags,
    volume: VolumePresence,
    database: ServiceController,
    broker: ServiceController,
    ejector: VolumeEjector,
}

impl Orchestrator {
    pub fn new(
        flags: AutomationFlags,
        volume: VolumePresence,
        database: ServiceController,
        broker: ServiceController,
        ejector: VolumeEjector,
    ) -> Self {
        Self {
            flags,
            volume,
            database,
            broker,
            ejector,
        }
    }

    pub fn flags(&self) -> FlagSnapshot {
        self.flags.snapshot()
    }

    /// Returns the new value.
    pub fn toggle_database_automation(&self) -> bool {
        let on = AutomationFlags::toggle(&self.flags.auto_start_database);
        info!(enabled = on, "Database automation toggled");
        on
    }

    pub fn toggle_broker_automation(&self) -> bool {
        let on = AutomationFlags::toggle(&self.flags.auto_start_broker);
        info!(enabled = on, "Broker automation toggled");
        on
    }

    pub fn toggle_auto_eject(&self) -> bool {
        let on = AutomationFlags::toggle(&self.flags.auto_eject);
        info!(enabled = on, "Auto-eject toggled");
        on
    }

    /// Responds to a monitor transition.
    pub fn handle(&self, event: ConnectionEvent) -> Notification {
        if event.is_connected {
            self.connect()
        } else {
            self.disconnect()
        }
    }

    /// Connect response, also used for the force-connect intent.
    ///
    /// The database only starts while the volume is actually present; the
    /// broker does not depend on the volume and starts whenever its flag is set.
    pub fn connect(&self) -> Notification {
        let flags = self.flags.snapshot();
        if flags.auto_start_database {
            if self.volume.is_connected() {
                self.database.start();
            } else {
                info!(
                    service = self.database.name(),
                    drive = self.volume.drive(),
                    "Volume not present; database left alone"
                );
            }
        }
        if flags.auto_start_broker {
            self.broker.start();
        }
        self.notification(true)
    }

    /// Disconnect response, also used for the force-disconnect intent.
    /// Order: broker, database, eject.
    pub fn disconnect(&self) -> Notification {
        let flags = self.flags.snapshot();
        if flags.auto_start_broker {
            self.broker.stop();
        }
        if flags.auto_start_database {
            self.database.stop();
        }
        if flags.auto_eject {
            self.eject_volume();
        }
        self.notification(false)
    }

    /// Recomputes everything from live queries.
    pub fn status(&self) -> StatusReport {
        StatusReport {
            volume_connected: self.volume.is_connected(),
            database: ServiceLine {
                label: self.database.label().to_string(),
                name: self.database.name().to_string(),
                state: self.database.status(),
            },
            broker: ServiceLine {
                label: self.broker.label().to_string(),
                name: self.broker.name().to_string(),
                state: self.broker.status(),
            },
        }
    }

    fn eject_volume(&self) {
        let drive = self.volume.drive();
        info!(drive, "Disconnect requested");
        if !self.volume.is_connected() {
            warn!(drive, "Drive is already disconnected");
            return;
        }
        self.ejector.eject(drive);
    }

    fn notification(&self, connected: bool) -> Notification {
        let notification = Notification::new(connected, &self.status());
        info!(
            title = %notification.title,
            "{}",
            notification.body.replace('\n', ", ")
        );
        notification
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
