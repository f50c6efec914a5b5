/// Presence monitor for the single watched volume.
///
/// Raw volume-change signals (see [`crate::device_notify`]) carry nothing the
/// monitor can trust, so every signal triggers a fresh existence check of the
/// watched path.  A [`ConnectionEvent`] is emitted only when that check differs
/// from the last observed state; repeated signals for one physical transition
/// are swallowed.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, trace};

use crate::device_notify::{self, SignalSource, SubscriptionGuard};
use crate::error::{Error, Result};

/// A confirmed connect/disconnect transition of the watched volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub is_connected: bool,
}

/// Answers "does this path exist right now?".
pub trait PresenceProbe: Send + Sync {
    fn is_present(&self, path: &Path) -> bool;
}

/// Filesystem probe: the path exists as a file or a directory.
pub struct FsProbe;

impl PresenceProbe for FsProbe {
    fn is_present(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Checks that `path` starts with a drive letter prefix (`X:`) and returns
/// that prefix.
pub fn validate_path(path: &str) -> Result<String> {
    if path.trim().is_empty() {
        return Err(Error::InvalidArgument("monitored path is empty".into()));
    }
    let mut chars = path.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), Some(':')) => Ok(format!("{letter}:")),
        _ => Err(Error::InvalidArgument(format!(
            "'{path}' should at least start with a drive letter"
        ))),
    }
}

/// Live view of the watched path.  Cheap to clone; never caches.
#[derive(Clone)]
pub struct VolumePresence {
    path: PathBuf,
    drive: String,
    probe: Arc<dyn PresenceProbe>,
}

impl VolumePresence {
    pub fn new(path: &str, probe: Arc<dyn PresenceProbe>) -> Result<Self> {
        let drive = validate_path(path)?;
        Ok(Self {
            path: PathBuf::from(path),
            drive,
            probe,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.probe.is_present(&self.path)
    }

    /// Drive prefix, e.g. `E:`.
    pub fn drive(&self) -> &str {
        &self.drive
    }
}

/// Debounce state: the last connected state that produced (or seeded) an event.
pub struct PresenceTracker {
    presence: VolumePresence,
    last_observed_connected: bool,
}

impl PresenceTracker {
    /// Seeds the baseline with one live read.
    pub fn new(presence: VolumePresence) -> Self {
        let last_observed_connected = presence.is_connected();
        Self {
            presence,
            last_observed_connected,
        }
    }

    pub fn last_observed(&self) -> bool {
        self.last_observed_connected
    }

    /// Handles one raw signal.  Returns an event only on a real transition.
    pub fn observe(&mut self) -> Option<ConnectionEvent> {
        let connected = self.presence.is_connected();
        if connected == self.last_observed_connected {
            trace!(drive = %self.presence.drive, "No presence change");
            return None;
        }
        self.last_observed_connected = connected;
        info!(drive = %self.presence.drive, "Drive is now available: {connected}");
        Some(ConnectionEvent {
            is_connected: connected,
        })
    }
}

/// Running monitor: a handler task fed by a volume-change subscription.
pub struct VolumeMonitor {
    presence: VolumePresence,
    task: Option<JoinHandle<()>>,
    subscription: Option<SubscriptionGuard>,
}

impl VolumeMonitor {
    /// Validates `path`, seeds the baseline, and subscribes to `source`.
    /// Transitions are sent to `events`.  Must be called within a tokio runtime.
    pub fn start(
        path: &str,
        source: SignalSource,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Self> {
        let presence = VolumePresence::new(path, Arc::new(FsProbe))?;
        let (signals, guard) = device_notify::subscribe(source);
        let mut monitor = Self::start_with(presence, signals, events);
        monitor.subscription = Some(guard);
        Ok(monitor)
    }

    /// Runs the handler over an already-established signal stream.
    pub fn start_with(
        presence: VolumePresence,
        mut signals: mpsc::Receiver<()>,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        let mut tracker = PresenceTracker::new(presence.clone());
        info!(
            drive = %presence.drive,
            connected = tracker.last_observed(),
            "Monitoring {}",
            presence.path.display()
        );

        let task = tokio::spawn(async move {
            while signals.recv().await.is_some() {
                if let Some(event) = tracker.observe() {
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            presence,
            task: Some(task),
            subscription: None,
        }
    }

    /// Live presence check of the watched path.
    pub fn is_connected(&self) -> bool {
        self.presence.is_connected()
    }

    pub fn presence(&self) -> VolumePresence {
        self.presence.clone()
    }

    /// Unsubscribes and stops the handler.  Safe to call any number of times.
    /// An in-flight orchestrator response is not affected.
    pub fn stop(&mut self) {
        let was_running = self.task.is_some() || self.subscription.is_some();
        self.subscription.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if was_running {
            info!(drive = %self.presence.drive, "Monitor stopped");
        }
    }
}

impl Drop for VolumeMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
