mod config;
mod device_notify;
mod ejector;
mod error;
mod event;
mod logging;
mod monitor;
mod orchestrator;
mod paths;
mod service;
mod shell;
mod status;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::device_notify::SignalSource;
use crate::ejector::VolumeEjector;
use crate::event::DaemonEvent;
use crate::monitor::{ConnectionEvent, VolumeMonitor};
use crate::orchestrator::{Notification, Orchestrator};
use crate::service::ServiceController;

#[tokio::main]
async fn main() {
    if let Err(e) = logging::init() {
        eprintln!("Failed to initialise logging: {e:#}");
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let config = match paths::config_file_path() {
        Ok(path) => config::load_or_default(&path).unwrap_or_else(|e| {
            warn!("Config error (using defaults): {e:#}");
            config::Config::default()
        }),
        Err(e) => {
            warn!("No config location (using defaults): {e:#}");
            config::Config::default()
        }
    };

    // ── Volume monitor ────────────────────────────────────────────────────────
    let (event_tx, event_rx) = mpsc::channel::<DaemonEvent>(32);
    let (conn_tx, conn_rx) = mpsc::channel::<ConnectionEvent>(8);

    let source = SignalSource::DeviceNotifications {
        fallback_interval: config.volume.poll_interval(),
    };
    let mut monitor = match VolumeMonitor::start(&config.volume.path, source, conn_tx) {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("Cannot monitor volume: {e}");
            std::process::exit(1);
        }
    };

    forward_transitions(conn_rx, event_tx.clone());

    // ── Orchestrator ──────────────────────────────────────────────────────────
    let manager = service::system_manager();
    let orchestrator = Arc::new(Orchestrator::new(
        config.automation.flags(),
        monitor.presence(),
        ServiceController::new(
            &config.database.service_name,
            config.database.label(),
            Arc::clone(&manager),
        ),
        ServiceController::new(&config.broker.service_name, config.broker.label(), manager),
        VolumeEjector::system(),
    ));

    // ── Initial status ────────────────────────────────────────────────────────
    let status_path = match paths::status_file_path() {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("Status file disabled: {e:#}");
            None
        }
    };
    let current_status = status::DaemonStatus::new(
        &config.volume.path,
        &orchestrator.status(),
        orchestrator.flags(),
    );
    if let Some(path) = &status_path {
        status::write_status(path, &current_status);
    }

    // ── Shell & shutdown ──────────────────────────────────────────────────────
    tokio::spawn(shell::run_console(
        shell::ShellHandle::new(Arc::clone(&orchestrator), event_tx.clone()),
        shell::spawn_line_reader(std::io::BufReader::new(std::io::stdin())),
    ));

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }
    drop(event_tx);

    info!(
        volume_connected = monitor.is_connected(),
        "usbwatch-daemon v{} started",
        env!("CARGO_PKG_VERSION")
    );

    // ── Event loop ────────────────────────────────────────────────────────────
    run_event_loop(event_rx, orchestrator, current_status, status_path).await;

    monitor.stop();
}

/// Transitions join the same queue as user intents so responses never overlap.
fn forward_transitions(
    mut conn_rx: mpsc::Receiver<ConnectionEvent>,
    tx: mpsc::Sender<DaemonEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = conn_rx.recv().await {
            if tx.send(DaemonEvent::VolumeChanged(event)).await.is_err() {
                break;
            }
        }
    })
}

/// Single worker: one event at a time, each response awaited to completion
/// before the next event is taken.  Returns on `Shutdown` or when every
/// sender is gone, yielding the last status written.
async fn run_event_loop(
    mut event_rx: mpsc::Receiver<DaemonEvent>,
    orchestrator: Arc<Orchestrator>,
    mut current_status: status::DaemonStatus,
    status_path: Option<PathBuf>,
) -> status::DaemonStatus {
    while let Some(evt) = event_rx.recv().await {
        let notification = match evt {
            DaemonEvent::VolumeChanged(event) => respond(&orchestrator, move |o| o.handle(event)).await,
            DaemonEvent::ForceConnect => respond(&orchestrator, Orchestrator::connect).await,
            DaemonEvent::ForceDisconnect => respond(&orchestrator, Orchestrator::disconnect).await,
            DaemonEvent::FlagsChanged => None,
            DaemonEvent::Shutdown => {
                info!("Shutting down");
                break;
            }
        };

        if let Some(n) = &notification {
            current_status.record_notification(n);
        }
        let report = {
            let o = Arc::clone(&orchestrator);
            match tokio::task::spawn_blocking(move || o.status()).await {
                Ok(report) => report,
                Err(e) => {
                    error!("Status query failed: {e}");
                    continue;
                }
            }
        };
        current_status.refresh(&report, orchestrator.flags());
        if let Some(path) = &status_path {
            status::write_status(path, &current_status);
        }
    }
    current_status
}

/// Runs a blocking orchestrator response off the async executor.
async fn respond<F>(orchestrator: &Arc<Orchestrator>, response: F) -> Option<Notification>
where
    F: FnOnce(&Orchestrator) -> Notification + Send + 'static,
{
    let o = Arc::clone(orchestrator);
    match tokio::task::spawn_blocking(move || response(&o)).await {
        Ok(notification) => Some(notification),
        Err(e) => {
            error!("Response task failed: {e}");
            None
        }
    }
}
