/// Intent surface for a UI shell (tray menu, console), plus a console front-end.
///
/// Toggles and status requests are answered directly and immediately.  Force
/// connect/disconnect and shutdown are queued onto the daemon's event loop so
/// they are serialized with monitor transitions and never overlap one another.
use std::io::BufRead;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::DaemonEvent;
use crate::orchestrator::{FlagSnapshot, Orchestrator, StatusReport};

/// Console lines buffered between the reader thread and [`run_console`].
const CONSOLE_CAPACITY: usize = 8;

#[derive(Clone)]
pub struct ShellHandle {
    orchestrator: Arc<Orchestrator>,
    tx: mpsc::Sender<DaemonEvent>,
}

impl ShellHandle {
    pub fn new(orchestrator: Arc<Orchestrator>, tx: mpsc::Sender<DaemonEvent>) -> Self {
        Self { orchestrator, tx }
    }

    pub fn toggle_database_automation(&self) -> bool {
        let on = self.orchestrator.toggle_database_automation();
        self.flags_changed();
        on
    }

    pub fn toggle_broker_automation(&self) -> bool {
        let on = self.orchestrator.toggle_broker_automation();
        self.flags_changed();
        on
    }

    pub fn toggle_auto_eject(&self) -> bool {
        let on = self.orchestrator.toggle_auto_eject();
        self.flags_changed();
        on
    }

    pub fn flags(&self) -> FlagSnapshot {
        self.orchestrator.flags()
    }

    /// Returns `false` if the daemon is no longer accepting intents.
    pub async fn force_connect(&self) -> bool {
        self.tx.send(DaemonEvent::ForceConnect).await.is_ok()
    }

    pub async fn force_disconnect(&self) -> bool {
        self.tx.send(DaemonEvent::ForceDisconnect).await.is_ok()
    }

    /// Fresh volume and service status, queried now.
    pub fn request_status(&self) -> StatusReport {
        self.orchestrator.status()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(DaemonEvent::Shutdown).await;
    }

    fn flags_changed(&self) {
        // A full queue already has a pending refresh or response ahead of it.
        if self.tx.try_send(DaemonEvent::FlagsChanged).is_err() {
            debug!("Status refresh not queued");
        }
    }
}

/// Console commands understood by [`run_console`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Status,
    Connect,
    Disconnect,
    ToggleDatabase,
    ToggleBroker,
    ToggleEject,
    Help,
    Exit,
}

pub fn parse_command(line: &str) -> Option<Command> {
    let words: Vec<String> = line.split_whitespace().map(str::to_lowercase).collect();
    let words: Vec<&str> = words.iter().map(String::as_str).collect();
    match words.as_slice() {
        ["status"] => Some(Command::Status),
        ["connect"] => Some(Command::Connect),
        ["disconnect"] | ["eject"] => Some(Command::Disconnect),
        ["toggle", "database" | "db"] => Some(Command::ToggleDatabase),
        ["toggle", "broker"] => Some(Command::ToggleBroker),
        ["toggle", "eject"] => Some(Command::ToggleEject),
        ["help"] | ["?"] => Some(Command::Help),
        ["exit"] | ["quit"] => Some(Command::Exit),
        _ => None,
    }
}

const HELP: &str = "commands: status | connect | disconnect | toggle database|broker|eject | exit";

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

/// Reads lines from `reader` on a dedicated OS thread and forwards them.
///
/// The blocking read lives outside the tokio runtime, so a read still pending
/// at shutdown never holds the process open.  The channel closes on EOF.
pub fn spawn_line_reader<R>(reader: R) -> mpsc::Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CONSOLE_CAPACITY);
    let spawned = std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Console input failed: {e}");
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Console unavailable: {e}");
    }
    rx
}

/// Runs console commands until `lines` closes or `exit` is entered.
///
/// EOF (no console attached) ends the front-end but leaves the daemon running.
pub async fn run_console(shell: ShellHandle, mut lines: mpsc::Receiver<String>) {
    println!("{HELP}");

    while let Some(line) = lines.recv().await {
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Some(Command::Status) => {
                let report = shell.request_status();
                let flags = shell.flags();
                println!("{}", report.volume_text());
                println!("{}", report.database_text());
                println!("{}", report.broker_text());
                println!(
                    "auto database: {}, auto broker: {}, auto eject: {}",
                    on_off(flags.auto_start_database),
                    on_off(flags.auto_start_broker),
                    on_off(flags.auto_eject)
                );
            }
            Some(Command::Connect) => {
                if !shell.force_connect().await {
                    break;
                }
            }
            Some(Command::Disconnect) => {
                if !shell.force_disconnect().await {
                    break;
                }
            }
            Some(Command::ToggleDatabase) => {
                println!("auto database: {}", on_off(shell.toggle_database_automation()));
            }
            Some(Command::ToggleBroker) => {
                println!("auto broker: {}", on_off(shell.toggle_broker_automation()));
            }
            Some(Command::ToggleEject) => {
                println!("auto eject: {}", on_off(shell.toggle_auto_eject()));
            }
            Some(Command::Help) => println!("{HELP}"),
            Some(Command::Exit) => {
                shell.shutdown().await;
                break;
            }
            None => println!("unknown command '{}'; {HELP}", line.trim()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor, Read};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use crate::ejector::tests::FakeOpener;
    use crate::ejector::VolumeEjector;
    use crate::monitor::tests::SwitchProbe;
    use crate::monitor::VolumePresence;
    use crate::orchestrator::AutomationFlags;
    use crate::service::tests::FakeManager;
    use crate::service::{ServiceController, ServiceState};

    fn shell(capacity: usize) -> (ShellHandle, mpsc::Receiver<DaemonEvent>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let probe = Arc::new(SwitchProbe::default());
        let manager = Arc::new(FakeManager::new(ServiceState::Stopped, Arc::clone(&log)));
        let wait = Duration::from_millis(5);
        let orchestrator = Orchestrator::new(
            AutomationFlags::default(),
            VolumePresence::new(r"E:\Databases", probe).unwrap(),
            ServiceController::new("MsSqlServer", "MsSql", manager.clone()).with_wait(wait, wait),
            ServiceController::new("RabbitMQ", "RabbitMQ", manager).with_wait(wait, wait),
            VolumeEjector::new(Arc::new(FakeOpener::healthy(log))),
        );
        let (tx, rx) = mpsc::channel(capacity);
        (ShellHandle::new(Arc::new(orchestrator), tx), rx)
    }

    // ── parse_command ─────────────────────────────────────────────────────────

    #[test]
    fn parses_known_commands() {
        assert_eq!(parse_command("status"), Some(Command::Status));
        assert_eq!(parse_command("  Connect "), Some(Command::Connect));
        assert_eq!(parse_command("disconnect"), Some(Command::Disconnect));
        assert_eq!(parse_command("eject"), Some(Command::Disconnect));
        assert_eq!(parse_command("toggle db"), Some(Command::ToggleDatabase));
        assert_eq!(parse_command("TOGGLE database"), Some(Command::ToggleDatabase));
        assert_eq!(parse_command("toggle broker"), Some(Command::ToggleBroker));
        assert_eq!(parse_command("toggle   eject"), Some(Command::ToggleEject));
        assert_eq!(parse_command("quit"), Some(Command::Exit));
    }

    #[test]
    fn rejects_unknown_commands() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("toggle"), None);
        assert_eq!(parse_command("toggle volume"), None);
        assert_eq!(parse_command("status now"), None);
    }

    // ── ShellHandle ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn toggles_apply_immediately_and_queue_a_refresh() {
        let (shell, mut rx) = shell(8);

        assert!(!shell.toggle_database_automation());
        assert!(!shell.flags().auto_start_database);
        assert!(matches!(rx.recv().await, Some(DaemonEvent::FlagsChanged)));
    }

    #[tokio::test]
    async fn toggle_with_full_queue_still_applies() {
        let (shell, _rx) = shell(1);
        shell.toggle_broker_automation();
        shell.toggle_auto_eject();
        let flags = shell.flags();
        assert!(!flags.auto_start_broker);
        assert!(!flags.auto_eject);
    }

    #[tokio::test]
    async fn force_intents_are_queued_in_order() {
        let (shell, mut rx) = shell(8);
        assert!(shell.force_connect().await);
        assert!(shell.force_disconnect().await);
        shell.shutdown().await;

        assert!(matches!(rx.recv().await, Some(DaemonEvent::ForceConnect)));
        assert!(matches!(rx.recv().await, Some(DaemonEvent::ForceDisconnect)));
        assert!(matches!(rx.recv().await, Some(DaemonEvent::Shutdown)));
    }

    #[tokio::test]
    async fn force_intent_reports_closed_daemon() {
        let (shell, rx) = shell(8);
        drop(rx);
        assert!(!shell.force_connect().await);
    }

    #[tokio::test]
    async fn request_status_is_live() {
        let (shell, _rx) = shell(8);
        let report = shell.request_status();
        assert!(!report.volume_connected);
        assert_eq!(report.database_text(), "MsSql: Stopped");
    }

    // ── console ───────────────────────────────────────────────────────────────

    /// Input that blocks until the test releases it, then reports EOF.
    struct PendingInput(std::sync::mpsc::Receiver<()>);

    impl Read for PendingInput {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[tokio::test]
    async fn line_reader_forwards_lines_then_closes() {
        let mut lines = spawn_line_reader(Cursor::new("status\ntoggle eject\n"));
        assert_eq!(lines.recv().await.as_deref(), Some("status"));
        assert_eq!(lines.recv().await.as_deref(), Some("toggle eject"));
        assert_eq!(lines.recv().await, None);
    }

    #[tokio::test]
    async fn console_applies_commands_and_queues_shutdown() {
        let (shell, mut rx) = shell(8);
        let lines = spawn_line_reader(Cursor::new("toggle eject\n\nbogus\nconnect\nexit\nstatus\n"));
        run_console(shell.clone(), lines).await;

        assert!(!shell.flags().auto_eject);
        assert!(matches!(rx.recv().await, Some(DaemonEvent::FlagsChanged)));
        assert!(matches!(rx.recv().await, Some(DaemonEvent::ForceConnect)));
        assert!(matches!(rx.recv().await, Some(DaemonEvent::Shutdown)));
    }

    #[test]
    fn runtime_shutdown_does_not_wait_for_pending_console_input() {
        let (release, pending) = std::sync::mpsc::channel::<()>();
        let (shell, _rx) = shell(8);
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let lines = spawn_line_reader(BufReader::new(PendingInput(pending)));
            tokio::spawn(run_console(shell, lines));
            tokio::time::sleep(Duration::from_millis(20)).await;
        });

        let started = Instant::now();
        drop(rt);
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(release);
    }
}
