/// Raw "some volume changed" signals.
///
/// On Windows the preferred source is a hidden top-level window, owned by a
/// dedicated OS thread with its own message pump, that receives the
/// `WM_DEVICECHANGE` broadcasts Windows sends when volumes arrive or leave.
/// The signal carries no payload: the consumer re-derives the state itself.
///
/// Where push notifications are unavailable (other platforms, or the window
/// could not be created) the subscription falls back to a fixed-interval poll,
/// so worst-case detection latency equals the poll interval.
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Capacity of the raw signal channel.  Signals beyond this are dropped; the
/// consumer only needs to know that *something* changed.
const SIGNAL_CAPACITY: usize = 16;

/// Where raw volume-change signals come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    /// OS push notifications, falling back to polling at the given interval.
    DeviceNotifications { fallback_interval: Duration },
    /// Emit a signal on every tick of the given interval.
    Poll(Duration),
}

/// Keeps the signal producer alive; dropping it tears the producer down.
pub struct SubscriptionGuard {
    kind: GuardKind,
}

enum GuardKind {
    Poll(JoinHandle<()>),
    #[cfg(windows)]
    Window(imp::WindowPump),
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        match &mut self.kind {
            GuardKind::Poll(handle) => handle.abort(),
            #[cfg(windows)]
            GuardKind::Window(pump) => pump.stop(),
        }
        debug!("Volume change subscription released");
    }
}

/// Subscribes to `source`.  Must be called from within a tokio runtime.
pub fn subscribe(source: SignalSource) -> (mpsc::Receiver<()>, SubscriptionGuard) {
    let (tx, rx) = mpsc::channel(SIGNAL_CAPACITY);
    let kind = match source {
        SignalSource::Poll(interval) => GuardKind::Poll(spawn_poll(interval, tx)),
        SignalSource::DeviceNotifications { fallback_interval } => {
            device_notifications(tx, fallback_interval)
        }
    };
    (rx, SubscriptionGuard { kind })
}

#[cfg(windows)]
fn device_notifications(tx: mpsc::Sender<()>, fallback_interval: Duration) -> GuardKind {
    match imp::WindowPump::spawn(tx.clone()) {
        Ok(pump) => GuardKind::Window(pump),
        Err(e) => {
            warn!(
                "Device notifications unavailable ({e}); polling every {}ms",
                fallback_interval.as_millis()
            );
            GuardKind::Poll(spawn_poll(fallback_interval, tx))
        }
    }
}

#[cfg(not(windows))]
fn device_notifications(tx: mpsc::Sender<()>, fallback_interval: Duration) -> GuardKind {
    warn!(
        "Device notifications are Windows-only; polling every {}ms",
        fallback_interval.as_millis()
    );
    GuardKind::Poll(spawn_poll(fallback_interval, tx))
}

fn spawn_poll(interval: Duration, tx: mpsc::Sender<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    })
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::cell::RefCell;
    use std::sync::mpsc as std_mpsc;

    use tokio::sync::mpsc;
    use tracing::debug;
    use windows::core::w;
    use windows::Win32::Foundation::{HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows::Win32::System::Threading::GetCurrentThreadId;
    use windows::Win32::UI::WindowsAndMessaging::{
        CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW,
        PostThreadMessageW, RegisterClassW, MSG, WINDOW_EX_STYLE, WINDOW_STYLE, WM_DEVICECHANGE,
        WM_QUIT, WNDCLASSW,
    };

    use crate::error::{Error, Result};

    thread_local! {
        /// Sender used by the window procedure; set once on the pump thread.
        static SIGNAL_TX: RefCell<Option<mpsc::Sender<()>>> = const { RefCell::new(None) };
    }

    /// The notification window's pump thread.
    pub struct WindowPump {
        thread: Option<std::thread::JoinHandle<()>>,
        thread_id: u32,
    }

    impl WindowPump {
        /// Starts the pump thread and waits until its window exists.
        pub fn spawn(tx: mpsc::Sender<()>) -> Result<Self> {
            let (ready_tx, ready_rx) = std_mpsc::sync_channel::<std::result::Result<u32, String>>(1);
            let thread = std::thread::Builder::new()
                .name("volume-notify".into())
                .spawn(move || run_message_pump(tx, ready_tx))
                .map_err(|e| Error::os("spawn", "volume-notify", e))?;

            match ready_rx.recv() {
                Ok(Ok(thread_id)) => Ok(Self {
                    thread: Some(thread),
                    thread_id,
                }),
                Ok(Err(message)) => {
                    let _ = thread.join();
                    Err(Error::os("CreateWindowExW", "volume-notify", message))
                }
                Err(e) => Err(Error::os("spawn", "volume-notify", e)),
            }
        }

        /// Posts `WM_QUIT` to the pump thread and joins it.  Idempotent.
        pub fn stop(&mut self) {
            if let Some(thread) = self.thread.take() {
                unsafe {
                    let _ = PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
                }
                let _ = thread.join();
            }
        }
    }

    unsafe extern "system" fn wnd_proc(
        hwnd: HWND,
        msg: u32,
        w_param: WPARAM,
        l_param: LPARAM,
    ) -> LRESULT {
        if msg == WM_DEVICECHANGE {
            SIGNAL_TX.with(|slot| {
                if let Some(tx) = slot.borrow().as_ref() {
                    // A full channel already holds an unprocessed signal.
                    let _ = tx.try_send(());
                }
            });
            return LRESULT(1);
        }
        DefWindowProcW(hwnd, msg, w_param, l_param)
    }

    /// Creates the hidden window and pumps messages until `WM_QUIT`.
    ///
    /// Reports the thread ID (or the creation error) on `ready_tx` before
    /// entering the pump.  The window is top-level because message-only
    /// windows do not receive broadcasts.
    fn run_message_pump(
        tx: mpsc::Sender<()>,
        ready_tx: std_mpsc::SyncSender<std::result::Result<u32, String>>,
    ) {
        SIGNAL_TX.with(|slot| *slot.borrow_mut() = Some(tx));

        unsafe {
            let instance: HINSTANCE = match GetModuleHandleW(None) {
                Ok(module) => module.into(),
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };

            let class_name = w!("UsbWatchVolumeSink");
            let class = WNDCLASSW {
                lpfnWndProc: Some(wnd_proc),
                hInstance: instance,
                lpszClassName: class_name,
                ..Default::default()
            };
            // Returns 0 when the class is already registered by an earlier pump;
            // CreateWindowExW below is the real check.
            RegisterClassW(&class);

            let hwnd = CreateWindowExW(
                WINDOW_EX_STYLE::default(),
                class_name,
                w!("usbwatch"),
                WINDOW_STYLE::default(),
                0,
                0,
                0,
                0,
                None,
                None,
                instance,
                None,
            );
            if hwnd == HWND::default() {
                let _ = ready_tx.send(Err(windows::core::Error::from_win32().to_string()));
                return;
            }

            let _ = ready_tx.send(Ok(GetCurrentThreadId()));
            drop(ready_tx);

            let mut msg = MSG::default();
            // GetMessageW: >0 = message, 0 = WM_QUIT, <0 = error.
            while GetMessageW(&mut msg, None, 0, 0).0 > 0 {
                DispatchMessageW(&msg);
            }

            let _ = DestroyWindow(hwnd);
        }
        SIGNAL_TX.with(|slot| slot.borrow_mut().take());
        debug!("Device notification thread exited");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn poll_source_emits_signals() {
        let (mut rx, _guard) = subscribe(SignalSource::Poll(Duration::from_millis(5)));
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("poll signal within a second")
                .expect("channel open");
        }
    }

    #[tokio::test]
    async fn dropping_guard_closes_the_channel() {
        let (mut rx, guard) = subscribe(SignalSource::Poll(Duration::from_millis(5)));
        drop(guard);
        // Drain anything already queued; the sender is gone once the task is aborted.
        let closed = tokio::time::timeout(Duration::from_secs(1), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "channel should close after the guard is dropped");
    }

    #[cfg(not(windows))]
    #[tokio::test]
    async fn device_notifications_fall_back_to_polling() {
        let source = SignalSource::DeviceNotifications {
            fallback_interval: Duration::from_millis(5),
        };
        let (mut rx, _guard) = subscribe(source);
        let signal = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(matches!(signal, Ok(Some(()))));
    }

    #[cfg(windows)]
    #[tokio::test]
    async fn window_pump_starts_and_stops() {
        let source = SignalSource::DeviceNotifications {
            fallback_interval: Duration::from_secs(60),
        };
        let (_rx, guard) = subscribe(source);
        drop(guard);
    }
}
