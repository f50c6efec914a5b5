use crate::monitor::ConnectionEvent;

/// Work items for the daemon's single event loop, handled strictly in order.
pub enum DaemonEvent {
    /// The monitor confirmed a connect/disconnect transition.
    VolumeChanged(ConnectionEvent),
    /// User asked to run the connect response now.
    ForceConnect,
    /// User asked to run the disconnect response now.
    ForceDisconnect,
    /// An automation flag changed; refresh the status file.
    FlagsChanged,
    /// Exit requested (shell command or Ctrl+C).
    Shutdown,
}
