//! Service manager notifications over `$NOTIFY_SOCKET`
//!
//! Sends the `READY=1`, `WATCHDOG=1` and `STOPPING=1` datagrams understood by
//! systemd. Without a socket every call is a no-op.

use std::io;
use std::os::unix::net::UnixDatagram;
use tracing::{debug, warn};

pub const READY: &str = "READY=1";
pub const WATCHDOG: &str = "WATCHDOG=1";
pub const STOPPING: &str = "STOPPING=1";

/// Handle on the supervisor's notification socket
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    socket_path: Option<String>,
}

impl Notifier {
    /// Use `$NOTIFY_SOCKET` if set
    pub fn from_env() -> Self {
        Self::new(std::env::var("NOTIFY_SOCKET").ok())
    }

    pub fn new(socket_path: Option<String>) -> Self {
        Self {
            socket_path: socket_path.filter(|p| !p.is_empty()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.socket_path.is_some()
    }

    /// Send one state string; `Ok(false)` when there is no socket
    pub fn notify(&self, state: &str) -> io::Result<bool> {
        let Some(path) = &self.socket_path else {
            return Ok(false);
        };
        send(path, state)?;
        debug!(state = %state, "Notified supervisor");
        Ok(true)
    }

    pub fn ready(&self) {
        self.notify_logged(READY);
    }

    pub fn watchdog(&self) {
        self.notify_logged(WATCHDOG);
    }

    pub fn stopping(&self) {
        self.notify_logged(STOPPING);
    }

    fn notify_logged(&self, state: &str) {
        if let Err(e) = self.notify(state) {
            warn!(state = %state, error = %e, "Failed to notify supervisor");
        }
    }
}

fn send(path: &str, message: &str) -> io::Result<()> {
    let socket = UnixDatagram::unbound()?;

    if let Some(name) = path.strip_prefix('@') {
        return send_abstract(&socket, name, message);
    }

    socket.send_to(message.as_bytes(), path)?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn send_abstract(socket: &UnixDatagram, name: &str, message: &str) -> io::Result<()> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr;

    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    socket.send_to_addr(message.as_bytes(), &addr)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn send_abstract(_socket: &UnixDatagram, _name: &str, _message: &str) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract notify sockets are only available on Linux",
    ))
}
