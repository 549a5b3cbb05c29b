//! TCP listener setup with port reclaim
//!
//! When the configured port is taken, the processes listening on it are
//! asked to exit with SIGTERM and the bind is retried exactly once.

use std::{io, net::SocketAddr, time::Duration};
use tokio::{
    net::{TcpListener, TcpSocket},
    process::Command,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::ServerConfig,
    types::{ConfigError, Error, Result},
};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Bind the listener described by `config`
pub async fn bind_listener(config: &ServerConfig) -> Result<TcpListener> {
    let addr = parse_listen_address(&config.listen_address())?;

    match bind_once(addr, config.backlog) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse && config.reclaim_port => {
            warn!(addr = %addr, "Port already in use, attempting to reclaim it");
            let signalled = reclaim_port(addr.port()).await;
            info!(
                port = addr.port(),
                signalled = signalled,
                delay_ms = config.reclaim_delay_ms,
                "Waiting before retrying bind"
            );
            tokio::time::sleep(Duration::from_millis(config.reclaim_delay_ms)).await;

            bind_once(addr, config.backlog).map_err(|e| {
                error!(addr = %addr, error = %e, "Port still unavailable after reclaim");
                Error::Bind {
                    addr: addr.to_string(),
                    source: e,
                }
            })
        }
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind to address");
            Err(Error::Bind {
                addr: addr.to_string(),
                source: e,
            })
        }
    }
}

fn parse_listen_address(listen: &str) -> Result<SocketAddr> {
    listen.parse().map_err(|e| {
        Error::Config(ConfigError::Invalid {
            message: format!("Invalid listen address '{}': {}", listen, e),
        })
    })
}

fn bind_once(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// SIGTERM every other process listening on `port`; returns how many were signalled
async fn reclaim_port(port: u16) -> usize {
    let mut pids = discover(
        "lsof",
        &["-t".to_string(), format!("-iTCP:{}", port), "-sTCP:LISTEN".to_string()],
    )
    .await;
    if pids.is_empty() {
        pids = discover("fuser", &[format!("{}/tcp", port)]).await;
    }

    if pids.is_empty() {
        warn!(port = port, "No process found holding the port");
        return 0;
    }

    let mut signalled = 0;
    for pid in pids {
        // SAFETY: kill(2) with a positive pid only sends a signal
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc == 0 {
            info!(pid = pid, port = port, "Sent SIGTERM to process holding the port");
            signalled += 1;
        } else {
            warn!(
                pid = pid,
                error = %io::Error::last_os_error(),
                "Failed to signal process holding the port"
            );
        }
    }
    signalled
}

async fn discover(program: &str, args: &[String]) -> Vec<libc::pid_t> {
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(DISCOVERY_TIMEOUT, output).await {
        Ok(Ok(output)) => parse_pids(&String::from_utf8_lossy(&output.stdout)),
        Ok(Err(e)) => {
            debug!(program = program, error = %e, "Port owner lookup unavailable");
            Vec::new()
        }
        Err(_) => {
            debug!(program = program, "Port owner lookup timed out");
            Vec::new()
        }
    }
}

/// Extract PIDs from `lsof -t` / `fuser` output, excluding our own
fn parse_pids(output: &str) -> Vec<libc::pid_t> {
    let own = std::process::id() as libc::pid_t;
    let mut pids: Vec<libc::pid_t> = output
        .split_whitespace()
        .filter_map(|token| token.trim_end_matches(|c: char| c.is_ascii_alphabetic()).parse().ok())
        .filter(|pid| *pid > 1 && *pid != own)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}
