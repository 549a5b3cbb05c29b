//! Background tasks
//!
//! The liveness ticker pings the supervisor on a fixed interval, independent
//! of request traffic, until shutdown is requested.

use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::types::SupervisorConfig;
use crate::supervisor::Notifier;

/// Start the liveness ticker
///
/// Returns `None` when the watchdog is disabled in configuration.
pub fn spawn_liveness_task(
    config: &SupervisorConfig,
    notifier: Notifier,
    shutdown: CancellationToken,
) -> Option<tokio::task::JoinHandle<()>> {
    if !config.watchdog {
        info!("Supervisor watchdog disabled");
        return None;
    }

    let period = Duration::from_secs(config.watchdog_interval.max(1));
    info!(
        interval_seconds = period.as_secs(),
        notify_socket = notifier.is_enabled(),
        "Starting liveness background task"
    );

    Some(tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Liveness task stopping");
                    break;
                }
                _ = tick.tick() => {
                    if notifier.is_enabled() {
                        notifier.watchdog();
                    } else {
                        debug!("Liveness heartbeat");
                    }
                }
            }
        }
    }))
}
