//! HTTP server setup and graceful shutdown
//!
//! This module provides the listener lifecycle: build state, bind (with port
//! reclaim), accept connections until the shutdown token fires, then drain
//! open connections within `server.shutdown_timeout`.
//!
//! Connections are served by hyper directly so the accept loop can hold a
//! `max_connections` permit per connection and arm the idle timer.

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use hyper::server::conn::http1;
use hyper_util::{
    rt::{TokioIo, TokioTimer},
    server::graceful::GracefulShutdown,
    service::TowerToHyperService,
};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::SystemConfig,
    http::{
        handlers::*,
        listener::bind_listener,
        middleware::{self, signature_middleware},
    },
    supervisor::Notifier,
    types::{ListenerState, ListenerStatus, Result},
};

/// Pause after a failed `accept()` (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Run the listener until `shutdown` is cancelled
#[instrument(skip_all)]
pub async fn start_server(
    config: Arc<SystemConfig>,
    status: ListenerStatus,
    notifier: Notifier,
    shutdown: CancellationToken,
) -> Result<()> {
    status.set(ListenerState::Starting);
    let app_state = Arc::new(AppState::new(config.clone(), status.clone())?);

    if !app_state.validator.is_enabled() {
        warn!("No webhook secret configured, deploy requests are not authenticated");
    } else if !config.security.enforce_signature {
        warn!("Signature enforcement disabled, unverified deploy requests will still run");
    }
    if config.revalidate.targets.is_empty() {
        info!("No revalidation targets configured");
    }

    let router = create_router(app_state.clone());
    let listener = bind_listener(&config.server).await?;
    let local_addr = listener.local_addr()?;

    status.set(ListenerState::Listening);
    info!(
        listen_addr = %local_addr,
        project_dir = %app_state.deployer.project_dir().display(),
        lock_policy = ?config.project.lock_policy,
        max_connections = config.server.max_connections,
        idle_timeout = config.server.idle_timeout,
        "Webhook listener running"
    );
    notifier.ready();

    let connections = serve_connections(
        listener,
        router,
        config.server.max_connections as usize,
        Duration::from_secs(config.server.idle_timeout),
        shutdown,
    )
    .await;

    status.set(ListenerState::ShuttingDown);
    notifier.stopping();
    info!(
        open_connections = connections.len(),
        "Shutdown signal received, draining connections"
    );

    let grace = Duration::from_secs(config.server.shutdown_timeout);
    if !connections.drain(grace).await {
        warn!(
            shutdown_timeout = grace.as_secs(),
            "Grace period elapsed, aborted remaining connections"
        );
    }

    status.set(ListenerState::Stopped);
    info!("HTTP server shutdown complete");
    Ok(())
}

/// Connections still being served when the accept loop stopped
pub(crate) struct OpenConnections {
    graceful: GracefulShutdown,
    tasks: JoinSet<()>,
}

impl OpenConnections {
    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Let in-flight requests finish and close the connections
    ///
    /// Returns `false` when `grace` ran out and the rest were aborted.
    pub(crate) async fn drain(self, grace: Duration) -> bool {
        let Self {
            graceful,
            mut tasks,
        } = self;

        let finished = tokio::time::timeout(grace, async {
            graceful.shutdown().await;
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if !finished {
            tasks.abort_all();
        }
        finished
    }
}

/// Accept connections until `shutdown` fires
///
/// At most `max_connections` are open at once; further clients wait in the
/// listen backlog. A connection that sends no request head for
/// `idle_timeout`, first request or between keep-alive requests, is closed.
pub(crate) async fn serve_connections(
    listener: TcpListener,
    router: Router,
    max_connections: usize,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) -> OpenConnections {
    let slots = Arc::new(Semaphore::new(max_connections));
    let graceful = GracefulShutdown::new();
    let mut tasks = JoinSet::new();

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(idle_timeout);

    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(_) = tasks.join_next(), if !tasks.is_empty() => continue,
            permit = slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };

        debug!(peer = %peer, "Accepted connection");
        let service = TowerToHyperService::new(router.clone());
        let connection =
            graceful.watch(builder.serve_connection(TokioIo::new(stream), service));

        tasks.spawn(async move {
            // Held for the connection's lifetime
            let _permit = permit;
            if let Err(e) = connection.await {
                debug!(peer = %peer, error = %e, "Connection closed with error");
            }
        });
    }

    OpenConnections { graceful, tasks }
}

/// Create the Axum router with the single endpoint and its middleware
///
/// The request deadline covers status reads. Deploys are bounded by the
/// pull and revalidation timeouts instead.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Only the deploy trigger reads and verifies the body
    let deploy = post(handle_deploy).layer(from_fn_with_state(
        app_state.clone(),
        signature_middleware,
    ));
    let status = get(handle_status).layer(from_fn_with_state(
        app_state.clone(),
        middleware::request_timeout_middleware,
    ));

    Router::new()
        .route(
            "/",
            status.merge(deploy).fallback(handle_method_not_allowed),
        )
        .fallback(handle_not_found)
        .layer(middleware::trace_layer())
        .with_state(app_state)
}
