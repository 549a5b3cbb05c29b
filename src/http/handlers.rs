//! HTTP endpoint handlers
//!
//! `GET /` reports listener status and never touches the executor.
//! `POST /` runs a deployment under the deploy lock and maps its result. The
//! deployment runs in its own task and is not subject to the request deadline.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use std::{sync::Arc, time::Duration, time::Instant};
use tracing::{debug, error, info};

use crate::{
    config::SystemConfig,
    deployment::DeploymentExecutor,
    http::{
        middleware::{HmacValidator, SignatureCheck},
        responses::*,
    },
    state::DeployLock,
    types::{Error, ListenerStatus, Result},
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SystemConfig>,
    pub start_time: Instant,
    pub status: ListenerStatus,
    pub deployer: DeploymentExecutor,
    pub deploy_lock: DeployLock,
    pub validator: HmacValidator,
    pub max_request_bytes: usize,
}

impl AppState {
    pub fn new(config: Arc<SystemConfig>, status: ListenerStatus) -> Result<Self> {
        Ok(Self {
            deployer: DeploymentExecutor::new(&config)?,
            deploy_lock: DeployLock::new(config.project.lock_policy),
            validator: HmacValidator::new(config.security.webhook_secret.clone()),
            max_request_bytes: config.server.max_request_bytes()?,
            start_time: Instant::now(),
            status,
            config,
        })
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.config.server.idle_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.server.request_timeout)
    }
}

/// GET / - Listener status
pub async fn handle_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: state.status.get().describe().to_string(),
        port: state.config.server.port,
        timestamp: Utc::now().to_rfc3339(),
        project_dir: state.deployer.project_dir().display().to_string(),
        uptime: state.start_time.elapsed().as_secs(),
    })
}

/// POST / - Trigger a deployment
pub async fn handle_deploy(
    State(state): State<Arc<AppState>>,
    check: Option<Extension<SignatureCheck>>,
) -> Response {
    let deploy_id = DeploymentExecutor::generate_deploy_id();
    let check = check.map(|Extension(c)| c);
    info!(
        deploy_id = %deploy_id,
        signature = ?check,
        trusted = check.is_some_and(|c| c.is_trusted()),
        lock_policy = ?state.deploy_lock.policy(),
        "Received deployment request"
    );

    // Detached so neither a client disconnect nor a deadline can kill a running pull
    let deploy = tokio::spawn(async move {
        let guard = state.deploy_lock.acquire(&deploy_id).await?;
        debug!(deploy_id = %deploy_id, locked = guard.is_held(), "Deploy lock acquired");
        Ok::<_, Error>(state.deployer.execute(deploy_id).await)
    });

    match deploy.await {
        Ok(Ok(result)) => deployment_response(result),
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            error!(error = %e, "Deployment task failed");
            Error::Application(format!("Deployment task failed: {}", e)).into_response()
        }
    }
}

/// Fallback for unknown paths
pub async fn handle_not_found() -> impl IntoResponse {
    let error_response = ErrorResponse::with_message("Endpoint not found", "NOT_FOUND");
    (StatusCode::NOT_FOUND, Json(error_response))
}

/// Fallback for unsupported methods on a known path
pub async fn handle_method_not_allowed() -> impl IntoResponse {
    let error_response = ErrorResponse::with_message("Method not allowed", "METHOD_NOT_ALLOWED");
    (StatusCode::METHOD_NOT_ALLOWED, Json(error_response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockPolicy;
    use crate::deployment::tests::test_config;
    use crate::http::server::create_router;
    use crate::revalidate::tests::spawn_revalidation_app;
    use crate::types::ListenerState;
    use axum::{body::Body, http::Request, Router};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn app_for(config: SystemConfig) -> (Arc<AppState>, Router) {
        let state = Arc::new(AppState::new(Arc::new(config), ListenerStatus::new()).unwrap());
        state.status.set(ListenerState::Listening);
        let router = create_router(state.clone());
        (state, router)
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get_root() -> Request<Body> {
        Request::builder().uri("/").body(Body::empty()).unwrap()
    }

    fn post_empty_object() -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_reports_configured_port() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path(), "true", "http://127.0.0.1:9/".into());
        config.server.port = 9090;
        let (_, router) = app_for(config);

        let (status, body) = send(router, get_root()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["port"], 9090);
        assert_eq!(body["status"], "Webhook listener running");
        assert_eq!(body["project_dir"], dir.path().display().to_string());
        assert!(body["timestamp"].is_string());
        assert!(body["uptime"].is_u64());
    }

    #[tokio::test]
    async fn test_status_never_runs_the_pull() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("pulled");
        let script = format!("touch {}", marker.display());
        let (_, router) = app_for(test_config(dir.path(), &script, "http://127.0.0.1:9/".into()));

        let (status, _) = send(router, get_root()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_unsigned_post_without_secret_succeeds() {
        let dir = tempdir().unwrap();
        let (addr, log) = spawn_revalidation_app().await;
        let (_, router) = app_for(test_config(
            dir.path(),
            "echo 'Already up to date.'",
            format!("http://{}/ok", addr),
        ));

        let (status, body) = send(router, post_empty_object()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["cache_invalidation"][0]["succeeded"], true);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_revalidation_still_succeeds() {
        let dir = tempdir().unwrap();
        let (addr, _log) = spawn_revalidation_app().await;
        let (_, router) = app_for(test_config(
            dir.path(),
            "true",
            format!("http://{}/fail", addr),
        ));

        let (status, body) = send(router, post_empty_object()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["cache_invalidation"][0]["succeeded"], false);
    }

    #[tokio::test]
    async fn test_missing_project_dir_is_500() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("myblog");
        let (_, router) = app_for(test_config(&missing, "true", "http://127.0.0.1:9/".into()));

        let (status, body) = send(router, post_empty_object()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let message = body["error"].as_str().unwrap();
        assert!(message.contains(&missing.display().to_string()));
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_failed_pull_returns_captured_output() {
        let dir = tempdir().unwrap();
        let (addr, log) = spawn_revalidation_app().await;
        let (_, router) = app_for(test_config(
            dir.path(),
            "printf 'fatal: not a git repository' >&2; exit 1",
            format!("http://{}/ok", addr),
        ));

        let (status, body) = send(router, post_empty_object()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({
                "error": "Git pull failed",
                "stdout": "",
                "stderr": "fatal: not a git repository"
            })
        );
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_deploys_both_succeed() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path(), "echo 'Already up to date.'", String::new());
        config.revalidate.targets.clear();
        let (_, router) = app_for(config);

        let (first, _) = send(router.clone(), post_empty_object()).await;
        let (second, _) = send(router, post_empty_object()).await;
        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reject_policy_returns_409_while_busy() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path(), "true", "http://127.0.0.1:9/".into());
        config.project.lock_policy = LockPolicy::Reject;
        let (state, router) = app_for(config);

        let _held = state.deploy_lock.acquire("deploy-running").await.unwrap();
        let (status, body) = send(router, post_empty_object()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "DEPLOYMENT_IN_PROGRESS");
    }

    #[tokio::test]
    async fn test_concurrent_status_requests() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path(), "true", "http://127.0.0.1:9/".into());
        config.server.port = 9191;
        config.server.max_connections = 4;
        let (_, router) = app_for(config);

        let mut set = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let router = router.clone();
            set.spawn(async move { send(router, get_root()).await });
        }

        let mut seen = 0;
        while let Some(joined) = set.join_next().await {
            let (status, body) = joined.unwrap();
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["port"], 9191);
            seen += 1;
        }
        assert_eq!(seen, 16);
    }

    #[tokio::test]
    async fn test_queued_deploy_completes_past_request_deadline() {
        let dir = tempdir().unwrap();
        let count = dir.path().join("count");
        let script = format!("sleep 1.5; echo x >> {}", count.display());
        let mut config = test_config(dir.path(), &script, "http://127.0.0.1:9/".into());
        config.revalidate.targets.clear();
        config.server.request_timeout = 2;
        let (_, router) = app_for(config);

        // The second deploy waits for the lock, so it finishes after the deadline
        let (first, second) = tokio::join!(
            send(router.clone(), post_empty_object()),
            send(router, post_empty_object())
        );
        assert_eq!(first.0, StatusCode::OK);
        assert_eq!(second.0, StatusCode::OK);
        assert_eq!(first.1["success"], true);
        assert_eq!(second.1["success"], true);

        let lines = std::fs::read_to_string(&count).unwrap();
        assert_eq!(lines.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_deploy_survives_dropped_request() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("pulled");
        let script = format!("sleep 1; touch {}", marker.display());
        let mut config = test_config(dir.path(), &script, "http://127.0.0.1:9/".into());
        config.revalidate.targets.clear();
        let (_, router) = app_for(config);

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            router.oneshot(post_empty_object()),
        )
        .await;
        assert!(abandoned.is_err());

        let mut pulled = false;
        for _ in 0..50 {
            if marker.exists() {
                pulled = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        assert!(pulled, "pull was cancelled with the request");
    }
}
