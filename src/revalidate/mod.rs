//! Cache revalidation calls made after a successful pull
//!
//! Each configured target is told which paths to refresh. Every HTTP call
//! is recorded as an [`InvalidationAttempt`]; a failing call is logged and
//! recorded, never raised.

mod sender;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::types::{RevalidateAuth, RevalidateConfig, RevalidationTarget};
use crate::secrets::SecretString;
use crate::types::{InvalidationAttempt, RevalidationError};

use sender::RevalidationSender;

/// Issues the revalidation calls for every configured target
#[derive(Clone)]
pub struct RevalidationClient {
    sender: RevalidationSender,
    token: SecretString,
    targets: Vec<RevalidationTarget>,
}

impl RevalidationClient {
    pub fn new(config: &RevalidateConfig) -> Result<Self, RevalidationError> {
        Ok(Self {
            sender: RevalidationSender::new(config.timeout)?,
            token: config.token.clone(),
            targets: config.targets.clone(),
        })
    }

    pub fn targets(&self) -> &[RevalidationTarget] {
        &self.targets
    }

    /// Call every target in order and collect one attempt per HTTP call
    pub async fn revalidate_all(&self) -> Vec<InvalidationAttempt> {
        if self.token.is_empty() {
            warn!("No revalidation token configured, calling targets without credentials");
        }

        let mut attempts = Vec::new();
        for target in &self.targets {
            match target.auth {
                RevalidateAuth::Bearer => attempts.push(self.call_bearer(target).await),
                RevalidateAuth::Query => {
                    if target.paths.is_empty() {
                        attempts.push(self.call_query(target, None).await);
                    } else {
                        for path in &target.paths {
                            attempts.push(self.call_query(target, Some(path)).await);
                        }
                    }
                }
            }
        }

        let succeeded = attempts.iter().filter(|a| a.succeeded).count();
        info!(
            attempts = attempts.len(),
            succeeded = succeeded,
            "Cache revalidation finished"
        );
        attempts
    }

    async fn call_bearer(&self, target: &RevalidationTarget) -> InvalidationAttempt {
        let mut request = self
            .sender
            .post(&target.url)
            .json(&json!({ "paths": target.paths }));
        if !self.token.is_empty() {
            request = request.bearer_auth(self.token.expose());
        }

        debug!(url = %target.url, paths = ?target.paths, "Sending bearer revalidation");
        let result = self.sender.send(request).await;
        record_attempt(target.url.clone(), result)
    }

    async fn call_query(&self, target: &RevalidationTarget, path: Option<&str>) -> InvalidationAttempt {
        let mut query: Vec<(&str, &str)> = Vec::with_capacity(2);
        if !self.token.is_empty() {
            query.push(("secret", self.token.expose()));
        }
        if let Some(path) = path {
            query.push(("path", path));
        }

        let request = self.sender.post(&target.url).query(&query);
        let label = match path {
            Some(path) => format!("{} path={}", target.url, path),
            None => target.url.clone(),
        };

        debug!(endpoint = %label, "Sending query revalidation");
        let result = self.sender.send(request).await;
        record_attempt(label, result)
    }
}

fn record_attempt(target: String, result: Result<String, RevalidationError>) -> InvalidationAttempt {
    match result {
        Ok(body) => {
            info!(endpoint = %target, "Cache revalidated");
            InvalidationAttempt {
                target,
                succeeded: true,
                output: body,
            }
        }
        Err(e) => {
            warn!(endpoint = %target, error = %e, "Cache revalidation failed");
            InvalidationAttempt {
                target,
                succeeded: false,
                output: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::{RawQuery, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    /// A request seen by the stand-in revalidation endpoint
    #[derive(Debug, Clone)]
    pub(crate) struct Captured {
        pub path: &'static str,
        pub authorization: Option<String>,
        pub query: Option<String>,
        pub body: String,
    }

    pub(crate) type Log = Arc<Mutex<Vec<Captured>>>;

    async fn record(
        path: &'static str,
        log: Log,
        headers: HeaderMap,
        query: Option<String>,
        body: Bytes,
    ) {
        log.lock().unwrap().push(Captured {
            path,
            authorization: headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            query,
            body: String::from_utf8_lossy(&body).to_string(),
        });
    }

    /// Spawn an app with `/ok` answering 200 and `/fail` answering 500
    pub(crate) async fn spawn_revalidation_app() -> (SocketAddr, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));

        let app = Router::new()
            .route(
                "/ok",
                post(
                    |State(log): State<Log>, headers: HeaderMap, RawQuery(q): RawQuery, body: Bytes| async move {
                        record("/ok", log, headers, q, body).await;
                        (StatusCode::OK, r#"{"revalidated":true}"#)
                    },
                ),
            )
            .route(
                "/fail",
                post(
                    |State(log): State<Log>, headers: HeaderMap, RawQuery(q): RawQuery, body: Bytes| async move {
                        record("/fail", log, headers, q, body).await;
                        (StatusCode::INTERNAL_SERVER_ERROR, "boom")
                    },
                ),
            )
            .with_state(log.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (addr, log)
    }

    fn config(token: &str, targets: Vec<RevalidationTarget>) -> RevalidateConfig {
        RevalidateConfig {
            token: SecretString::new(token),
            timeout: 5,
            targets,
        }
    }

    fn target(url: String, auth: RevalidateAuth, paths: &[&str]) -> RevalidationTarget {
        RevalidationTarget {
            url,
            auth,
            paths: paths.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_bearer_target_sends_token_and_paths() {
        let (addr, log) = spawn_revalidation_app().await;
        let client = RevalidationClient::new(&config(
            "tok-123",
            vec![target(
                format!("http://{}/ok", addr),
                RevalidateAuth::Bearer,
                &["/", "/articles", "/docs"],
            )],
        ))
        .unwrap();

        let attempts = client.revalidate_all().await;

        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].succeeded);
        assert!(attempts[0].output.contains("revalidated"));

        let seen = log.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer tok-123"));
        let body: serde_json::Value = serde_json::from_str(&seen[0].body).unwrap();
        assert_eq!(body["paths"], json!(["/", "/articles", "/docs"]));
    }

    #[tokio::test]
    async fn test_query_target_calls_once_per_path() {
        let (addr, log) = spawn_revalidation_app().await;
        let client = RevalidationClient::new(&config(
            "s3",
            vec![target(
                format!("http://{}/ok", addr),
                RevalidateAuth::Query,
                &["/", "/blog"],
            )],
        ))
        .unwrap();

        let attempts = client.revalidate_all().await;

        assert_eq!(attempts.len(), 2);
        assert!(attempts.iter().all(|a| a.succeeded));
        assert!(attempts[1].target.ends_with("path=/blog"));

        let seen = log.lock().unwrap().clone();
        assert_eq!(seen[0].query.as_deref(), Some("secret=s3&path=%2F"));
        assert_eq!(seen[1].query.as_deref(), Some("secret=s3&path=%2Fblog"));
        assert!(seen.iter().all(|c| c.authorization.is_none()));
    }

    #[tokio::test]
    async fn test_failures_are_recorded_not_raised() {
        let (addr, log) = spawn_revalidation_app().await;
        let client = RevalidationClient::new(&config(
            "tok",
            vec![
                target(format!("http://{}/fail", addr), RevalidateAuth::Bearer, &["/"]),
                target(format!("http://{}/ok", addr), RevalidateAuth::Bearer, &["/"]),
            ],
        ))
        .unwrap();

        let attempts = client.revalidate_all().await;

        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].succeeded);
        assert!(attempts[0].output.contains("500"));
        assert!(attempts[1].succeeded);
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(log.lock().unwrap()[0].path, "/fail");
    }

    #[tokio::test]
    async fn test_empty_token_omits_credentials() {
        let (addr, log) = spawn_revalidation_app().await;
        let client = RevalidationClient::new(&config(
            "",
            vec![
                target(format!("http://{}/ok", addr), RevalidateAuth::Bearer, &["/"]),
                target(format!("http://{}/ok", addr), RevalidateAuth::Query, &[]),
            ],
        ))
        .unwrap();

        let attempts = client.revalidate_all().await;
        assert_eq!(attempts.len(), 2);

        let seen = log.lock().unwrap().clone();
        assert!(seen[0].authorization.is_none());
        assert_eq!(seen[1].query, None);
    }
}
