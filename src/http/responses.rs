//! JSON bodies returned by the listener
//!
//! Every POST response carries either a `success` or an `error` key.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::types::{DeploymentResult, Error, InvalidationAttempt, PullFailure};

/// GET / body
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub port: u16,
    pub timestamp: String,
    pub project_dir: String,
    /// Seconds since the listener started
    pub uptime: u64,
}

/// Successful deployment
#[derive(Debug, Serialize)]
pub struct DeploySuccessResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: String,
    pub deploy_id: String,
    pub duration_ms: u64,
    pub cache_invalidation: Vec<InvalidationAttempt>,
}

/// Pull ran but failed or timed out
#[derive(Debug, Serialize)]
pub struct PullFailureResponse {
    pub error: String,
    pub stdout: String,
    pub stderr: String,
}

/// Standard error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, String>>,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &Error) -> Self {
        Self::with_message(error.to_string(), error_to_code(error))
    }

    pub fn with_message(message: impl Into<String>, code: &str) -> Self {
        Self {
            error: message.into(),
            code: code.to_string(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: BTreeMap<String, String>) -> Self {
        self.details = Some(details);
        self
    }
}

/// Build the HTTP response for a finished deployment
pub fn deployment_response(result: DeploymentResult) -> Response {
    match result.pull_failure {
        None if result.pull_succeeded => {
            let body = DeploySuccessResponse {
                success: true,
                message: "Deployment completed".to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                deploy_id: result.deploy_id,
                duration_ms: result.duration_ms,
                cache_invalidation: result.cache_invalidation_attempts,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Some(PullFailure::Launch(message)) => {
            let body = ErrorResponse::with_message(message, "PULL_LAUNCH_FAILED").with_details(
                BTreeMap::from([("deploy_id".to_string(), result.deploy_id)]),
            );
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
        _ => {
            let body = PullFailureResponse {
                error: "Git pull failed".to_string(),
                stdout: result.pull_stdout,
                stderr: result.pull_stderr,
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

/// Convert error types to error codes
fn error_to_code(error: &Error) -> &'static str {
    match error {
        Error::Config(_) => "CONFIG_ERROR",
        Error::Execution(_) => "EXECUTION_ERROR",
        Error::Revalidation(_) => "REVALIDATION_ERROR",
        Error::Bind { .. } => "BIND_ERROR",
        Error::DeploymentInProgress { .. } => "DEPLOYMENT_IN_PROGRESS",
        Error::Validation { .. } => "VALIDATION_ERROR",
        Error::Io(_) => "IO_ERROR",
        Error::Application(_) => "APPLICATION_ERROR",
    }
}

/// Convert error types to HTTP status codes
pub fn error_to_status_code(error: &Error) -> StatusCode {
    match error {
        Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Error::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Error::Revalidation(_) => StatusCode::BAD_GATEWAY,
        Error::Bind { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        Error::DeploymentInProgress { .. } => StatusCode::CONFLICT,
        Error::Validation { .. } => StatusCode::BAD_REQUEST,
        Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Error::Application(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Implement IntoResponse for Error types to automatically convert them to HTTP responses
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code = error_to_status_code(&self);
        let error_response = ErrorResponse::new(&self);
        (status_code, Json(error_response)).into_response()
    }
}
