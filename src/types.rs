use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Revalidation error: {0}")]
    Revalidation(#[from] RevalidationError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Deployment {held_by} is already in progress")]
    DeploymentInProgress { held_by: String },

    #[error("Validation failed: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Application error: {0}")]
    Application(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    FileNotFound { path: String },

    #[error("Config file parse error: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid value for {variable}: {message}")]
    InvalidEnv { variable: String, message: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Errors from running an external command.
///
/// Every variant is a distinct outcome the caller has to classify; none of them
/// take the process down.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Working directory '{path}' does not exist")]
    MissingWorkingDir { path: String },

    #[error("Command '{command}' could not be started: {source}")]
    StartFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' timed out after {timeout}s")]
    Timeout { command: String, timeout: u64 },

    #[error("Command '{command}' failed with exit code {code}")]
    NonZeroExit {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Command '{command}' was terminated by a signal")]
    Terminated {
        command: String,
        stdout: String,
        stderr: String,
    },
}

/// Errors from an outbound cache revalidation call
#[derive(Error, Debug)]
pub enum RevalidationError {
    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(String),

    #[error("Revalidation request timed out after {0}s")]
    Timeout(u64),

    #[error("Revalidation request failed: {0}")]
    Request(String),

    #[error("Revalidation endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Type alias for Results
pub type Result<T> = std::result::Result<T, Error>;

/// Captured output of a command that exited successfully
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    pub command: Vec<String>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Why a pull did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PullFailure {
    /// The command never ran (missing directory, binary not found)
    Launch(String),
    /// The command exceeded its timeout and was killed
    TimedOut(u64),
    /// The command ran and exited non-zero (None when killed by a signal)
    Exited(Option<i32>),
}

/// One outbound cache invalidation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidationAttempt {
    pub target: String,
    pub succeeded: bool,
    pub output: String,
}

/// Outcome of one deploy attempt
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResult {
    pub deploy_id: String,
    pub pull_succeeded: bool,
    pub pull_stdout: String,
    pub pull_stderr: String,
    pub pull_exit_code: Option<i32>,
    pub pull_failure: Option<PullFailure>,
    pub cache_invalidation_attempts: Vec<InvalidationAttempt>,
    pub duration_ms: u64,
}

impl DeploymentResult {
    /// Create an empty result for the given deployment
    pub fn new(deploy_id: String) -> Self {
        Self {
            deploy_id,
            pull_succeeded: false,
            pull_stdout: String::new(),
            pull_stderr: String::new(),
            pull_exit_code: None,
            pull_failure: None,
            cache_invalidation_attempts: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Number of invalidation calls that succeeded
    pub fn invalidations_succeeded(&self) -> usize {
        self.cache_invalidation_attempts
            .iter()
            .filter(|a| a.succeeded)
            .count()
    }
}

/// Lifecycle of the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ListenerState {
    Starting = 0,
    Listening = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl ListenerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ListenerState::Listening,
            2 => ListenerState::ShuttingDown,
            3 => ListenerState::Stopped,
            _ => ListenerState::Starting,
        }
    }

    /// Human readable description used in the status payload
    pub fn describe(&self) -> &'static str {
        match self {
            ListenerState::Starting => "Webhook listener starting",
            ListenerState::Listening => "Webhook listener running",
            ListenerState::ShuttingDown => "Webhook listener shutting down",
            ListenerState::Stopped => "Webhook listener stopped",
        }
    }
}

/// Shared, lock-free handle on the current listener state
#[derive(Debug, Clone)]
pub struct ListenerStatus(Arc<AtomicU8>);

impl ListenerStatus {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ListenerState::Starting as u8)))
    }

    pub fn get(&self) -> ListenerState {
        ListenerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: ListenerState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

impl Default for ListenerStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let config_error = ConfigError::Invalid {
            message: "test error".to_string(),
        };
        let main_error: Error = config_error.into();

        match main_error {
            Error::Config(ConfigError::Invalid { message }) => {
                assert_eq!(message, "test error");
            }
            _ => panic!("Error conversion failed"),
        }
    }

    #[test]
    fn test_execution_error_messages() {
        let err = ExecutionError::MissingWorkingDir {
            path: "/srv/missing".to_string(),
        };
        assert!(err.to_string().contains("/srv/missing"));

        let err = ExecutionError::Timeout {
            command: "git pull origin main".to_string(),
            timeout: 60,
        };
        assert_eq!(
            err.to_string(),
            "Command 'git pull origin main' timed out after 60s"
        );
    }

    #[test]
    fn test_deployment_result_counts_successes() {
        let mut result = DeploymentResult::new("deploy-001".to_string());
        assert!(!result.pull_succeeded);
        assert_eq!(result.invalidations_succeeded(), 0);

        result.cache_invalidation_attempts.push(InvalidationAttempt {
            target: "http://localhost:3000/api/revalidate".to_string(),
            succeeded: true,
            output: "{}".to_string(),
        });
        result.cache_invalidation_attempts.push(InvalidationAttempt {
            target: "http://localhost:3001/api/revalidate".to_string(),
            succeeded: false,
            output: "connection refused".to_string(),
        });
        assert_eq!(result.invalidations_succeeded(), 1);
    }

    #[test]
    fn test_listener_status_transitions() {
        let status = ListenerStatus::new();
        assert_eq!(status.get(), ListenerState::Starting);

        let shared = status.clone();
        shared.set(ListenerState::Listening);
        assert_eq!(status.get(), ListenerState::Listening);
        assert_eq!(status.get().describe(), "Webhook listener running");

        status.set(ListenerState::ShuttingDown);
        assert_eq!(shared.get(), ListenerState::ShuttingDown);
    }

    #[test]
    fn test_pull_failure_serialization() {
        let json = serde_json::to_value(PullFailure::Exited(Some(1))).unwrap();
        assert_eq!(json["kind"], "exited");
        assert_eq!(json["detail"], 1);
    }
}
