//! Deployment workflow: pull the working tree, then revalidate caches
//!
//! The pull decides the outcome. Revalidation only runs after a successful
//! pull and its failures never downgrade the deployment.

use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Instrument};

use crate::config::types::SystemConfig;
use crate::execution::CommandExecutor;
use crate::logging::deployment_span;
use crate::revalidate::RevalidationClient;
use crate::types::{DeploymentResult, ExecutionError, PullFailure, Result};

/// Runs one deploy: the pull command followed by revalidation
#[derive(Clone)]
pub struct DeploymentExecutor {
    pull_command: Vec<String>,
    executor: CommandExecutor,
    revalidator: RevalidationClient,
}

impl DeploymentExecutor {
    pub fn new(config: &SystemConfig) -> Result<Self> {
        Ok(Self {
            pull_command: config.project.pull_argv(),
            executor: CommandExecutor::new(
                Duration::from_secs(config.project.pull_timeout),
                &config.project.dir,
            ),
            revalidator: RevalidationClient::new(&config.revalidate)?,
        })
    }

    pub fn project_dir(&self) -> &Path {
        &self.executor.working_dir
    }

    /// Generate a unique deployment ID
    pub fn generate_deploy_id() -> String {
        let now = chrono::Utc::now();
        format!(
            "deploy-{}-{:03}",
            now.format("%Y%m%d-%H%M%S"),
            now.timestamp_subsec_millis()
        )
    }

    /// Run the deployment and describe what happened
    ///
    /// Never fails: launch errors, timeouts and non-zero exits become fields
    /// of the returned result.
    pub async fn execute(&self, deploy_id: String) -> DeploymentResult {
        let span = deployment_span(&deploy_id);
        self.run(deploy_id).instrument(span).await
    }

    async fn run(&self, deploy_id: String) -> DeploymentResult {
        let started = Instant::now();
        let mut result = DeploymentResult::new(deploy_id);

        info!(
            project_dir = %self.executor.working_dir.display(),
            command = ?self.pull_command,
            "Starting pull"
        );

        match self.executor.execute(&self.pull_command).await {
            Ok(output) => {
                result.pull_succeeded = true;
                result.pull_exit_code = output.exit_code;
                result.pull_stdout = output.stdout;
                result.pull_stderr = output.stderr;
                info!(duration_ms = output.duration_ms, "Pull completed");
            }
            Err(e) => {
                apply_pull_failure(&mut result, e);
            }
        }

        if result.pull_succeeded {
            if self.revalidator.targets().is_empty() {
                debug!("No revalidation targets configured, skipping");
            } else {
                result.cache_invalidation_attempts = self.revalidator.revalidate_all().await;
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            pull_succeeded = result.pull_succeeded,
            invalidations = result.cache_invalidation_attempts.len(),
            invalidations_succeeded = result.invalidations_succeeded(),
            duration_ms = result.duration_ms,
            "Deployment finished"
        );
        result
    }
}

fn apply_pull_failure(result: &mut DeploymentResult, err: ExecutionError) {
    match err {
        ExecutionError::MissingWorkingDir { .. } | ExecutionError::StartFailed { .. } => {
            error!(error = %err, "Pull could not be started");
            let message = err.to_string();
            result.pull_stderr = message.clone();
            result.pull_failure = Some(PullFailure::Launch(message));
        }
        ExecutionError::Timeout { timeout, .. } => {
            warn!(timeout_secs = timeout, "Pull timed out");
            result.pull_stderr = err.to_string();
            result.pull_failure = Some(PullFailure::TimedOut(timeout));
        }
        ExecutionError::NonZeroExit {
            code,
            stdout,
            stderr,
            ..
        } => {
            warn!(exit_code = code, stderr = %stderr, "Pull failed");
            result.pull_exit_code = Some(code);
            result.pull_stdout = stdout;
            result.pull_stderr = stderr;
            result.pull_failure = Some(PullFailure::Exited(Some(code)));
        }
        ExecutionError::Terminated { stdout, stderr, .. } => {
            warn!("Pull was terminated by a signal");
            result.pull_stdout = stdout;
            result.pull_stderr = stderr;
            result.pull_failure = Some(PullFailure::Exited(None));
        }
    }
}
