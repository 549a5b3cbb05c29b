use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::types::{CommandOutput, ExecutionError};

/// Maximum size for captured stdout/stderr to prevent memory issues
const MAX_OUTPUT_SIZE: usize = 10 * 1024; // 10KB per stream

/// Runs a single external command in a fixed working directory with a
/// deadline, capturing both output streams
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    /// Maximum time to wait for command completion
    pub timeout: Duration,
    /// Working directory for command execution
    pub working_dir: PathBuf,
}

impl CommandExecutor {
    pub fn new<P: AsRef<Path>>(timeout: Duration, working_dir: P) -> Self {
        Self {
            timeout,
            working_dir: working_dir.as_ref().to_path_buf(),
        }
    }

    /// Execute a command with timeout and capture output
    ///
    /// A child still running at the deadline is killed. Only a zero exit
    /// status is returned as `Ok`.
    pub async fn execute(&self, command: &[String]) -> Result<CommandOutput, ExecutionError> {
        let Some((executable, args)) = command.split_first() else {
            return Err(ExecutionError::StartFailed {
                command: "<empty>".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "Command cannot be empty",
                ),
            });
        };
        let command_line = command.join(" ");

        let is_dir = tokio::fs::metadata(&self.working_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            warn!(
                working_dir = %self.working_dir.display(),
                "Working directory is missing"
            );
            return Err(ExecutionError::MissingWorkingDir {
                path: self.working_dir.display().to_string(),
            });
        }

        debug!(
            command = ?command,
            working_dir = %self.working_dir.display(),
            timeout_secs = self.timeout.as_secs(),
            "Executing command"
        );

        let start_time = Instant::now();

        let mut cmd = Command::new(executable);
        cmd.args(args)
            .current_dir(&self.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let execution_result = timeout(self.timeout, cmd.output()).await;
        let duration_ms = start_time.elapsed().as_millis() as u64;

        match execution_result {
            Ok(Ok(output)) => {
                let exit_code = output.status.code();
                let stdout = truncate_output(output.stdout);
                let stderr = truncate_output(output.stderr);

                debug!(
                    command = ?command,
                    exit_code = exit_code,
                    duration_ms = duration_ms,
                    stdout_len = stdout.len(),
                    stderr_len = stderr.len(),
                    "Command completed"
                );

                match exit_code {
                    Some(0) => Ok(CommandOutput {
                        command: command.to_vec(),
                        exit_code,
                        stdout,
                        stderr,
                        duration_ms,
                    }),
                    Some(code) => {
                        warn!(
                            command = ?command,
                            exit_code = code,
                            stderr = %stderr,
                            "Command failed with non-zero exit code"
                        );
                        Err(ExecutionError::NonZeroExit {
                            command: command_line,
                            code,
                            stdout,
                            stderr,
                        })
                    }
                    None => {
                        warn!(command = ?command, "Command was terminated by a signal");
                        Err(ExecutionError::Terminated {
                            command: command_line,
                            stdout,
                            stderr,
                        })
                    }
                }
            }
            Ok(Err(io_error)) => {
                error!(
                    command = ?command,
                    error = %io_error,
                    "Failed to execute command"
                );
                Err(ExecutionError::StartFailed {
                    command: command_line,
                    source: io_error,
                })
            }
            Err(_elapsed) => {
                // Dropping the output future kills the child
                warn!(
                    command = ?command,
                    timeout_secs = self.timeout.as_secs(),
                    duration_ms = duration_ms,
                    "Command timed out"
                );
                Err(ExecutionError::Timeout {
                    command: command_line,
                    timeout: self.timeout.as_secs(),
                })
            }
        }
    }
}

/// Truncate command output to prevent memory issues
fn truncate_output(output: Vec<u8>) -> String {
    let output_str = String::from_utf8_lossy(&output);
    if output_str.len() > MAX_OUTPUT_SIZE {
        let mut end = MAX_OUTPUT_SIZE;
        while !output_str.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}... [truncated at {} bytes]",
            &output_str[..end],
            MAX_OUTPUT_SIZE
        )
    } else {
        output_str.into_owned()
    }
}
