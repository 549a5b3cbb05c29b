use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::secrets::SecretString;
use crate::types::{ConfigError, Result};

/// System configuration structure
///
/// Built once at startup (defaults, then an optional TOML file, then the
/// environment, then CLI flags) and shared read-only afterwards.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SystemConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub revalidate: RevalidateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
    #[serde(default = "default_max_request_size")]
    pub max_request_size: String,
    #[serde(default = "default_reclaim_port")]
    pub reclaim_port: bool,
    #[serde(default = "default_reclaim_delay_ms")]
    pub reclaim_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_project_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_git_command")]
    pub git_command: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Full argv overriding `<git_command> pull <remote> <branch>`
    #[serde(default)]
    pub pull_command: Option<Vec<String>>,
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout: u64,
    #[serde(default)]
    pub lock_policy: LockPolicy,
}

/// What happens when a deploy is triggered while another one is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockPolicy {
    /// Run overlapping pulls against the same tree
    Allow,
    /// Wait for the running deploy to finish
    #[default]
    Serialize,
    /// Refuse the later trigger with 409
    Reject,
}

impl FromStr for LockPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow" => Ok(LockPolicy::Allow),
            "serialize" => Ok(LockPolicy::Serialize),
            "reject" => Ok(LockPolicy::Reject),
            other => Err(format!(
                "unknown lock policy '{}', expected one of: allow, serialize, reject",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// HMAC key for `X-Hub-Signature-256`; empty means verification is bypassed
    #[serde(default)]
    pub webhook_secret: SecretString,
    /// Refuse deploys whose signature does not verify
    #[serde(default = "default_enforce_signature")]
    pub enforce_signature: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevalidateConfig {
    #[serde(default)]
    pub token: SecretString,
    #[serde(default = "default_revalidate_timeout")]
    pub timeout: u64,
    #[serde(default = "default_revalidate_targets")]
    pub targets: Vec<RevalidationTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RevalidationTarget {
    pub url: String,
    #[serde(default)]
    pub auth: RevalidateAuth,
    #[serde(default = "default_revalidate_paths")]
    pub paths: Vec<String>,
}

/// How the revalidation token is presented to the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RevalidateAuth {
    /// `Authorization: Bearer <token>` with a JSON list of paths
    #[default]
    Bearer,
    /// `?secret=<token>&path=<path>`, one call per path
    Query,
}

impl FromStr for RevalidateAuth {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bearer" | "header" => Ok(RevalidateAuth::Bearer),
            "query" => Ok(RevalidateAuth::Query),
            other => Err(format!(
                "unknown revalidation auth '{}', expected bearer or query",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Log secret prefixes and raise the default level
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_watchdog")]
    pub watchdog: bool,
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval: u64,
}

impl SystemConfig {
    /// Load system configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let content = std::fs::read_to_string(&path)
            .map_err(|_| ConfigError::FileNotFound { path: path_str })?;

        let config: SystemConfig = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Build the effective configuration: file (if any) then process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }
}

impl ServerConfig {
    /// Address string suitable for `SocketAddr` parsing
    pub fn listen_address(&self) -> String {
        if self.bind.contains(':') && !self.bind.starts_with('[') {
            format!("[{}]:{}", self.bind, self.port)
        } else {
            format!("{}:{}", self.bind, self.port)
        }
    }
}

impl ProjectConfig {
    /// Argument vector of the pull command
    pub fn pull_argv(&self) -> Vec<String> {
        match &self.pull_command {
            Some(command) => command.clone(),
            None => vec![
                self.git_command.clone(),
                "pull".to_string(),
                self.remote.clone(),
                self.branch.clone(),
            ],
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            max_connections: default_max_connections(),
            backlog: default_backlog(),
            idle_timeout: default_idle_timeout(),
            request_timeout: default_request_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            max_request_size: default_max_request_size(),
            reclaim_port: default_reclaim_port(),
            reclaim_delay_ms: default_reclaim_delay_ms(),
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            dir: default_project_dir(),
            git_command: default_git_command(),
            remote: default_remote(),
            branch: default_branch(),
            pull_command: None,
            pull_timeout: default_pull_timeout(),
            lock_policy: LockPolicy::default(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            webhook_secret: SecretString::default(),
            enforce_signature: default_enforce_signature(),
        }
    }
}

impl Default for RevalidateConfig {
    fn default() -> Self {
        Self {
            token: SecretString::default(),
            timeout: default_revalidate_timeout(),
            targets: default_revalidate_targets(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            debug: false,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            watchdog: default_watchdog(),
            watchdog_interval: default_watchdog_interval(),
        }
    }
}

// Default value functions
fn default_port() -> u16 {
    8080
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_backlog() -> u32 {
    128
}

fn default_idle_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    120
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_request_size() -> String {
    "1MB".to_string()
}

fn default_reclaim_port() -> bool {
    true
}

fn default_reclaim_delay_ms() -> u64 {
    2000
}

fn default_project_dir() -> PathBuf {
    PathBuf::from("/home/ubuntu/myblog")
}

fn default_git_command() -> String {
    "git".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_pull_timeout() -> u64 {
    60
}

fn default_enforce_signature() -> bool {
    true
}

fn default_revalidate_timeout() -> u64 {
    10
}

fn default_revalidate_url() -> String {
    "http://localhost:3000/api/revalidate".to_string()
}

pub(crate) fn default_revalidate_paths() -> Vec<String> {
    vec!["/".to_string(), "/articles".to_string(), "/docs".to_string()]
}

fn default_revalidate_targets() -> Vec<RevalidationTarget> {
    vec![RevalidationTarget {
        url: default_revalidate_url(),
        auth: RevalidateAuth::Bearer,
        paths: default_revalidate_paths(),
    }]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_watchdog() -> bool {
    true
}

fn default_watchdog_interval() -> u64 {
    30
}
