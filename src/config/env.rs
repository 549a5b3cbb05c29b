//! Environment overrides for [`SystemConfig`]
//!
//! The lookup is passed in so callers decide where values come from;
//! [`SystemConfig::apply_env`] reads the process environment.

use std::path::PathBuf;
use std::str::FromStr;

use super::types::{
    default_revalidate_paths, RevalidateAuth, RevalidationTarget, SystemConfig,
};
use crate::secrets::SecretString;
use crate::types::{ConfigError, Result};

impl SystemConfig {
    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("WEBHOOK_PORT") {
            self.server.port = parse_value("WEBHOOK_PORT", &v)?;
        }
        if let Some(v) = get("WEBHOOK_BIND") {
            self.server.bind = v.trim().to_string();
        }
        if let Some(v) = get("MAX_CONNECTIONS") {
            self.server.max_connections = parse_value("MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = get("IDLE_TIMEOUT") {
            self.server.idle_timeout = parse_value("IDLE_TIMEOUT", &v)?;
        }
        if let Some(v) = get("REQUEST_TIMEOUT") {
            self.server.request_timeout = parse_value("REQUEST_TIMEOUT", &v)?;
        }
        if let Some(v) = get("SHUTDOWN_TIMEOUT") {
            self.server.shutdown_timeout = parse_value("SHUTDOWN_TIMEOUT", &v)?;
        }
        if let Some(v) = get("RECLAIM_PORT") {
            self.server.reclaim_port = parse_bool("RECLAIM_PORT", &v)?;
        }

        if let Some(v) = get("PROJECT_DIR") {
            self.project.dir = PathBuf::from(v);
        }
        if let Some(v) = get("GIT_COMMAND") {
            self.project.git_command = v;
        }
        if let Some(v) = get("GIT_REMOTE") {
            self.project.remote = v;
        }
        if let Some(v) = get("GIT_BRANCH") {
            self.project.branch = v;
        }
        if let Some(v) = get("PULL_TIMEOUT") {
            self.project.pull_timeout = parse_value("PULL_TIMEOUT", &v)?;
        }
        if let Some(v) = get("DEPLOY_LOCK") {
            self.project.lock_policy = parse_value("DEPLOY_LOCK", &v)?;
        }

        // Secrets are taken verbatim, whitespace included
        if let Some(v) = lookup("WEBHOOK_SECRET").filter(|v| !v.is_empty()) {
            self.security.webhook_secret = SecretString::new(v);
        }
        if let Some(v) = get("ENFORCE_SIGNATURE") {
            self.security.enforce_signature = parse_bool("ENFORCE_SIGNATURE", &v)?;
        }

        if let Some(v) = lookup("REVALIDATE_TOKEN")
            .filter(|v| !v.is_empty())
            .or_else(|| lookup("REVALIDATE_SECRET").filter(|v| !v.is_empty()))
        {
            self.revalidate.token = SecretString::new(v);
        }
        if let Some(v) = get("REVALIDATE_TIMEOUT") {
            self.revalidate.timeout = parse_value("REVALIDATE_TIMEOUT", &v)?;
        }
        self.apply_revalidate_targets(
            get("REVALIDATE_URL"),
            get("REVALIDATE_AUTH"),
            get("REVALIDATE_PATHS"),
        )?;

        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v.trim().to_lowercase();
        }
        if let Some(v) = get("LOG_FORMAT") {
            self.logging.format = v.trim().to_lowercase();
        }
        if let Some(v) = get("DEBUG") {
            self.logging.debug = parse_bool("DEBUG", &v)?;
        }

        if let Some(v) = get("WATCHDOG") {
            self.supervisor.watchdog = parse_bool("WATCHDOG", &v)?;
        }
        if let Some(v) = get("WATCHDOG_INTERVAL") {
            self.supervisor.watchdog_interval = parse_value("WATCHDOG_INTERVAL", &v)?;
        }
        // The supervisor's own deadline wins; ping at half of it
        if let Some(v) = get("WATCHDOG_USEC") {
            let usec: u64 = parse_value("WATCHDOG_USEC", &v)?;
            self.supervisor.watchdog_interval = (usec / 2 / 1_000_000).max(1);
        }

        Ok(())
    }

    fn apply_revalidate_targets(
        &mut self,
        urls: Option<String>,
        auth: Option<String>,
        paths: Option<String>,
    ) -> Result<()> {
        let auth = match auth {
            Some(v) => Some(parse_value::<RevalidateAuth>("REVALIDATE_AUTH", &v)?),
            None => None,
        };
        let paths = paths.map(|v| split_list(&v));

        match urls {
            Some(urls) => {
                let fallback_auth = self
                    .revalidate
                    .targets
                    .first()
                    .map(|t| t.auth)
                    .unwrap_or_default();
                let fallback_paths = self
                    .revalidate
                    .targets
                    .first()
                    .map(|t| t.paths.clone())
                    .unwrap_or_else(default_revalidate_paths);

                self.revalidate.targets = split_list(&urls)
                    .into_iter()
                    .map(|url| RevalidationTarget {
                        url,
                        auth: auth.unwrap_or(fallback_auth),
                        paths: paths.clone().unwrap_or_else(|| fallback_paths.clone()),
                    })
                    .collect();
            }
            None => {
                for target in &mut self.revalidate.targets {
                    if let Some(auth) = auth {
                        target.auth = auth;
                    }
                    if let Some(paths) = &paths {
                        target.paths = paths.clone();
                    }
                }
            }
        }
        Ok(())
    }
}

/// Parse a boolean environment value
pub(crate) fn parse_bool(variable: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidEnv {
            variable: variable.to_string(),
            message: format!("'{}' is not a boolean", other),
        }
        .into()),
    }
}

fn parse_value<T>(variable: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| {
        ConfigError::InvalidEnv {
            variable: variable.to_string(),
            message: format!("'{}': {}", value.trim(), e),
        }
        .into()
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
