//! Logging setup for the pullhook listener
//!
//! Structured output through `tracing`, in JSON or pretty form. The level
//! comes from, in order: `RUST_LOG`, the CLI flag, the loaded configuration
//! (which already folds in `LOG_LEVEL`), and finally `info`. Debug mode
//! raises an `info` default to `debug`.
//!
//! ```rust,no_run
//! let _span = pullhook::logging::deployment_span("deploy-20250101-120000-000").entered();
//! ```

use tracing::{info_span, Span};
use tracing_subscriber::{fmt::time::ChronoLocal, EnvFilter};

use crate::config::SystemConfig;
use crate::types::{Error, Result};

/// Create a deployment context span
pub fn deployment_span(deploy_id: &str) -> Span {
    info_span!("deployment", deploy_id = deploy_id)
}

/// Log level enum values as strings for configuration
pub mod level {
    pub const TRACE: &str = "trace";
    pub const DEBUG: &str = "debug";
    pub const INFO: &str = "info";
    pub const WARN: &str = "warn";
    pub const ERROR: &str = "error";
}

/// Log format enum values as strings for configuration
pub mod format {
    pub const JSON: &str = "json";
    pub const PRETTY: &str = "pretty";
}

/// Resolve level and format from CLI overrides and configuration
pub fn effective_settings<'a>(
    log_level_override: Option<&'a str>,
    log_format_override: Option<&'a str>,
    config: &'a SystemConfig,
) -> (&'a str, &'a str) {
    let log_level = match log_level_override {
        Some(level) => level,
        None if config.logging.debug && config.logging.level == level::INFO => level::DEBUG,
        None => config.logging.level.as_str(),
    };

    let log_format = log_format_override.unwrap_or(config.logging.format.as_str());

    (log_level, log_format)
}

/// Install the global tracing subscriber
pub fn init(
    log_level_override: Option<&str>,
    log_format_override: Option<&str>,
    config: &SystemConfig,
) -> Result<()> {
    let (log_level, log_format) =
        effective_settings(log_level_override, log_format_override, config);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string());

    let installed = match log_format {
        format::JSON => tracing_subscriber::fmt()
            .json()
            .with_timer(timer)
            .with_env_filter(env_filter)
            .with_target(false)
            .with_current_span(true)
            .with_span_list(false)
            .try_init(),
        format::PRETTY => tracing_subscriber::fmt()
            .pretty()
            .with_timer(timer)
            .with_env_filter(env_filter)
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .with_timer(timer)
            .with_env_filter(env_filter)
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .try_init(),
    };

    installed.map_err(|e| Error::Application(format!("Failed to initialize logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_span_creation() {
        let span = deployment_span("deploy-20250101-120000-000");
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "deployment");
        }
        let _guard = span.enter();
    }

    #[test]
    fn test_cli_overrides_config() {
        let mut config = SystemConfig::default();
        config.logging.level = level::WARN.to_string();
        config.logging.format = format::JSON.to_string();

        assert_eq!(
            effective_settings(Some(level::TRACE), Some(format::PRETTY), &config),
            (level::TRACE, format::PRETTY)
        );
        assert_eq!(
            effective_settings(None, None, &config),
            (level::WARN, format::JSON)
        );
    }

    #[test]
    fn test_debug_mode_raises_default_level() {
        let mut config = SystemConfig::default();
        config.logging.debug = true;
        assert_eq!(effective_settings(None, None, &config).0, level::DEBUG);

        // An explicit level is left alone
        config.logging.level = level::ERROR.to_string();
        assert_eq!(effective_settings(None, None, &config).0, level::ERROR);
    }
}
