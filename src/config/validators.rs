use std::net::SocketAddr;

use super::types::{RevalidateAuth, ServerConfig, SystemConfig};
use crate::types::{Error, Result};

// Validation helper functions

/// Validate listen address format (host:port)
pub(crate) fn validate_listen_address(addr: &str) -> Result<()> {
    addr.parse::<SocketAddr>().map_err(|_| Error::Validation {
        field: "server.bind".to_string(),
        message: format!(
            "Invalid listen address '{}'. Expected an IP address such as '0.0.0.0' or '::'",
            addr
        ),
    })?;
    Ok(())
}

/// Validate positive timeout value
pub(crate) fn validate_positive_timeout(value: u64, field: &str) -> Result<()> {
    if value == 0 {
        return Err(Error::Validation {
            field: field.to_string(),
            message: "Timeout must be greater than 0".to_string(),
        });
    }
    Ok(())
}

/// Validate a bounded numeric setting
pub(crate) fn validate_concurrency_limits(
    value: u32,
    field: &str,
    min: u32,
    max: u32,
) -> Result<()> {
    if value < min {
        return Err(Error::Validation {
            field: field.to_string(),
            message: format!("Value {} is below minimum allowed value {}", value, min),
        });
    }
    if value > max {
        return Err(Error::Validation {
            field: field.to_string(),
            message: format!("Value {} exceeds maximum allowed value {}", value, max),
        });
    }
    Ok(())
}

/// Parse size string with units (KB, MB, GB) into bytes
pub(crate) fn parse_size_string(size: &str) -> Result<u64> {
    let size = size.trim().to_uppercase();

    let (number, multiplier) = if let Some(number) = size.strip_suffix("KB") {
        (number, 1024)
    } else if let Some(number) = size.strip_suffix("MB") {
        (number, 1024 * 1024)
    } else if let Some(number) = size.strip_suffix("GB") {
        (number, 1024 * 1024 * 1024)
    } else {
        (size.as_str(), 1)
    };

    let value = number.trim().parse::<u64>().map_err(|_| Error::Validation {
        field: "size".to_string(),
        message: format!(
            "Invalid size format '{}'. Expected format: number + unit (KB/MB/GB) or plain bytes",
            size
        ),
    })?;

    Ok(value * multiplier)
}

/// Validate request size string and ensure reasonable limits
pub(crate) fn validate_request_size(size: &str, field: &str) -> Result<()> {
    let bytes = parse_size_string(size).map_err(|mut e| {
        if let Error::Validation {
            field: ref mut field_ref,
            ..
        } = e
        {
            *field_ref = field.to_string();
        }
        e
    })?;

    const MIN_SIZE: u64 = 1024;
    const MAX_SIZE: u64 = 100 * 1024 * 1024;

    if bytes < MIN_SIZE {
        return Err(Error::Validation {
            field: field.to_string(),
            message: format!(
                "Request size {} bytes is below minimum {} (1KB)",
                bytes, MIN_SIZE
            ),
        });
    }

    if bytes > MAX_SIZE {
        return Err(Error::Validation {
            field: field.to_string(),
            message: format!(
                "Request size {} bytes exceeds maximum {} (100MB)",
                bytes, MAX_SIZE
            ),
        });
    }

    Ok(())
}

/// Validate an outbound http(s) URL
pub(crate) fn validate_http_url(url: &str, field: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url).map_err(|e| Error::Validation {
        field: field.to_string(),
        message: format!("Invalid URL '{}': {}", url, e),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Validation {
            field: field.to_string(),
            message: format!("URL '{}' must use http or https", url),
        });
    }
    Ok(())
}

/// Validate a revalidation path list
pub(crate) fn validate_revalidate_paths(paths: &[String], field: &str) -> Result<()> {
    if paths.is_empty() {
        return Err(Error::Validation {
            field: field.to_string(),
            message: "At least one path is required".to_string(),
        });
    }
    for path in paths {
        if !path.starts_with('/') {
            return Err(Error::Validation {
                field: field.to_string(),
                message: format!("Path '{}' must start with '/'", path),
            });
        }
    }
    Ok(())
}

impl ServerConfig {
    /// Request body limit in bytes
    pub fn max_request_bytes(&self) -> Result<usize> {
        let bytes = parse_size_string(&self.max_request_size)?;
        usize::try_from(bytes).map_err(|_| Error::Validation {
            field: "server.max_request_size".to_string(),
            message: format!("Request size {} bytes does not fit in memory", bytes),
        })
    }
}

impl SystemConfig {
    /// Check the effective configuration before the listener starts
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::Validation {
                field: "server.port".to_string(),
                message: "Port must be between 1 and 65535".to_string(),
            });
        }
        validate_listen_address(&self.server.listen_address())?;
        validate_concurrency_limits(
            self.server.max_connections,
            "server.max_connections",
            1,
            1024,
        )?;
        validate_concurrency_limits(self.server.backlog, "server.backlog", 1, 65535)?;
        validate_request_size(&self.server.max_request_size, "server.max_request_size")?;
        validate_positive_timeout(self.server.idle_timeout, "server.idle_timeout")?;
        validate_positive_timeout(self.server.request_timeout, "server.request_timeout")?;
        validate_positive_timeout(self.server.shutdown_timeout, "server.shutdown_timeout")?;

        let argv = self.project.pull_argv();
        if argv.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(Error::Validation {
                field: "project.pull_command".to_string(),
                message: "Pull command must name a program".to_string(),
            });
        }
        validate_positive_timeout(self.project.pull_timeout, "project.pull_timeout")?;

        validate_positive_timeout(self.revalidate.timeout, "revalidate.timeout")?;
        for (i, target) in self.revalidate.targets.iter().enumerate() {
            validate_http_url(&target.url, &format!("revalidate.targets[{}].url", i))?;
            // Query targets may omit paths and refresh whatever the app defaults to
            if target.auth == RevalidateAuth::Bearer || !target.paths.is_empty() {
                validate_revalidate_paths(
                    &target.paths,
                    &format!("revalidate.targets[{}].paths", i),
                )?;
            }
        }

        if !matches!(
            self.logging.level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(Error::Validation {
                field: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                ),
            });
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(Error::Validation {
                field: "logging.format".to_string(),
                message: format!(
                    "Invalid log format '{}'. Must be 'json' or 'pretty'",
                    self.logging.format
                ),
            });
        }

        validate_positive_timeout(
            self.supervisor.watchdog_interval,
            "supervisor.watchdog_interval",
        )?;

        Ok(())
    }
}
