use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::SystemConfig;
use crate::secrets::describe_secret;
use crate::supervisor::Notifier;
use crate::types::{ListenerStatus, Result};

#[derive(Parser)]
#[command(name = "pullhook")]
#[command(about = "Webhook listener that pulls a project and revalidates its caches")]
#[command(long_about = "
A single-endpoint HTTP listener. An authenticated POST pulls the configured
project directory from its upstream and asks the running application to drop
its cached pages. Configuration comes from an optional TOML file overlaid by
environment variables.
")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path (environment variables override it)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Override project directory
    #[arg(long)]
    pub project_dir: Option<PathBuf>,

    /// Override log level
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(ValueEnum, Clone, Debug)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(ValueEnum, Clone, Debug)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run the webhook listener (default if no subcommand given)
    Run(RunArgs),
    /// Validate the effective configuration
    Validate,
    /// Show version information
    Version,
}

#[derive(Args, Clone, Default)]
pub struct RunArgs {
    /// Set log format
    #[arg(long)]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Level override from `--log-level`, `-v` or `-q`, if any was given
    pub fn log_level_override(&self) -> Option<&'static str> {
        let level = if self.verbose {
            LogLevel::Debug
        } else if self.quiet {
            LogLevel::Error
        } else {
            self.log_level.clone()?
        };

        Some(match level {
            LogLevel::Trace => crate::logging::level::TRACE,
            LogLevel::Debug => crate::logging::level::DEBUG,
            LogLevel::Info => crate::logging::level::INFO,
            LogLevel::Warn => crate::logging::level::WARN,
            LogLevel::Error => crate::logging::level::ERROR,
        })
    }

    /// Get log format override from CLI arguments
    pub fn log_format_override(&self) -> Option<&'static str> {
        match &self.command {
            Some(Commands::Run(args)) => args.log_format.as_ref().map(|fmt| match fmt {
                LogFormat::Json => crate::logging::format::JSON,
                LogFormat::Pretty => crate::logging::format::PRETTY,
            }),
            _ => None,
        }
    }

    /// Apply `--port` and `--project-dir` on top of file and environment
    pub fn apply_overrides(&self, config: &mut SystemConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = &self.project_dir {
            config.project.dir = dir.clone();
        }
    }
}

/// Run the webhook listener until SIGINT or SIGTERM
#[instrument(skip_all)]
pub async fn run_server(config: SystemConfig) -> Result<()> {
    config.validate()?;

    info!(
        port = config.server.port,
        project_dir = %config.project.dir.display(),
        pull_command = ?config.project.pull_argv(),
        revalidate_targets = config.revalidate.targets.len(),
        webhook_secret = %describe_secret(&config.security.webhook_secret, config.logging.debug),
        revalidate_token = %describe_secret(&config.revalidate.token, config.logging.debug),
        "Starting pullhook"
    );

    let config = Arc::new(config);
    let shutdown = CancellationToken::new();
    tokio::spawn(setup_shutdown_signal(shutdown.clone()));

    let notifier = Notifier::from_env();
    let liveness =
        crate::tasks::spawn_liveness_task(&config.supervisor, notifier.clone(), shutdown.clone());

    let result = crate::http::start_server(
        config,
        ListenerStatus::new(),
        notifier,
        shutdown.clone(),
    )
    .await;

    // Also stops the liveness task when the server failed on its own
    shutdown.cancel();
    if let Some(handle) = liveness {
        if let Err(e) = handle.await {
            warn!(error = %e, "Liveness task ended abnormally");
        }
    }

    result
}

/// Validate the effective configuration
#[instrument(skip_all)]
pub async fn validate_config(cli: &Cli, config: SystemConfig) -> Result<()> {
    info!("Validating configuration...");

    let source = cli
        .config
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "environment".to_string());

    match config.validate() {
        Ok(()) => {
            info!(
                source = %source,
                listen = %config.server.listen_address(),
                project_dir = %config.project.dir.display(),
                lock_policy = ?config.project.lock_policy,
                revalidate_targets = config.revalidate.targets.len(),
                "Configuration is valid"
            );
            if !config.project.dir.is_dir() {
                warn!(
                    project_dir = %config.project.dir.display(),
                    "Project directory does not exist yet, deploys will fail until it does"
                );
            }
            Ok(())
        }
        Err(e) => {
            error!(source = %source, error = %e, "Configuration validation failed");
            Err(e)
        }
    }
}

/// Show version information
#[instrument]
pub async fn show_version() -> Result<()> {
    println!("pullhook {}", env!("CARGO_PKG_VERSION"));
    println!("Description: {}", env!("CARGO_PKG_DESCRIPTION"));
    println!("License: {}", env!("CARGO_PKG_LICENSE"));
    println!();

    println!("Build Information:");
    println!(
        "  Build Profile: {}",
        if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        }
    );
    println!();

    println!("Runtime Information:");
    println!("  Platform: {}", std::env::consts::OS);
    println!("  Architecture: {}", std::env::consts::ARCH);

    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM
pub async fn setup_shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
        _ = token.cancelled() => return,
    }

    token.cancel();
}
