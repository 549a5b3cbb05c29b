mod cli;
mod config;
mod deployment;
mod execution;
mod http;
mod logging;
mod revalidate;
mod secrets;
mod state;
mod supervisor;
mod tasks;
mod types;

use clap::Parser;
use tracing::error;

use crate::cli::{Cli, Commands, RunArgs};
use crate::config::SystemConfig;
use crate::types::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Version) = cli.command {
        return cli::show_version().await;
    }

    let level_override = cli.log_level_override();
    let format_override = cli.log_format_override();

    let mut system_config = match SystemConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            // Log through the default subscriber so the failure is visible
            crate::logging::init(level_override, format_override, &SystemConfig::default())?;
            error!(error = %e, "Failed to load configuration");
            return Err(e);
        }
    };
    cli.apply_overrides(&mut system_config);

    crate::logging::init(level_override, format_override, &system_config)?;

    match cli.command.clone().unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(_) => cli::run_server(system_config).await,
        Commands::Validate => cli::validate_config(&cli, system_config).await,
        Commands::Version => cli::show_version().await,
    }
}
