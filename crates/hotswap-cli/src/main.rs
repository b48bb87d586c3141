//! Hotswap CLI - check, watch and call hot-swappable service modules

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_command_async(cli))
}

async fn run_command_async(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Check { files, type_name } => {
            commands::check::run(&files, type_name.as_deref())?;
        }

        Commands::Watch { config } => {
            commands::watch::run(&config).await?;
        }

        Commands::Call {
            module,
            type_name,
            method,
            args,
        } => {
            commands::call::run(&module, &type_name, &method, &args).await?;
        }
    }

    Ok(())
}
