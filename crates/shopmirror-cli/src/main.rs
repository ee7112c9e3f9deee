//! shopmirror CLI - Operate the offline cache of a realtime shop database
//!
//! Pull collections into the local cache, inspect what is cached and follow
//! collections live from the terminal.

mod cli;
mod commands;
mod config_file;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::clear::run_clear;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::get::run_get;
use crate::commands::list::run_list;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::config_file::resolve_config;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "shopmirror=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let config = resolve_config(cli.config.as_deref(), cli.db_path)?;

    match cli.command {
        Commands::Sync { collection, force } => {
            run_sync(&config, collection.as_deref(), force).await?;
        }
        Commands::List { collection, json } => run_list(&config, &collection, json).await?,
        Commands::Get { collection, id } => run_get(&config, &collection, &id).await?,
        Commands::Watch { collection } => run_watch(&config, &collection).await?,
        Commands::Status { json } => run_status(&config, json).await?,
        Commands::Clear { collection } => run_clear(&config, &collection).await?,
        Commands::Config { command } => run_config(&command, &config, cli.config.as_deref())?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
