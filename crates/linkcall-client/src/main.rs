//! linkcall CLI entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use linkcall_client::cli::{Cli, Command, ConfigAction};
use linkcall_client::commands;
use linkcall_client::config::ClientConfig;
use linkcall_client::error::ClientResult;
use linkcall_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let path = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
    let mut config = match cli.config {
        Some(ref path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };
    if let Some(url) = cli.url {
        config.server.url = url;
    }

    let tracing = if cli.debug || config.debug {
        TracingConfig::cli_debug()
    } else {
        TracingConfig::default()
    };
    init_tracing(tracing)?;

    match cli.command {
        Command::Call { route, payload } => commands::call::run(&config, &route, &payload).await,
        Command::Listen { json } => commands::listen::run(&config, json).await,
        Command::Config { action } => config_action(action, &config, path),
    }
}

fn config_action(action: ConfigAction, config: &ClientConfig, path: PathBuf) -> ClientResult<()> {
    match action {
        ConfigAction::Dump => commands::config::dump(config, &path),
        ConfigAction::Validate => commands::config::validate(config),
        ConfigAction::Path => commands::config::path(&path),
    }
}
