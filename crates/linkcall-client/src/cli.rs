//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// linkcall - real-time messaging and call signaling client
#[derive(Debug, Parser)]
#[command(name = "linkcall")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "LINKCALL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Server URL, overriding `server.url`
    #[arg(long, env = "LINKCALL_URL", global = true)]
    pub url: Option<String>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send one api request and print the response payload
    Call {
        /// Route name, e.g. `login` for `api/login`
        route: String,

        /// JSON object sent as the request payload
        #[arg(long, short, default_value = "{}")]
        payload: String,
    },

    /// Stay connected and print every notification
    Listen {
        /// Emit one JSON object per line
        #[arg(long)]
        json: bool,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}
