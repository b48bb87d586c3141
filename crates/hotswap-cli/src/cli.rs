//! CLI command definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Hotswap - swap service implementations without restarting
#[derive(Parser)]
#[command(name = "hotswap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Check modules for syntax errors
    Check {
        /// Module files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Also construct this implementation type from each module
        #[arg(short, long)]
        type_name: Option<String>,
    },

    /// Watch every service in a services file and hot swap on change
    Watch {
        /// Services file (toml, yaml or json)
        #[arg(short, long, env = "HOTSWAP_CONFIG", default_value = "services.toml")]
        config: PathBuf,
    },

    /// Load a module once and call one method on it
    Call {
        /// Module file
        #[arg(short, long)]
        module: PathBuf,

        /// Implementation type to construct
        #[arg(short, long)]
        type_name: String,

        /// Method to call
        method: String,

        /// Arguments, each parsed as JSON (bare words are passed as strings)
        args: Vec<String>,
    },
}
