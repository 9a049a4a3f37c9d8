use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ConfigArgs;

/// Command line interface for the emitter scenario runner.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub config: ConfigArgs,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a TOML scenario against a fresh emitter and print the deliveries.
    Replay {
        /// Scenario file.
        scenario: PathBuf,
    },
    /// Print the resolved configuration.
    CheckConfig,
}
