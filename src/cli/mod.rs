//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, ModelsCommand, RunCommand, UsageCommand, ValidateCommand};

/// AI workflow pipeline engine
#[derive(Debug, Parser, Clone)]
#[command(name = "weft")]
#[command(author = "Weft Contributors")]
#[command(version = "0.1.0")]
#[command(about = "An AI workflow pipeline engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline from a YAML definition
    Run(RunCommand),

    /// Validate a pipeline definition
    Validate(ValidateCommand),

    /// Show execution history for a pipeline
    History(HistoryCommand),

    /// Show usage metrics and daily costs
    Usage(UsageCommand),

    /// List known models
    Models(ModelsCommand),
}

impl Cli {
    pub fn from_args() -> Self {
        Self::parse()
    }
}
