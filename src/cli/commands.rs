//! CLI command definitions

use clap::Args;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Input parameters (key=value)
    #[arg(short, long, value_parser = parse_key_value)]
    pub input: Vec<(String, String)>,

    /// Short-circuit side-effecting steps
    #[arg(long)]
    pub dry_run: bool,

    /// Raise per-step log verbosity
    #[arg(long)]
    pub debug: bool,

    /// Sandbox root for file steps
    #[arg(long, default_value = "./workspace")]
    pub sandbox_root: String,

    /// Don't save execution to history
    #[arg(long)]
    pub no_history: bool,
}

/// Validate a pipeline definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,
}

/// Show execution history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline id to show history for
    #[arg(short, long)]
    pub pipeline: String,

    /// Maximum number of executions to show
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

/// Show usage metrics
#[derive(Debug, Args, Clone)]
pub struct UsageCommand {
    /// Days of history to aggregate
    #[arg(long, default_value_t = 30)]
    pub days: u32,
}

/// List known models
#[derive(Debug, Args, Clone)]
pub struct ModelsCommand {
    /// Restrict to one provider
    #[arg(short, long)]
    pub provider: Option<String>,
}

/// Parse a key=value pair
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!("expected key=value, got {:?}", s)),
    }
}
