mod cli;
mod core;
mod cost;
mod execution;
mod persistence;
mod provider;
mod steps;

use anyhow::{Context, Result};
use cli::commands::{HistoryCommand, ModelsCommand, RunCommand, UsageCommand, ValidateCommand};
use cli::output::*;
use cli::{Cli, Command};
use cost::{CostTracker, UsageFilter};
use execution::{Engine, ExecuteOptions};
use persistence::{MemoryStore, Store};
use provider::{ProviderKind, ProviderRegistry, StaticCredentials};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
        Command::Usage(cmd) => show_usage(cmd).await?,
        Command::Models(cmd) => list_models(cmd)?,
    }

    Ok(())
}

/// Open the history store, or an ephemeral one when history is disabled
async fn open_store(no_history: bool) -> Result<Arc<dyn Store>> {
    if no_history {
        return Ok(Arc::new(MemoryStore::new()));
    }

    #[cfg(feature = "sqlite")]
    {
        return Ok(Arc::new(persistence::SqliteStore::with_default_path().await?));
    }

    #[cfg(not(feature = "sqlite"))]
    {
        return Ok(Arc::new(MemoryStore::new()));
    }
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let definition = core::PipelineDefinition::from_file(&cmd.file)
        .context("Failed to load pipeline definition")?;

    println!("{} Loaded pipeline: {}", INFO, style(&definition.name).bold());

    let pipeline = definition.to_pipeline();

    let store = open_store(cmd.no_history).await?;
    let providers = Arc::new(ProviderRegistry::with_defaults());
    let credentials = Arc::new(StaticCredentials::from_env());
    let cost = Arc::new(CostTracker::new(store.clone()));
    let handlers = Arc::new(steps::default_handlers(
        providers,
        credentials,
        cost,
        &cmd.sandbox_root,
    ));
    let engine = Engine::new(store.clone(), handlers);

    let problems = engine.validate(&pipeline);
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("{} {}", FAIL, problem);
        }
        anyhow::bail!("pipeline failed validation with {} problem(s)", problems.len());
    }

    store.save_pipeline(&pipeline).await?;

    // Parse inputs: JSON values where possible, strings otherwise
    let mut input = Map::new();
    for (key, raw) in &cmd.input {
        let value = serde_json::from_str(raw).unwrap_or(Value::String(raw.clone()));
        input.insert(key.clone(), value);
    }

    let options = ExecuteOptions {
        dry_run: cmd.dry_run,
        debug: cmd.debug,
    };
    if cmd.dry_run {
        println!("{} Dry run: side-effecting steps will be skipped", INFO);
    }

    let execution = engine
        .execute(pipeline.id, &pipeline.owner, input, options)
        .await?;

    println!();
    for record in store.list_step_executions(execution.id).await? {
        let badge = match record.status {
            core::StepStatus::Completed => style(OK).green().to_string(),
            core::StepStatus::Skipped => style("~").yellow().to_string(),
            _ => style(FAIL).red().to_string(),
        };
        println!(
            "  {} {} ({}ms{})",
            badge,
            record.step_name,
            record.metrics.duration_ms,
            if record.metrics.cost > 0.0 {
                format!(", {}", format_cost(record.metrics.cost))
            } else {
                String::new()
            }
        );
        if let Some(error) = &record.error {
            println!("      {}", style(error).red());
        }
    }

    println!();
    println!(
        "{} {} - {} tokens, {}",
        INFO,
        status_badge(execution.status),
        execution.total_tokens,
        format_cost(execution.total_cost)
    );
    if let Some(error) = &execution.error {
        println!("{} {}", FAIL, style(error).red());
    }
    if !execution.results.is_empty() {
        println!(
            "{} Results:\n{}",
            INFO,
            serde_json::to_string_pretty(&execution.results)?
        );
    }

    if execution.status != core::ExecutionStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    let definition = core::PipelineDefinition::from_file(&cmd.file)?;
    let pipeline = definition.to_pipeline();

    // Handler-level validation without touching credentials or history
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let handlers = steps::default_handlers(
        Arc::new(ProviderRegistry::with_defaults()),
        Arc::new(StaticCredentials::new()),
        Arc::new(CostTracker::new(store)),
        "./workspace",
    );
    let problems = handlers.validate_pipeline(&pipeline);

    if problems.is_empty() {
        println!(
            "{} {} is valid ({} steps)",
            OK,
            cmd.file,
            pipeline.enabled_steps().len()
        );
        Ok(())
    } else {
        for problem in &problems {
            eprintln!("{} {}", FAIL, problem);
        }
        anyhow::bail!("pipeline failed validation with {} problem(s)", problems.len())
    }
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let pipeline_id: uuid::Uuid = cmd
        .pipeline
        .parse()
        .context("pipeline must be a pipeline id")?;

    let store = open_store(false).await?;
    let executions = store.list_executions(pipeline_id).await?;

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(());
    }

    for execution in executions.iter().take(cmd.limit) {
        println!(
            "{}  {}  {}  {} tokens  {}",
            execution.id,
            execution.started_at.format("%Y-%m-%d %H:%M:%S"),
            status_badge(execution.status),
            execution.total_tokens,
            format_cost(execution.total_cost)
        );
    }
    Ok(())
}

async fn show_usage(cmd: &UsageCommand) -> Result<()> {
    let store = open_store(false).await?;
    let tracker = CostTracker::new(store);

    let filter = UsageFilter {
        from: Some(chrono::Utc::now() - chrono::Duration::days(i64::from(cmd.days))),
        ..Default::default()
    };
    let metrics = tracker.usage_metrics(&filter).await?;

    println!("{} Usage over the past {} days", INFO, cmd.days);
    println!("  requests:      {}", metrics.requests);
    println!("  input tokens:  {}", metrics.input_tokens);
    println!("  output tokens: {}", metrics.output_tokens);
    println!("  total cost:    {}", format_cost(metrics.total_cost));

    if !metrics.by_model.is_empty() {
        println!("\n  By model:");
        let mut models: Vec<_> = metrics.by_model.iter().collect();
        models.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
        for (model, cost) in models {
            println!("    {:40} {}", model, format_cost(*cost));
        }
    }

    let daily = tracker.daily_costs(cmd.days).await?;
    if !daily.is_empty() {
        println!("\n  Daily:");
        for (date, cost) in daily {
            println!("    {}  {}", date, format_cost(cost));
        }
    }
    Ok(())
}

fn list_models(cmd: &ModelsCommand) -> Result<()> {
    let models = match &cmd.provider {
        Some(name) => {
            let kind: ProviderKind = name
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            provider::models::models_for(kind)
        }
        None => provider::models::catalog(),
    };

    for model in models {
        println!(
            "{:32} {:10} ctx={:<7} in={}/1K out={}/1K",
            model.id,
            model.provider.to_string(),
            model.context_window,
            model.input_cost_per_1k,
            model.output_cost_per_1k
        );
    }
    Ok(())
}
