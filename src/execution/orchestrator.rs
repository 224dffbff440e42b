//! Execution orchestrator - drives a pipeline's steps to a terminal state

use crate::core::{Execution, ExecutionContext, Step, StepExecution};
use crate::execution::ActiveExecutions;
use crate::persistence::Store;
use crate::steps::{resolve_inputs, HandlerRegistry, StepResult};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Structural failures that abort before or outside step execution
///
/// Everything else becomes a failed step result and a Failed execution.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("pipeline not found: {0}")]
    PipelineNotFound(Uuid),

    #[error("user {user} may not run pipeline {pipeline}")]
    Unauthorized { user: String, pipeline: Uuid },

    #[error("invalid pipeline: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Per-run options
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Short-circuit side-effecting handlers with a synthetic trace
    pub dry_run: bool,

    /// Raise per-step log verbosity
    pub debug: bool,
}

/// Drives executions: lifecycle, retry, timeout, persistence calls
pub struct Engine {
    store: Arc<dyn Store>,
    handlers: Arc<HandlerRegistry>,
    active: ActiveExecutions,
    backoff_base: Duration,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            store,
            handlers,
            active: ActiveExecutions::new(),
            backoff_base: Duration::from_secs(1),
        }
    }

    /// Override the exponential-backoff base (tests use milliseconds)
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// The active-execution registry
    pub fn active(&self) -> &ActiveExecutions {
        &self.active
    }

    /// Remove an execution from the registry, preventing further dispatch
    ///
    /// An in-flight step is not interrupted beyond its own timeout.
    pub async fn cancel(&self, execution_id: Uuid) -> bool {
        self.active.remove(execution_id).await
    }

    /// Run a pipeline to a terminal state
    pub async fn execute(
        &self,
        pipeline_id: Uuid,
        user_id: &str,
        input: Map<String, Value>,
        options: ExecuteOptions,
    ) -> Result<Execution, EngineError> {
        let pipeline = self
            .store
            .get_pipeline(pipeline_id)
            .await?
            .ok_or(EngineError::PipelineNotFound(pipeline_id))?;

        if !pipeline.runnable_by(user_id) {
            return Err(EngineError::Unauthorized {
                user: user_id.to_string(),
                pipeline: pipeline_id,
            });
        }

        let steps: Vec<Step> = pipeline
            .enabled_steps()
            .into_iter()
            .cloned()
            .collect();
        if steps.is_empty() {
            return Err(EngineError::Validation(format!(
                "pipeline '{}' has no enabled steps",
                pipeline.name
            )));
        }

        let mut execution = Execution::new(pipeline_id, user_id, input.clone());
        self.store.save_execution(&execution).await?;
        self.active.register(execution.id).await;

        execution.start();
        self.store.save_execution(&execution).await?;
        info!(
            execution = %execution.id,
            pipeline = %pipeline.name,
            steps = steps.len(),
            dry_run = options.dry_run,
            "Starting execution"
        );

        let mut context = ExecutionContext::new(execution.id, user_id, input);
        context.merge_variables(&pipeline.variables);

        for step in &steps {
            // Cancellation is checked between steps only
            if !self.active.contains(execution.id).await {
                warn!(execution = %execution.id, "Execution cancelled; stopping dispatch");
                execution.cancel(context.output.clone());
                self.store.save_execution(&execution).await?;
                return Ok(execution);
            }

            let mut record = StepExecution::start(execution.id, step.id, &step.name);
            record.inputs = resolve_inputs(step, &context);
            context.current_step_execution = Some(record.id);
            self.store.save_step_execution(&record).await?;

            if options.debug {
                debug!(step = %step.name, inputs = %json!(record.inputs), "Resolved step inputs");
            }

            let dry_skipped = options.dry_run
                && self
                    .handlers
                    .get(step.step_type)
                    .is_some_and(|h| h.side_effecting(step, &record.inputs));

            let result = self
                .run_step(step, &record.inputs, &context, options)
                .await;

            execution.total_cost += result.metrics.cost;
            execution.total_tokens += result.metrics.tokens;

            if result.success {
                self.apply_outputs(step, &result.outputs, &mut context);
                record.logs.extend(result.logs.clone());
                if dry_skipped {
                    record.skip("dry run");
                    record.metrics = result.metrics.clone();
                } else {
                    record.complete(result.outputs.clone(), result.metrics.clone());
                }
                self.store.save_step_execution(&record).await?;
                info!(step = %step.name, "Step completed");
            } else {
                let step_error = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string());
                record.logs.extend(result.logs.clone());
                // Outputs stay off the failed record; keep diagnostics in the logs
                if !result.outputs.is_empty() {
                    record.logs.push(format!("diagnostics: {}", json!(result.outputs)));
                }
                record.fail(step_error.clone(), result.metrics.clone());
                self.store.save_step_execution(&record).await?;

                error!(step = %step.name, error = %step_error, "Step failed; aborting execution");
                execution.fail(
                    format!("Step execution failed: {}", step.name),
                    context.output.clone(),
                );
                self.store.save_execution(&execution).await?;
                self.active.remove(execution.id).await;
                return Ok(execution);
            }
        }

        execution.complete(context.output.clone());
        self.store.save_execution(&execution).await?;
        self.active.remove(execution.id).await;
        info!(
            execution = %execution.id,
            cost = execution.total_cost,
            tokens = execution.total_tokens,
            "Execution completed"
        );
        Ok(execution)
    }

    /// One step through the retry wrapper, each attempt deadline-bound
    ///
    /// Handlers are not guaranteed idempotent: a retried step may repeat
    /// side effects. Accepted, per the engine's contract.
    async fn run_step(
        &self,
        step: &Step,
        inputs: &Map<String, Value>,
        context: &ExecutionContext,
        options: ExecuteOptions,
    ) -> StepResult {
        let Some(handler) = self.handlers.get(step.step_type) else {
            return StepResult::fail_terminal(format!(
                "no handler registered for type {}",
                step.step_type
            ));
        };

        if options.dry_run && handler.side_effecting(step, inputs) {
            debug!(step = %step.name, "Dry run: skipping side-effecting step");
            let mut outputs = Map::new();
            outputs.insert("dry_run".to_string(), json!(true));
            outputs.insert("step_type".to_string(), json!(step.step_type.to_string()));
            return StepResult::ok(outputs)
                .with_log(format!("dry run: {} step not executed", step.step_type));
        }

        let budget = Duration::from_secs(step.timeout_secs);
        let mut attempt: u32 = 0;
        loop {
            let result = match timeout(budget, handler.execute(step, inputs, context)).await {
                Ok(result) => result,
                Err(_) => StepResult::fail(format!(
                    "timeout after {} seconds",
                    step.timeout_secs
                )),
            };

            if result.success || attempt >= step.retry_count || !result.retryable {
                return result;
            }

            // Exponential backoff: base * 2^attempt
            let delay = self.backoff_base * 2u32.saturating_pow(attempt);
            warn!(
                step = %step.name,
                attempt = attempt + 1,
                max_attempts = step.retry_count + 1,
                delay_ms = delay.as_millis() as u64,
                "Step failed; retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Copy mapped output keys, or merge everything when unmapped
    fn apply_outputs(
        &self,
        step: &Step,
        outputs: &Map<String, Value>,
        context: &mut ExecutionContext,
    ) {
        match &step.output_mapping {
            Some(mapping) => {
                for (context_key, output_key) in mapping {
                    let Some(output_key) = output_key.as_str() else { continue };
                    if let Some(value) = outputs.get(output_key) {
                        context.output.insert(context_key.clone(), value.clone());
                    }
                }
            }
            None => {
                for (key, value) in outputs {
                    context.output.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Validate a pipeline against the registered handlers
    pub fn validate(&self, pipeline: &crate::core::Pipeline) -> Vec<String> {
        self.handlers.validate_pipeline(pipeline)
    }
}
