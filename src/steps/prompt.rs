//! Prompt step - model calls through the provider abstraction

use crate::core::{ExecutionContext, Step, StepMetrics, StepType};
use crate::cost::CostTracker;
use crate::provider::{
    models, CredentialSource, GenerateRequest, ProviderRegistry,
};
use crate::steps::{interpolate_inputs, StepHandler, StepResult};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes prompt steps against a resolved provider and model
pub struct PromptHandler {
    providers: Arc<ProviderRegistry>,
    credentials: Arc<dyn CredentialSource>,
    cost: Arc<CostTracker>,
}

impl PromptHandler {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        credentials: Arc<dyn CredentialSource>,
        cost: Arc<CostTracker>,
    ) -> Self {
        Self {
            providers,
            credentials,
            cost,
        }
    }
}

#[async_trait]
impl StepHandler for PromptHandler {
    fn step_type(&self) -> StepType {
        StepType::Prompt
    }

    fn validate(&self, step: &Step) -> Vec<String> {
        let mut errors = Vec::new();
        if step.config_str("model_id").is_none() {
            errors.push("model_id is required".to_string());
        }
        if step.config_str("prompt").is_none() {
            errors.push("prompt is required".to_string());
        }
        errors
    }

    async fn execute(
        &self,
        step: &Step,
        inputs: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> StepResult {
        let Some(model_id) = inputs.get("model_id").and_then(Value::as_str) else {
            return StepResult::fail_terminal("model_id is required");
        };
        let Some(template) = inputs.get("prompt").and_then(Value::as_str) else {
            return StepResult::fail_terminal("prompt is required");
        };

        // Resolve provider + model through the catalog
        let Some(descriptor) = models::find(model_id) else {
            return StepResult::fail_terminal(format!("unknown model: {}", model_id));
        };

        let Some(credentials) = self
            .credentials
            .credentials(&context.user_id, descriptor.provider)
            .await
        else {
            return StepResult::fail_terminal(format!(
                "no {} credentials for user {}",
                descriptor.provider, context.user_id
            ));
        };

        let provider = match self
            .providers
            .get_or_create(descriptor.provider, credentials)
            .await
        {
            Ok(provider) => provider,
            Err(err) => return StepResult::fail_terminal(err.to_string()),
        };

        let prompt = interpolate_inputs(template, inputs, context);
        let system = inputs
            .get("system")
            .and_then(Value::as_str)
            .map(|s| interpolate_inputs(s, inputs, context));
        debug!(model = model_id, "Rendered prompt ({} chars)", prompt.len());

        // Chat vs completion shape by the model-id naming heuristic
        let mut request = if models::prefers_completion_shape(model_id) {
            GenerateRequest::completion(model_id, &prompt)
        } else {
            GenerateRequest::chat(model_id, &prompt)
        };
        request.system = system;
        request.temperature = inputs
            .get("temperature")
            .and_then(Value::as_f64)
            .map(|t| t as f32);
        request.max_tokens = inputs
            .get("max_tokens")
            .and_then(Value::as_u64)
            .map(|t| t as u32);

        let response = match provider.generate(request).await {
            Ok(response) => response,
            Err(err) => {
                let result = StepResult::fail(format!("provider call failed: {}", err));
                return StepResult {
                    retryable: err.is_retryable(),
                    ..result
                };
            }
        };

        let usage = response.usage;
        let rate = crate::cost::pricing::rate_for(descriptor.provider, model_id);
        let prompt_cost = (usage.input_tokens as f64 / 1000.0) * rate.input_per_1k;
        let completion_cost = (usage.output_tokens as f64 / 1000.0) * rate.output_per_1k;

        let total_cost = match self
            .cost
            .record_usage(
                descriptor.provider,
                model_id,
                "generate",
                usage.input_tokens,
                usage.output_tokens,
                Some(context.execution_id),
                context.current_step_execution,
                Some(&context.user_id),
            )
            .await
        {
            Ok(cost) => cost,
            Err(err) => {
                // Usage bookkeeping must not fail the step
                warn!("Failed to record usage: {:#}", err);
                response.cost
            }
        };

        let mut outputs = Map::new();
        outputs.insert("content".to_string(), json!(response.content));
        outputs.insert("model".to_string(), json!(model_id));
        if let Some(reason) = &response.finish_reason {
            outputs.insert("finish_reason".to_string(), json!(reason));
        }
        outputs.insert(
            "metrics".to_string(),
            json!({
                "prompt_tokens": usage.input_tokens,
                "completion_tokens": usage.output_tokens,
                "total_tokens": usage.total(),
                "prompt_cost": prompt_cost,
                "completion_cost": completion_cost,
                "total_cost": total_cost,
                "duration_ms": response.latency_ms,
            }),
        );

        StepResult::ok(outputs).with_metrics(StepMetrics {
            duration_ms: response.latency_ms,
            tokens: usage.total(),
            cost: total_cost,
        })
    }
}
