//! Step handlers and the type-to-handler registry

pub mod code;
pub mod condition;
pub mod expr;
pub mod file;
pub mod http;
pub mod prompt;
pub mod transform;

use crate::core::{ExecutionContext, Step, StepMetrics, StepType};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub use code::CodeHandler;
pub use condition::ConditionHandler;
pub use file::FileHandler;
pub use http::HttpHandler;
pub use prompt::PromptHandler;
pub use transform::TransformHandler;

/// Outcome of one handler invocation
///
/// Handlers never propagate errors past the dispatcher; failures are
/// returned as values.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Whether the step succeeded
    pub success: bool,

    /// Handler outputs (merged or mapped into the context on success)
    pub outputs: Map<String, Value>,

    /// Error text on failure
    pub error: Option<String>,

    /// Duration/token/cost metrics
    pub metrics: StepMetrics,

    /// Structured log lines
    pub logs: Vec<String>,

    /// Whether the orchestrator may retry this failure
    pub retryable: bool,
}

impl StepResult {
    /// Successful result with outputs
    pub fn ok(outputs: Map<String, Value>) -> Self {
        Self {
            success: true,
            outputs,
            error: None,
            metrics: StepMetrics::default(),
            logs: Vec::new(),
            retryable: true,
        }
    }

    /// Failed result
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            outputs: Map::new(),
            error: Some(error.into()),
            metrics: StepMetrics::default(),
            logs: Vec::new(),
            retryable: true,
        }
    }

    /// Failed result the retry wrapper must not repeat
    pub fn fail_terminal(error: impl Into<String>) -> Self {
        Self {
            retryable: false,
            ..Self::fail(error)
        }
    }

    /// Attach metrics, consuming and returning the result
    pub fn with_metrics(mut self, metrics: StepMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Append a log line, consuming and returning the result
    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }
}

/// One step type's implementation
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// The step type this handler executes
    fn step_type(&self) -> StepType;

    /// Configuration problems, empty when valid
    fn validate(&self, step: &Step) -> Vec<String>;

    /// Run the step against resolved inputs and the shared context
    async fn execute(
        &self,
        step: &Step,
        inputs: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> StepResult;

    /// Whether this invocation would touch the outside world
    ///
    /// Consulted by dry-run to decide what to short-circuit.
    fn side_effecting(&self, step: &Step, inputs: &Map<String, Value>) -> bool {
        let _ = (step, inputs);
        false
    }
}

/// Maps step types to handlers
///
/// Adding a step type means registering a handler here; dispatch never
/// branches on type names.
pub struct HandlerRegistry {
    handlers: HashMap<StepType, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its own step type
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(handler.step_type(), handler);
    }

    /// Look up the handler for a step type
    pub fn get(&self, step_type: StepType) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&step_type).cloned()
    }

    /// Validate every enabled step of a pipeline against its handler
    pub fn validate_pipeline(&self, pipeline: &crate::core::Pipeline) -> Vec<String> {
        let mut errors = pipeline.validate();
        for step in pipeline.enabled_steps() {
            match self.get(step.step_type) {
                Some(handler) => {
                    for problem in handler.validate(step) {
                        errors.push(format!("step '{}': {}", step.name, problem));
                    }
                }
                None => errors.push(format!(
                    "step '{}': no handler registered for type {}",
                    step.name, step.step_type
                )),
            }
        }
        errors
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with all six builtin handlers
pub fn default_handlers(
    providers: Arc<crate::provider::ProviderRegistry>,
    credentials: Arc<dyn crate::provider::CredentialSource>,
    cost: Arc<crate::cost::CostTracker>,
    sandbox_root: impl Into<std::path::PathBuf>,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(PromptHandler::new(providers, credentials, cost)));
    registry.register(Arc::new(CodeHandler::new()));
    registry.register(Arc::new(FileHandler::new(sandbox_root)));
    registry.register(Arc::new(HttpHandler::new()));
    registry.register(Arc::new(ConditionHandler::new()));
    registry.register(Arc::new(TransformHandler::new()));
    registry
}

/// Overlay input-mapping lookups onto a step's config
///
/// The result starts as `step.config`; each mapping entry fetches a
/// context value by dotted path and stores it under the mapped name.
/// Missing paths yield absent keys, never errors.
pub fn resolve_inputs(step: &Step, context: &ExecutionContext) -> Map<String, Value> {
    let mut inputs = step.config.clone();
    for (name, path) in &step.input_mapping {
        let Some(path) = path.as_str() else { continue };
        if let Some(value) = context.resolve(path) {
            inputs.insert(name.clone(), value.clone());
        }
    }
    inputs
}

/// Interpolate `{{var}}` against resolved inputs first, then the context
pub fn interpolate_inputs(
    template: &str,
    inputs: &Map<String, Value>,
    context: &ExecutionContext,
) -> String {
    crate::core::context::interpolate_with(template, |path| {
        if let Some(value) = inputs.get(path) {
            return Some(crate::core::context::stringify(value));
        }
        context.resolve(path).map(crate::core::context::stringify)
    })
}
