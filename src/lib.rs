//! weft - an AI workflow pipeline engine
//!
//! Ordered, typed steps (prompt, code, file, http, condition,
//! transform) run sequentially against a shared execution context; a
//! provider abstraction normalizes AI backends behind one interface;
//! a cost tracker prices every provider call.

pub mod cli;
pub mod core;
pub mod cost;
pub mod execution;
pub mod persistence;
pub mod provider;
pub mod steps;

// Re-export commonly used types
pub use crate::core::{
    Execution, ExecutionContext, ExecutionStatus, Pipeline, PipelineDefinition, Step,
    StepExecution, StepStatus, StepType,
};
pub use cost::{CostTracker, UsageFilter, UsageRecord};
pub use execution::{ActiveExecutions, Engine, EngineError, ExecuteOptions};
pub use persistence::{MemoryStore, Store};
pub use provider::{
    CredentialSource, Credentials, GenerateRequest, GenerateResponse, ModelDescriptor, Provider,
    ProviderError, ProviderKind, ProviderRegistry, StaticCredentials,
};
pub use steps::{default_handlers, HandlerRegistry, StepHandler, StepResult};
