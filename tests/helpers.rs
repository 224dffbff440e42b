//! Test utility functions for weft scenarios

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use weft::core::{Execution, ExecutionStatus, StepExecution, StepStatus};
use weft::cost::CostTracker;
use weft::persistence::MemoryStore;
use weft::provider::{
    models, Credentials, DeltaStream, GenerateRequest, GenerateResponse, ModelDescriptor,
    Provider, ProviderError, ProviderHealth, ProviderKind, ProviderRegistry, ProviderResult,
    StaticCredentials, Usage,
};
use weft::steps::default_handlers;
use weft::{Engine, ExecuteOptions, Pipeline, Store};

/// One scripted reply from the mock provider
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Succeed with this content (1000 input / 1000 output tokens)
    Content(String),
    /// Fail with a retryable server error
    RetryableError(String),
    /// Fail with a non-retryable authentication error
    AuthError,
}

/// Mock provider that returns predefined replies in order
#[derive(Debug)]
pub struct MockProvider {
    replies: Arc<Vec<MockReply>>,
    index: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl MockProvider {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Arc::new(replies),
            index: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Share the reply script and counters with another instance
    fn clone_shared(&self) -> Self {
        Self {
            replies: self.replies.clone(),
            index: self.index.clone(),
            calls: self.calls.clone(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn list_models(&self) -> ProviderResult<Vec<ModelDescriptor>> {
        Ok(models::models_for(ProviderKind::OpenAi))
    }

    async fn generate(&self, _request: GenerateRequest) -> ProviderResult<GenerateResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let idx = self.index.fetch_add(1, Ordering::SeqCst);

        let reply = self.replies.get(idx).cloned().unwrap_or_else(|| {
            MockReply::RetryableError(format!("no scripted reply for request {}", idx + 1))
        });

        match reply {
            MockReply::Content(content) => Ok(GenerateResponse {
                content,
                usage: Usage {
                    input_tokens: 1000,
                    output_tokens: 1000,
                },
                finish_reason: Some("stop".to_string()),
                cost: 0.0,
                latency_ms: 1,
            }),
            MockReply::RetryableError(message) => Err(ProviderError::Api {
                provider: "openai".to_string(),
                message,
                retryable: true,
            }),
            MockReply::AuthError => Err(ProviderError::Authentication {
                provider: "openai".to_string(),
                message: "bad key".to_string(),
            }),
        }
    }

    async fn stream(&self, _request: GenerateRequest) -> ProviderResult<DeltaStream> {
        Err(ProviderError::Api {
            provider: "openai".to_string(),
            message: "mock does not stream".to_string(),
            retryable: false,
        })
    }

    async fn health_check(&self) -> ProviderHealth {
        ProviderHealth {
            available: true,
            latency_ms: 0,
            error_rate: 0.0,
        }
    }
}

/// Everything a scenario needs to run pipelines against the mock
pub struct TestHarness {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub mock: MockProvider,
    pub sandbox: tempfile::TempDir,
}

/// Build an engine wired to a mock provider with the given script
pub fn harness(replies: Vec<MockReply>) -> TestHarness {
    let store = Arc::new(MemoryStore::new());
    let mock = MockProvider::new(replies);

    let mut providers = ProviderRegistry::new();
    let shared = mock.clone_shared();
    providers.register(ProviderKind::OpenAi, move |_| {
        Arc::new(shared.clone_shared())
    });

    let credentials =
        StaticCredentials::new().with(ProviderKind::OpenAi, Credentials::from_key("sk-test"));
    let cost = Arc::new(CostTracker::new(store.clone()));
    let sandbox = tempfile::tempdir().expect("tempdir");
    let handlers = default_handlers(
        Arc::new(providers),
        Arc::new(credentials),
        cost,
        sandbox.path(),
    );

    let engine = Engine::new(store.clone(), Arc::new(handlers))
        .with_backoff_base(Duration::from_millis(1));

    TestHarness {
        engine,
        store,
        mock,
        sandbox,
    }
}

impl TestHarness {
    /// Save and execute a pipeline as its owner
    pub async fn run(&self, pipeline: &Pipeline, input: Map<String, Value>) -> Execution {
        self.run_with_options(pipeline, input, ExecuteOptions::default())
            .await
    }

    pub async fn run_with_options(
        &self,
        pipeline: &Pipeline,
        input: Map<String, Value>,
        options: ExecuteOptions,
    ) -> Execution {
        self.store.save_pipeline(pipeline).await.expect("save pipeline");
        self.engine
            .execute(pipeline.id, &pipeline.owner, input, options)
            .await
            .expect("execute pipeline")
    }

    /// Step-execution records for an execution, in dispatch order
    pub async fn step_records(&self, execution: &Execution) -> Vec<StepExecution> {
        self.store
            .list_step_executions(execution.id)
            .await
            .expect("list step executions")
    }
}

/// Build an input map from key/value pairs
pub fn input(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Assert the execution completed
pub fn assert_execution_completed(execution: &Execution) {
    assert_eq!(
        execution.status,
        ExecutionStatus::Completed,
        "execution should be Completed, got {:?} (error: {:?})",
        execution.status,
        execution.error
    );
}

/// Assert the execution failed
pub fn assert_execution_failed(execution: &Execution) {
    assert_eq!(
        execution.status,
        ExecutionStatus::Failed,
        "execution should be Failed, got {:?}",
        execution.status
    );
}

/// Assert a step record completed and return its outputs
pub fn assert_step_completed(records: &[StepExecution], name: &str) -> Map<String, Value> {
    let record = records
        .iter()
        .find(|r| r.step_name == name)
        .unwrap_or_else(|| panic!("no step record named {:?}", name));
    assert_eq!(
        record.status,
        StepStatus::Completed,
        "step {:?} should be Completed, got {:?} (error: {:?})",
        name,
        record.status,
        record.error
    );
    record.outputs.clone().expect("completed step has outputs")
}

/// Assert a step record failed with an error containing `needle`
pub fn assert_step_failed(records: &[StepExecution], name: &str, needle: &str) {
    let record = records
        .iter()
        .find(|r| r.step_name == name)
        .unwrap_or_else(|| panic!("no step record named {:?}", name));
    assert_eq!(record.status, StepStatus::Failed);
    assert!(record.outputs.is_none(), "failed step must have no outputs");
    let error = record.error.as_deref().unwrap_or("");
    assert!(
        error.contains(needle),
        "step {:?} error {:?} does not contain {:?}",
        name,
        error,
        needle
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft::core::{Step, StepType};

    #[tokio::test]
    async fn test_harness_runs_transform_pipeline() {
        let harness = harness(vec![]);
        let pipeline = Pipeline::new("smoke", "alice").with_step(
            Step::new("stringify", StepType::Transform, 10)
                .with_config("transform_type", json!("json_to_text"))
                .with_config("data", json!({"ok": true})),
        );

        let execution = harness.run(&pipeline, Map::new()).await;
        assert_execution_completed(&execution);

        let records = harness.step_records(&execution).await;
        assert_eq!(records.len(), 1);
        assert_step_completed(&records, "stringify");
    }

    #[tokio::test]
    async fn test_mock_provider_script_order() {
        let mock = MockProvider::new(vec![
            MockReply::Content("first".to_string()),
            MockReply::AuthError,
        ]);

        let first = mock.generate(GenerateRequest::chat("gpt-4o", "x")).await;
        assert_eq!(first.unwrap().content, "first");

        let second = mock.generate(GenerateRequest::chat("gpt-4o", "x")).await;
        assert!(!second.unwrap_err().is_retryable());
        assert_eq!(mock.call_count(), 2);
    }
}
