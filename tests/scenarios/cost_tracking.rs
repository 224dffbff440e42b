//! Test: usage records and execution cost accounting

use crate::helpers::*;
use serde_json::{json, Map};
use weft::core::{Step, StepType};
use weft::cost::{pricing, UsageFilter};
use weft::provider::ProviderKind;
use weft::{Pipeline, Store};

fn prompt(name: &str, order: u32) -> Step {
    Step::new(name, StepType::Prompt, order)
        .with_config("model_id", json!("gpt-4o"))
        .with_config("prompt", json!("hello"))
}

/// Execution totals equal the sum over its step executions
#[tokio::test]
async fn test_execution_totals_sum_step_metrics() {
    let harness = harness(vec![
        MockReply::Content("a".to_string()),
        MockReply::Content("b".to_string()),
    ]);
    let pipeline = Pipeline::new("totals", "alice")
        .with_step(prompt("one", 10))
        .with_step(prompt("two", 20));

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_completed(&execution);

    let records = harness.step_records(&execution).await;
    let step_cost: f64 = records.iter().map(|r| r.metrics.cost).sum();
    let step_tokens: u64 = records.iter().map(|r| r.metrics.tokens).sum();

    assert!((execution.total_cost - step_cost).abs() < 1e-9);
    assert_eq!(execution.total_tokens, step_tokens);

    // The mock reports 1000/1000 tokens per call at gpt-4o rates
    let per_call = pricing::calculate_cost(ProviderKind::OpenAi, "gpt-4o", 1000, 1000);
    assert!((execution.total_cost - 2.0 * per_call).abs() < 1e-9);
    assert_eq!(execution.total_tokens, 4000);
}

/// Every prompt call appends a usage record linked to its execution
#[tokio::test]
async fn test_usage_records_linked_to_execution() {
    let harness = harness(vec![MockReply::Content("a".to_string())]);
    let pipeline = Pipeline::new("linked", "alice").with_step(prompt("one", 10));

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_completed(&execution);

    let records = harness
        .store
        .query_usage(&UsageFilter::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record.execution_id, Some(execution.id));
    assert_eq!(record.user_id.as_deref(), Some("alice"));
    assert_eq!(record.model, "gpt-4o");
    assert_eq!(record.operation, "generate");
    assert_eq!(record.input_tokens, 1000);

    let step_records = harness.step_records(&execution).await;
    assert_eq!(record.step_execution_id, Some(step_records[0].id));
}

/// Failed provider calls record no usage
#[tokio::test]
async fn test_failed_call_records_no_usage() {
    let harness = harness(vec![MockReply::AuthError]);
    let pipeline = Pipeline::new("no-usage", "alice").with_step(prompt("one", 10));

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_failed(&execution);

    let records = harness
        .store
        .query_usage(&UsageFilter::default())
        .await
        .unwrap();
    assert!(records.is_empty());
    assert_eq!(execution.total_cost, 0.0);
}

/// Non-prompt steps contribute duration but no tokens or cost
#[tokio::test]
async fn test_pure_steps_cost_nothing() {
    let harness = harness(vec![]);
    let pipeline = Pipeline::new("free", "alice").with_step(
        Step::new("transform", StepType::Transform, 10)
            .with_config("transform_type", json!("json_to_text"))
            .with_config("data", json!({"x": 1})),
    );

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_completed(&execution);
    assert_eq!(execution.total_cost, 0.0);
    assert_eq!(execution.total_tokens, 0);
}
