//! Test: retry wrapper - attempt counts and retryable classification

use crate::helpers::*;
use serde_json::{json, Map};
use weft::core::{Step, StepType};
use weft::Pipeline;

fn prompt_step(retry_count: u32) -> Step {
    let mut step = Step::new("ask", StepType::Prompt, 10)
        .with_config("model_id", json!("gpt-4o"))
        .with_config("prompt", json!("hello"));
    step.retry_count = retry_count;
    step
}

/// Transient provider errors are retried up to retry_count extra times
#[tokio::test]
async fn test_retry_until_success() {
    let harness = harness(vec![
        MockReply::RetryableError("overloaded".to_string()),
        MockReply::RetryableError("overloaded".to_string()),
        MockReply::Content("recovered".to_string()),
    ]);
    let pipeline = Pipeline::new("retry", "alice").with_step(prompt_step(2));

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_completed(&execution);
    assert_eq!(harness.mock.call_count(), 3);
    assert_eq!(execution.results.get("content"), Some(&json!("recovered")));
}

/// Retries stop once the budget is exhausted
#[tokio::test]
async fn test_retries_exhausted() {
    let harness = harness(vec![
        MockReply::RetryableError("overloaded".to_string()),
        MockReply::RetryableError("overloaded".to_string()),
        MockReply::Content("too late".to_string()),
    ]);
    let pipeline = Pipeline::new("exhausted", "alice").with_step(prompt_step(1));

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_failed(&execution);
    // Initial attempt + 1 retry, never the third reply
    assert_eq!(harness.mock.call_count(), 2);
}

/// retry_count = 0 means exactly one attempt
#[tokio::test]
async fn test_no_retries_by_default() {
    let harness = harness(vec![MockReply::RetryableError("overloaded".to_string())]);
    let pipeline = Pipeline::new("single", "alice").with_step(prompt_step(0));

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_failed(&execution);
    assert_eq!(harness.mock.call_count(), 1);
}

/// Non-retryable failures short-circuit the retry budget
#[tokio::test]
async fn test_non_retryable_error_skips_budget() {
    let harness = harness(vec![MockReply::AuthError]);
    let pipeline = Pipeline::new("terminal", "alice").with_step(prompt_step(5));

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_failed(&execution);
    assert_eq!(harness.mock.call_count(), 1);
}

/// A step timeout force-fails the attempt and mentions the budget
#[tokio::test]
async fn test_step_timeout_mentions_budget() {
    let harness = harness(vec![]);

    let mut step = Step::new("sleepy", StepType::Code, 10)
        .with_config("language", json!("shell"))
        .with_config("code", json!("sleep 30"));
    step.timeout_secs = 1;
    let pipeline = Pipeline::new("timeout", "alice").with_step(step);

    let started = std::time::Instant::now();
    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_failed(&execution);
    // Returned at the budget, not after the sleep
    assert!(started.elapsed() < std::time::Duration::from_secs(10));

    let records = harness.step_records(&execution).await;
    assert_step_failed(&records, "sleepy", "timeout");
}
