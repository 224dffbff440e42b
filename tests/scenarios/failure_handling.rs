//! Test: failing steps abort the pipeline with partial results preserved

use crate::helpers::*;
use serde_json::{json, Map};
use weft::core::{Step, StepType};
use weft::{Pipeline, Store};

fn ok_transform(name: &str, order: u32, text: &str) -> Step {
    Step::new(name, StepType::Transform, order)
        .with_config("transform_type", json!("format_text"))
        .with_config("template", json!(text))
        .with_config("data", json!({}))
}

fn failing_transform(name: &str, order: u32) -> Step {
    // text_to_json on non-string data always fails
    Step::new(name, StepType::Transform, order)
        .with_config("transform_type", json!("text_to_json"))
        .with_config("data", json!(42))
}

/// Step k fails: exactly k step executions, execution Failed, results
/// equal the merged outputs of steps 1..k-1
#[tokio::test]
async fn test_failure_aborts_remaining_steps() {
    let harness = harness(vec![]);
    let pipeline = Pipeline::new("abort", "alice")
        .with_step(ok_transform("first", 10, "one"))
        .with_step(failing_transform("second", 20))
        .with_step(ok_transform("never", 30, "three"));

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_failed(&execution);
    assert_eq!(
        execution.error.as_deref(),
        Some("Step execution failed: second")
    );

    // Exactly two records: the third step never dispatched
    let records = harness.step_records(&execution).await;
    assert_eq!(records.len(), 2);
    assert_step_completed(&records, "first");
    assert_step_failed(&records, "second", "text_to_json");

    // Partial results preserved, not discarded
    assert_eq!(execution.results.get("result"), Some(&json!("one")));
}

/// First step failing leaves exactly one record and empty results
#[tokio::test]
async fn test_first_step_failure() {
    let harness = harness(vec![]);
    let pipeline = Pipeline::new("fail-fast", "alice")
        .with_step(failing_transform("boom", 10))
        .with_step(ok_transform("never", 20, "x"));

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_failed(&execution);

    let records = harness.step_records(&execution).await;
    assert_eq!(records.len(), 1);
    assert!(execution.results.is_empty());
}

/// Provider auth failures surface as failed prompt steps
#[tokio::test]
async fn test_provider_auth_error_fails_step() {
    let harness = harness(vec![MockReply::AuthError]);
    let pipeline = Pipeline::new("auth", "alice").with_step(
        Step::new("ask", StepType::Prompt, 10)
            .with_config("model_id", json!("gpt-4o"))
            .with_config("prompt", json!("hello")),
    );

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_failed(&execution);

    let records = harness.step_records(&execution).await;
    assert_step_failed(&records, "ask", "authentication failed");
    // Non-retryable: the provider was called exactly once
    assert_eq!(harness.mock.call_count(), 1);
}

/// Variable defaults survive into partial results on failure
#[tokio::test]
async fn test_failure_keeps_variable_defaults() {
    let harness = harness(vec![]);
    let mut pipeline = Pipeline::new("vars", "alice").with_step(failing_transform("boom", 10));
    pipeline
        .variables
        .insert("env".to_string(), json!("staging"));

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_failed(&execution);
    assert_eq!(execution.results.get("env"), Some(&json!("staging")));
}

/// An HTTP step hitting a 404 fails the step and the execution
#[tokio::test]
async fn test_http_404_fails_execution() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // One-shot server answering every request with a 404
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
        let _ = socket
            .write_all(
                b"HTTP/1.1 404 Not Found\r\ncontent-length: 9\r\nconnection: close\r\n\r\nnot found",
            )
            .await;
    });

    let harness = harness(vec![]);
    let pipeline = Pipeline::new("http-404", "alice").with_step(
        Step::new("fetch", StepType::Http, 10)
            .with_config("url", json!(format!("http://127.0.0.1:{}/missing", port))),
    );

    let execution = harness.run(&pipeline, Map::new()).await;
    server.await.unwrap();

    assert_execution_failed(&execution);
    assert_eq!(
        execution.error.as_deref(),
        Some("Step execution failed: fetch")
    );

    let records = harness.step_records(&execution).await;
    assert_step_failed(&records, "fetch", "404");
}

/// Cancellation before the next step stops dispatch
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_execution_stops_dispatch() {
    use weft::core::ExecutionStatus;

    let harness = harness(vec![]);
    let pipeline = Pipeline::new("cancel", "alice")
        .with_step(ok_transform("only", 10, "x"));
    harness.store.save_pipeline(&pipeline).await.unwrap();

    // Cancel between registration and the first step by removing the id
    // as soon as it appears in the active registry.
    let engine = &harness.engine;
    let active = engine.active().clone();
    let watcher = tokio::spawn(async move {
        loop {
            let ids = active.ids().await;
            if let Some(id) = ids.first() {
                active.remove(*id).await;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_micros(50)).await;
        }
    });

    let execution = engine
        .execute(
            pipeline.id,
            "alice",
            Map::new(),
            weft::ExecuteOptions::default(),
        )
        .await
        .unwrap();
    watcher.await.unwrap();

    // Either the watcher won (Cancelled before the step) or the single
    // step finished first (Completed); both are terminal, never Running.
    assert!(execution.status.is_terminal());
    assert!(matches!(
        execution.status,
        ExecutionStatus::Cancelled | ExecutionStatus::Completed
    ));
}
