//! Test: dry-run short-circuits side-effecting steps

use crate::helpers::*;
use serde_json::{json, Map};
use weft::core::{Step, StepType};
use weft::{ExecuteOptions, Pipeline};

fn dry_run() -> ExecuteOptions {
    ExecuteOptions {
        dry_run: true,
        debug: false,
    }
}

/// Code steps never spawn a process under dry-run
#[tokio::test]
async fn test_dry_run_skips_code_step() {
    let harness = harness(vec![]);
    let marker = harness.sandbox.path().join("side-effect.txt");

    let pipeline = Pipeline::new("dry-code", "alice").with_step(
        Step::new("touch", StepType::Code, 10)
            .with_config("language", json!("shell"))
            .with_config("code", json!(format!("touch {}", marker.display()))),
    );

    let execution = harness
        .run_with_options(&pipeline, Map::new(), dry_run())
        .await;

    assert_execution_completed(&execution);
    assert!(!marker.exists(), "dry run must not run the child process");

    // Synthetic trace still recorded
    let records = harness.step_records(&execution).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, weft::StepStatus::Skipped);
    assert_eq!(execution.results.get("dry_run"), Some(&json!(true)));
}

/// File writes are skipped; reads still run
#[tokio::test]
async fn test_dry_run_skips_writes_but_reads_run() {
    let harness = harness(vec![]);
    std::fs::write(harness.sandbox.path().join("existing.txt"), "data").unwrap();

    let pipeline = Pipeline::new("dry-file", "alice")
        .with_step(
            Step::new("write", StepType::File, 10)
                .with_config("operation", json!("write"))
                .with_config("file_path", json!("new.txt"))
                .with_config("content", json!("nope")),
        )
        .with_step(
            Step::new("read", StepType::File, 20)
                .with_config("operation", json!("read"))
                .with_config("file_path", json!("existing.txt")),
        );

    let execution = harness
        .run_with_options(&pipeline, Map::new(), dry_run())
        .await;

    assert_execution_completed(&execution);
    assert!(!harness.sandbox.path().join("new.txt").exists());

    // The read is side-effect free and really executed
    assert_eq!(execution.results.get("content"), Some(&json!("data")));
}

/// Http steps are skipped entirely
#[tokio::test]
async fn test_dry_run_skips_http() {
    let harness = harness(vec![]);
    let pipeline = Pipeline::new("dry-http", "alice").with_step(
        Step::new("call", StepType::Http, 10)
            // Would fail instantly if actually sent
            .with_config("url", json!("http://127.0.0.1:1/unreachable")),
    );

    let execution = harness
        .run_with_options(&pipeline, Map::new(), dry_run())
        .await;

    assert_execution_completed(&execution);
    assert_eq!(execution.results.get("dry_run"), Some(&json!(true)));
    assert_eq!(execution.results.get("step_type"), Some(&json!("http")));
}

/// Pure steps still execute under dry-run
#[tokio::test]
async fn test_dry_run_still_runs_pure_steps() {
    let harness = harness(vec![]);
    let pipeline = Pipeline::new("dry-pure", "alice").with_step(
        Step::new("transform", StepType::Transform, 10)
            .with_config("transform_type", json!("aggregate"))
            .with_config("data", json!([{"n": 1}, {"n": 3}]))
            .with_config("field", json!("n")),
    );

    let execution = harness
        .run_with_options(&pipeline, Map::new(), dry_run())
        .await;

    assert_execution_completed(&execution);
    assert_eq!(execution.results["result"]["sum"], json!(4.0));
}
