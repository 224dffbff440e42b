//! Test: multi-step pipelines where every step succeeds

use crate::helpers::*;
use serde_json::{json, Map};
use weft::core::{Step, StepType};
use weft::Pipeline;

/// N enabled steps, all succeed: exactly N completed step executions
#[tokio::test]
async fn test_all_steps_succeed() {
    let harness = harness(vec![]);
    let pipeline = Pipeline::new("chain", "alice")
        .with_step(
            Step::new("make", StepType::Transform, 10)
                .with_config("transform_type", json!("json_to_text"))
                .with_config("data", json!([1, 2, 3])),
        )
        .with_step(
            Step::new("parse", StepType::Transform, 20)
                .with_config("transform_type", json!("text_to_json"))
                .with_input("data", "result"),
        )
        .with_step(
            Step::new("check", StepType::Condition, 30)
                .with_config("exists", json!("result")),
        );

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_completed(&execution);

    let records = harness.step_records(&execution).await;
    assert_eq!(records.len(), 3);
    for name in ["make", "parse", "check"] {
        assert_step_completed(&records, name);
    }
}

/// Steps run by `order`, not by the order they were added
#[tokio::test]
async fn test_step_order_respected_regardless_of_insertion() {
    let harness = harness(vec![]);

    // Inserted out of order on purpose
    let pipeline = Pipeline::new("ordered", "alice")
        .with_step(
            Step::new("third", StepType::Transform, 30)
                .with_config("transform_type", json!("format_text"))
                .with_config("template", json!("3"))
                .with_config("data", json!({})),
        )
        .with_step(
            Step::new("first", StepType::Transform, 10)
                .with_config("transform_type", json!("format_text"))
                .with_config("template", json!("1"))
                .with_config("data", json!({})),
        )
        .with_step(
            Step::new("second", StepType::Transform, 20)
                .with_config("transform_type", json!("format_text"))
                .with_config("template", json!("2"))
                .with_config("data", json!({})),
        );

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_completed(&execution);

    let records = harness.step_records(&execution).await;
    let names: Vec<&str> = records.iter().map(|r| r.step_name.as_str()).collect();
    assert_eq!(names, vec!["first", "second", "third"]);
}

/// Later steps see earlier outputs; overwrites are allowed
#[tokio::test]
async fn test_outputs_accumulate_and_overwrite() {
    let harness = harness(vec![]);
    let pipeline = Pipeline::new("accumulate", "alice")
        .with_step(
            Step::new("seed", StepType::Transform, 10)
                .with_config("transform_type", json!("format_text"))
                .with_config("template", json!("one"))
                .with_config("data", json!({})),
        )
        .with_step(
            Step::new("overwrite", StepType::Transform, 20)
                .with_config("transform_type", json!("format_text"))
                .with_config("template", json!("two"))
                .with_config("data", json!({})),
        );

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_completed(&execution);

    // Both steps write `result`; the later one wins
    assert_eq!(execution.results.get("result"), Some(&json!("two")));
}

/// output_mapping copies only the mapped keys under their mapped names
#[tokio::test]
async fn test_output_mapping_renames_and_filters() {
    let harness = harness(vec![]);

    let mut mapped = Step::new("aggregate", StepType::Transform, 10)
        .with_config("transform_type", json!("aggregate"))
        .with_config("data", json!([{"n": 2}, {"n": 4}]))
        .with_config("field", json!("n"));
    let mut mapping = Map::new();
    mapping.insert("stats".to_string(), json!("result"));
    mapped.output_mapping = Some(mapping);

    let pipeline = Pipeline::new("mapped", "alice").with_step(mapped);

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_completed(&execution);

    // Only the mapped name appears in the results namespace
    assert!(execution.results.contains_key("stats"));
    assert!(!execution.results.contains_key("result"));
    assert_eq!(execution.results["stats"]["sum"], json!(6.0));
}

/// Disabled steps are never dispatched
#[tokio::test]
async fn test_disabled_step_not_dispatched() {
    let harness = harness(vec![]);

    let mut disabled = Step::new("off", StepType::Transform, 20)
        .with_config("transform_type", json!("json_to_text"))
        .with_config("data", json!({}));
    disabled.enabled = false;

    let pipeline = Pipeline::new("partial", "alice")
        .with_step(
            Step::new("on", StepType::Transform, 10)
                .with_config("transform_type", json!("json_to_text"))
                .with_config("data", json!({})),
        )
        .with_step(disabled);

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_completed(&execution);

    let records = harness.step_records(&execution).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].step_name, "on");
}
