//! Test: template interpolation and context path resolution

use crate::helpers::*;
use serde_json::{json, Map};
use weft::core::{Step, StepType};
use weft::Pipeline;

/// A prompt interpolating {{input.topic}} from caller parameters
#[tokio::test]
async fn test_prompt_interpolates_input_parameters() {
    let harness = harness(vec![MockReply::Content(
        "Kittens are small cats.".to_string(),
    )]);
    let pipeline = Pipeline::new("topics", "alice").with_step(
        Step::new("ask", StepType::Prompt, 10)
            .with_config("model_id", json!("gpt-4o"))
            .with_config("prompt", json!("Topic: {{input.topic}}")),
    );

    let execution = harness
        .run(&pipeline, input(&[("topic", json!("kittens"))]))
        .await;

    assert_execution_completed(&execution);
    assert_eq!(
        execution.results.get("content"),
        Some(&json!("Kittens are small cats."))
    );
}

/// Pipeline variables act as defaults; inputs flow through mappings
#[tokio::test]
async fn test_variables_and_input_mapping() {
    let harness = harness(vec![]);

    let mut pipeline = Pipeline::new("vars", "alice").with_step(
        Step::new("render", StepType::Transform, 10)
            .with_config("transform_type", json!("format_text"))
            .with_config("template", json!("{{greeting}}, {{who}}!"))
            .with_config("data", json!({}))
            .with_input("who", "input.name"),
    );
    pipeline
        .variables
        .insert("greeting".to_string(), json!("Hello"));

    let execution = harness
        .run(&pipeline, input(&[("name", json!("Ada"))]))
        .await;

    assert_execution_completed(&execution);
    assert_eq!(execution.results.get("result"), Some(&json!("Hello, Ada!")));
}

/// Unresolved placeholders are left verbatim, never an error
#[tokio::test]
async fn test_unresolved_placeholder_left_verbatim() {
    let harness = harness(vec![]);
    let pipeline = Pipeline::new("verbatim", "alice").with_step(
        Step::new("render", StepType::Transform, 10)
            .with_config("transform_type", json!("format_text"))
            .with_config("template", json!("known={{env}} unknown={{nope}}"))
            .with_config("data", json!({"env": "prod"})),
    );

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_completed(&execution);
    assert_eq!(
        execution.results.get("result"),
        Some(&json!("known=prod unknown={{nope}}"))
    );
}

/// Dotted paths traverse maps by key and lists by index
#[tokio::test]
async fn test_dotted_path_traversal_through_mapping() {
    let harness = harness(vec![]);
    let pipeline = Pipeline::new("paths", "alice")
        .with_step(
            Step::new("seed", StepType::Transform, 10)
                .with_config("transform_type", json!("text_to_json"))
                .with_config(
                    "data",
                    json!(r#"{"users": [{"name": "ada"}, {"name": "grace"}]}"#),
                ),
        )
        .with_step(
            Step::new("pick", StepType::Transform, 20)
                .with_config("transform_type", json!("format_text"))
                .with_config("template", json!("second={{who}}"))
                .with_config("data", json!({}))
                .with_input("who", "result.users.1.name"),
        );

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_completed(&execution);
    assert_eq!(
        execution.results.get("result"),
        Some(&json!("second=grace"))
    );
}

/// Missing mapping paths yield absent keys, not errors
#[tokio::test]
async fn test_missing_mapping_path_is_absent() {
    let harness = harness(vec![]);
    let pipeline = Pipeline::new("absent", "alice").with_step(
        Step::new("check", StepType::Condition, 10)
            .with_config("exists", json!("ghost"))
            .with_input("ghost", "no.such.path"),
    );

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_completed(&execution);
    assert_eq!(execution.results.get("result"), Some(&json!(false)));
    assert_eq!(execution.results.get("branch"), Some(&json!("false")));
}

/// A comparison condition gating on a context field
#[tokio::test]
async fn test_condition_comparison_over_context() {
    let harness = harness(vec![]);

    let mut pipeline = Pipeline::new("compare", "alice").with_step(
        Step::new("gate", StepType::Condition, 10).with_config(
            "comparison",
            json!({"field": "count", "operator": "gt", "value": 10}),
        ),
    );
    pipeline.variables.insert("count".to_string(), json!(15));

    let execution = harness.run(&pipeline, Map::new()).await;
    assert_execution_completed(&execution);
    assert_eq!(execution.results.get("result"), Some(&json!(true)));
    assert_eq!(execution.results.get("branch"), Some(&json!("true")));
}
