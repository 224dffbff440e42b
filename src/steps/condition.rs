//! Condition step - expression, comparison, exists, and regex modes

use crate::core::{ExecutionContext, Step, StepType};
use crate::steps::{expr, interpolate_inputs, StepHandler, StepResult};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};

/// Executes condition steps
pub struct ConditionHandler;

impl ConditionHandler {
    pub fn new() -> Self {
        Self
    }

    fn branch_result(outcome: bool) -> StepResult {
        let mut outputs = Map::new();
        outputs.insert("result".to_string(), json!(outcome));
        outputs.insert(
            "branch".to_string(),
            json!(if outcome { "true" } else { "false" }),
        );
        StepResult::ok(outputs)
    }

    /// Comparison operators with numeric-aware coercion
    ///
    /// Shared with the transform handler's filter predicate.
    pub(crate) fn compare(operator: &str, left: &Value, right: &Value) -> Result<bool, String> {
        let as_numbers = (coerce_number(left), coerce_number(right));

        match operator {
            "eq" => Ok(match as_numbers {
                (Some(a), Some(b)) => a == b,
                _ => left == right,
            }),
            "ne" => Self::compare("eq", left, right).map(|r| !r),
            "lt" | "lte" | "gt" | "gte" => match as_numbers {
                (Some(a), Some(b)) => Ok(match operator {
                    "lt" => a < b,
                    "lte" => a <= b,
                    "gt" => a > b,
                    _ => a >= b,
                }),
                _ => Err(format!(
                    "operator {} requires numeric operands, got {} and {}",
                    operator, left, right
                )),
            },
            "contains" => match (left, right) {
                (Value::String(haystack), Value::String(needle)) => {
                    Ok(haystack.contains(needle.as_str()))
                }
                (Value::Array(items), needle) => Ok(items.contains(needle)),
                _ => Err(format!(
                    "operator contains requires a string or list, got {}",
                    left
                )),
            },
            "starts_with" => match (left, right) {
                (Value::String(s), Value::String(prefix)) => Ok(s.starts_with(prefix.as_str())),
                _ => Err("operator starts_with requires strings".to_string()),
            },
            "ends_with" => match (left, right) {
                (Value::String(s), Value::String(suffix)) => Ok(s.ends_with(suffix.as_str())),
                _ => Err("operator ends_with requires strings".to_string()),
            },
            other => Err(format!("unknown operator: {}", other)),
        }
    }
}

/// Numbers stay numbers; numeric-looking strings coerce
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Default for ConditionHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepHandler for ConditionHandler {
    fn step_type(&self) -> StepType {
        StepType::Condition
    }

    fn validate(&self, step: &Step) -> Vec<String> {
        let has_spec = step.config.contains_key("expression")
            || step.config.contains_key("comparison")
            || step.config.contains_key("exists")
            || step.config.contains_key("regex");
        if has_spec {
            Vec::new()
        } else {
            vec!["one of expression, comparison, exists, or regex is required".to_string()]
        }
    }

    async fn execute(
        &self,
        _step: &Step,
        inputs: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> StepResult {
        // Boolean expression under the restricted evaluator
        if let Some(source) = inputs.get("expression").and_then(Value::as_str) {
            let resolve = |name: &str| {
                inputs
                    .get(name)
                    .cloned()
                    .or_else(|| context.resolve(name).cloned())
            };
            return match expr::evaluate(source, resolve) {
                Ok(Value::Bool(outcome)) => Self::branch_result(outcome),
                Ok(other) => StepResult::fail_terminal(format!(
                    "expression must evaluate to a bool, got {}",
                    other
                )),
                Err(err) => StepResult::fail_terminal(format!("expression error: {}", err)),
            };
        }

        // Field comparison
        if let Some(comparison) = inputs.get("comparison") {
            let Some(field) = comparison.get("field").and_then(Value::as_str) else {
                return StepResult::fail_terminal("comparison.field is required");
            };
            let Some(operator) = comparison.get("operator").and_then(Value::as_str) else {
                return StepResult::fail_terminal("comparison.operator is required");
            };
            let expected = comparison.get("value").cloned().unwrap_or(Value::Null);
            let actual = inputs
                .get(field)
                .cloned()
                .or_else(|| context.resolve(field).cloned())
                .unwrap_or(Value::Null);

            return match Self::compare(operator, &actual, &expected) {
                Ok(outcome) => Self::branch_result(outcome),
                Err(err) => StepResult::fail_terminal(err),
            };
        }

        // Key presence + non-null
        if let Some(exists) = inputs.get("exists") {
            let Some(field) = exists.as_str() else {
                return StepResult::fail_terminal("exists must name a field");
            };
            let present = inputs
                .get(field)
                .or_else(|| context.resolve(field))
                .is_some_and(|v| !v.is_null());
            return Self::branch_result(present);
        }

        // Regex search against an interpolated target
        if let Some(regex_spec) = inputs.get("regex") {
            let Some(pattern) = regex_spec.get("pattern").and_then(Value::as_str) else {
                return StepResult::fail_terminal("regex.pattern is required");
            };
            let target_template = regex_spec
                .get("target")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let target = interpolate_inputs(target_template, inputs, context);

            return match Regex::new(pattern) {
                Ok(regex) => Self::branch_result(regex.is_match(&target)),
                Err(err) => StepResult::fail_terminal(format!("bad regex: {}", err)),
            };
        }

        StepResult::fail_terminal("one of expression, comparison, exists, or regex is required")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), "alice", Map::new());
        ctx.output.insert("count".to_string(), json!(15));
        ctx.output
            .insert("status".to_string(), json!("shipped-today"));
        ctx.output.insert("empty".to_string(), Value::Null);
        ctx
    }

    fn inputs(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    async fn run(inputs_map: Map<String, Value>) -> StepResult {
        let handler = ConditionHandler::new();
        let step = Step::new("cond", StepType::Condition, 10);
        handler.execute(&step, &inputs_map, &context()).await
    }

    #[tokio::test]
    async fn test_comparison_gt_true_branch() {
        let result = run(inputs(&[(
            "comparison",
            json!({"field": "count", "operator": "gt", "value": 10}),
        )]))
        .await;

        assert!(result.success);
        assert_eq!(result.outputs.get("result"), Some(&json!(true)));
        assert_eq!(result.outputs.get("branch"), Some(&json!("true")));
    }

    #[tokio::test]
    async fn test_comparison_numeric_coercion_from_string() {
        // "15" (string) compared against 20 (number)
        let result = run(inputs(&[
        ("count_text", json!("15")),
        (
            "comparison",
            json!({"field": "count_text", "operator": "lt", "value": 20}),
        ),
        ]))
        .await;

        assert!(result.success);
        assert_eq!(result.outputs.get("branch"), Some(&json!("true")));
    }

    #[tokio::test]
    async fn test_comparison_string_operators() {
        let result = run(inputs(&[(
            "comparison",
            json!({"field": "status", "operator": "starts_with", "value": "shipped"}),
        )]))
        .await;
        assert_eq!(result.outputs.get("result"), Some(&json!(true)));

        let result = run(inputs(&[(
            "comparison",
            json!({"field": "status", "operator": "contains", "value": "today"}),
        )]))
        .await;
        assert_eq!(result.outputs.get("result"), Some(&json!(true)));

        let result = run(inputs(&[(
            "comparison",
            json!({"field": "status", "operator": "ends_with", "value": "yesterday"}),
        )]))
        .await;
        assert_eq!(result.outputs.get("result"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_expression_mode() {
        let result = run(inputs(&[(
            "expression",
            json!("count > 10 && count < 20"),
        )]))
        .await;
        assert!(result.success);
        assert_eq!(result.outputs.get("branch"), Some(&json!("true")));
    }

    #[tokio::test]
    async fn test_expression_non_bool_rejected() {
        let result = run(inputs(&[("expression", json!("count + 1"))])).await;
        assert!(!result.success);
        assert!(!result.retryable);
    }

    #[tokio::test]
    async fn test_exists_mode() {
        let result = run(inputs(&[("exists", json!("count"))])).await;
        assert_eq!(result.outputs.get("result"), Some(&json!(true)));

        // Null values do not count as present
        let result = run(inputs(&[("exists", json!("empty"))])).await;
        assert_eq!(result.outputs.get("result"), Some(&json!(false)));

        let result = run(inputs(&[("exists", json!("nope"))])).await;
        assert_eq!(result.outputs.get("result"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_regex_mode_with_interpolated_target() {
        let result = run(inputs(&[(
            "regex",
            json!({"pattern": r"shipped-\w+", "target": "{{status}}"}),
        )]))
        .await;
        assert!(result.success);
        assert_eq!(result.outputs.get("result"), Some(&json!(true)));

        let result = run(inputs(&[(
            "regex",
            json!({"pattern": "(unclosed", "target": "{{status}}"}),
        )]))
        .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_missing_spec_fails() {
        let result = run(Map::new()).await;
        assert!(!result.success);
        assert!(!result.retryable);
    }

    #[test]
    fn test_validate() {
        let handler = ConditionHandler::new();
        let step = Step::new("c", StepType::Condition, 10);
        assert_eq!(handler.validate(&step).len(), 1);

        let step = Step::new("c", StepType::Condition, 10)
            .with_config("expression", json!("true"));
        assert!(handler.validate(&step).is_empty());
    }
}
