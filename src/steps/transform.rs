//! Transform step - pure data transforms over the context

use crate::core::{resolve_path, ExecutionContext, Step, StepType};
use crate::steps::{expr, StepHandler, StepResult};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

const TRANSFORM_TYPES: &[&str] = &[
    "json_to_text",
    "text_to_json",
    "json_to_csv",
    "csv_to_json",
    "extract_fields",
    "filter_data",
    "map_values",
    "aggregate",
    "format_text",
    "custom_script",
];

/// Executes transform steps
pub struct TransformHandler;

impl TransformHandler {
    pub fn new() -> Self {
        Self
    }

    fn apply(
        transform_type: &str,
        data: &Value,
        inputs: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> Result<Value, String> {
        match transform_type {
            "json_to_text" => json_to_text(data, inputs),
            "text_to_json" => text_to_json(data),
            "json_to_csv" => json_to_csv(data),
            "csv_to_json" => csv_to_json(data),
            "extract_fields" => extract_fields(data, inputs),
            "filter_data" => filter_data(data, inputs),
            "map_values" => map_values(data, inputs),
            "aggregate" => aggregate(data, inputs),
            "format_text" => format_text(data, inputs, context),
            "custom_script" => custom_script(data, inputs, context),
            other => Err(format!("unknown transform_type: {}", other)),
        }
    }
}

fn json_to_text(data: &Value, inputs: &Map<String, Value>) -> Result<Value, String> {
    let pretty = inputs
        .get("pretty")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let text = if pretty {
        serde_json::to_string_pretty(data)
    } else {
        serde_json::to_string(data)
    };
    text.map(Value::String).map_err(|e| e.to_string())
}

fn text_to_json(data: &Value) -> Result<Value, String> {
    let Some(text) = data.as_str() else {
        return Err("text_to_json requires string data".to_string());
    };
    serde_json::from_str(text).map_err(|e| format!("invalid JSON: {}", e))
}

/// List of flat objects -> CSV with a header row
///
/// Columns come from the first row's key order; quotes, commas, and
/// newlines are escaped per RFC 4180.
fn json_to_csv(data: &Value) -> Result<Value, String> {
    let Some(rows) = data.as_array() else {
        return Err("json_to_csv requires a list of objects".to_string());
    };
    if rows.is_empty() {
        return Ok(Value::String(String::new()));
    }

    let Some(first) = rows[0].as_object() else {
        return Err("json_to_csv requires a list of objects".to_string());
    };
    let columns: Vec<&String> = first.keys().collect();

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(
        columns
            .iter()
            .map(|c| csv_escape(c))
            .collect::<Vec<_>>()
            .join(","),
    );
    for row in rows {
        let Some(row) = row.as_object() else {
            return Err("json_to_csv requires every row to be an object".to_string());
        };
        let line = columns
            .iter()
            .map(|column| {
                row.get(*column)
                    .map(|v| csv_escape(&crate::core::context::stringify(v)))
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join(",");
        lines.push(line);
    }

    Ok(Value::String(lines.join("\n")))
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn csv_to_json(data: &Value) -> Result<Value, String> {
    let Some(text) = data.as_str() else {
        return Err("csv_to_json requires string data".to_string());
    };

    let mut lines = text.lines();
    let Some(header) = lines.next() else {
        return Ok(json!([]));
    };
    let columns = split_csv_line(header);

    let mut rows = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_csv_line(line);
        let mut row = Map::new();
        for (column, field) in columns.iter().zip(fields) {
            // Numeric-looking fields become numbers
            let value = field
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::String(field));
            row.insert(column.clone(), value);
        }
        rows.push(Value::Object(row));
    }

    Ok(Value::Array(rows))
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}

fn extract_fields(data: &Value, inputs: &Map<String, Value>) -> Result<Value, String> {
    let Some(fields) = inputs.get("fields").and_then(Value::as_array) else {
        return Err("extract_fields requires a fields list".to_string());
    };

    let mut extracted = Map::new();
    for field in fields {
        let Some(path) = field.as_str() else {
            return Err("fields entries must be strings".to_string());
        };
        if let Some(value) = resolve_path(data, path) {
            // Store under the leaf segment
            let key = path.rsplit('.').next().unwrap_or(path);
            extracted.insert(key.to_string(), value.clone());
        }
    }
    Ok(Value::Object(extracted))
}

fn filter_data(data: &Value, inputs: &Map<String, Value>) -> Result<Value, String> {
    let Some(items) = data.as_array() else {
        return Err("filter_data requires a list".to_string());
    };
    let Some(predicate) = inputs.get("predicate").and_then(Value::as_object) else {
        return Err("filter_data requires a predicate".to_string());
    };
    let Some(field) = predicate.get("field").and_then(Value::as_str) else {
        return Err("predicate.field is required".to_string());
    };
    let Some(operator) = predicate.get("operator").and_then(Value::as_str) else {
        return Err("predicate.operator is required".to_string());
    };
    let expected = predicate.get("value").cloned().unwrap_or(Value::Null);

    let mut kept = Vec::new();
    for item in items {
        let actual = resolve_path(item, field).cloned().unwrap_or(Value::Null);
        if crate::steps::condition::ConditionHandler::compare(operator, &actual, &expected)? {
            kept.push(item.clone());
        }
    }
    Ok(Value::Array(kept))
}

/// Replace values through a lookup table; unmapped values pass through
fn map_values(data: &Value, inputs: &Map<String, Value>) -> Result<Value, String> {
    let Some(mapping) = inputs.get("mapping").and_then(Value::as_object) else {
        return Err("map_values requires a mapping".to_string());
    };

    let map_one = |value: &Value| -> Value {
        if let Value::String(s) = value {
            if let Some(mapped) = mapping.get(s) {
                return mapped.clone();
            }
        }
        value.clone()
    };

    match data {
        Value::Array(items) => Ok(Value::Array(items.iter().map(map_one).collect())),
        Value::Object(fields) => Ok(Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), map_one(v)))
                .collect(),
        )),
        scalar => Ok(map_one(scalar)),
    }
}

/// count/sum/avg/min/max over a named numeric field of a list
fn aggregate(data: &Value, inputs: &Map<String, Value>) -> Result<Value, String> {
    let Some(items) = data.as_array() else {
        return Err("aggregate requires a list".to_string());
    };
    let Some(field) = inputs.get("field").and_then(Value::as_str) else {
        return Err("aggregate requires a field".to_string());
    };

    let numbers: Vec<f64> = items
        .iter()
        .filter_map(|item| resolve_path(item, field).and_then(Value::as_f64))
        .collect();

    let sum: f64 = numbers.iter().sum();
    let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
    let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Ok(json!({
        "count": numbers.len(),
        "sum": sum,
        "avg": if numbers.is_empty() { 0.0 } else { sum / numbers.len() as f64 },
        "min": if numbers.is_empty() { Value::Null } else { json!(min) },
        "max": if numbers.is_empty() { Value::Null } else { json!(max) },
    }))
}

fn format_text(
    data: &Value,
    inputs: &Map<String, Value>,
    context: &ExecutionContext,
) -> Result<Value, String> {
    let Some(template) = inputs.get("template").and_then(Value::as_str) else {
        return Err("format_text requires a template".to_string());
    };

    // Data fields win, then resolved inputs, then the wider context
    let rendered = crate::core::context::interpolate_with(template, |path| {
        if path == "data" {
            return Some(crate::core::context::stringify(data));
        }
        resolve_path(data, path)
            .or_else(|| inputs.get(path))
            .or_else(|| context.resolve(path))
            .map(crate::core::context::stringify)
    });
    Ok(Value::String(rendered))
}

/// Scripted transform under the same restricted evaluator as conditions
fn custom_script(
    data: &Value,
    inputs: &Map<String, Value>,
    context: &ExecutionContext,
) -> Result<Value, String> {
    let Some(script) = inputs.get("script").and_then(Value::as_str) else {
        return Err("custom_script requires a script".to_string());
    };

    let resolve = |name: &str| {
        if name == "data" {
            return Some(data.clone());
        }
        if let Some(rest) = name.strip_prefix("data.") {
            return resolve_path(data, rest).cloned();
        }
        inputs
            .get(name)
            .cloned()
            .or_else(|| context.resolve(name).cloned())
    };
    expr::evaluate(script, resolve).map_err(|e| format!("script error: {}", e))
}

impl Default for TransformHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepHandler for TransformHandler {
    fn step_type(&self) -> StepType {
        StepType::Transform
    }

    fn validate(&self, step: &Step) -> Vec<String> {
        match step.config_str("transform_type") {
            None => vec!["transform_type is required".to_string()],
            Some(t) if !TRANSFORM_TYPES.contains(&t) => {
                vec![format!("unknown transform_type: {}", t)]
            }
            Some(_) => Vec::new(),
        }
    }

    async fn execute(
        &self,
        _step: &Step,
        inputs: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> StepResult {
        let Some(transform_type) = inputs.get("transform_type").and_then(Value::as_str) else {
            return StepResult::fail_terminal("transform_type is required");
        };
        let data = inputs.get("data").cloned().unwrap_or(Value::Null);

        match Self::apply(transform_type, &data, inputs, context) {
            Ok(result) => {
                let mut outputs = Map::new();
                outputs.insert("result".to_string(), result);
                StepResult::ok(outputs)
            }
            Err(err) => StepResult::fail_terminal(format!("{}: {}", transform_type, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), "alice", Map::new());
        ctx.output.insert("env".to_string(), json!("prod"));
        ctx
    }

    async fn run(inputs_map: Map<String, Value>) -> StepResult {
        let handler = TransformHandler::new();
        let step = Step::new("t", StepType::Transform, 10);
        handler.execute(&step, &inputs_map, &context()).await
    }

    fn inputs(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_json_text_roundtrip() {
        let original = json!({"name": "weft", "tags": ["a", "b"], "depth": {"n": 1.5}});

        let result = run(inputs(&[
            ("transform_type", json!("json_to_text")),
            ("data", original.clone()),
            ("pretty", json!(true)),
        ]))
        .await;
        assert!(result.success);
        let text = result.outputs.get("result").unwrap().clone();

        let result = run(inputs(&[
            ("transform_type", json!("text_to_json")),
            ("data", text),
        ]))
        .await;
        assert!(result.success);
        assert_eq!(result.outputs.get("result"), Some(&original));
    }

    #[tokio::test]
    async fn test_csv_roundtrip() {
        let rows = json!([
            {"name": "a", "count": 1.0},
            {"name": "b, with comma", "count": 2.0},
        ]);

        let result = run(inputs(&[
            ("transform_type", json!("json_to_csv")),
            ("data", rows.clone()),
        ]))
        .await;
        assert!(result.success);
        let csv = result.outputs.get("result").unwrap().clone();
        assert!(csv.as_str().unwrap().starts_with("count,name"));

        let result = run(inputs(&[
            ("transform_type", json!("csv_to_json")),
            ("data", csv),
        ]))
        .await;
        assert!(result.success);
        assert_eq!(result.outputs.get("result"), Some(&rows));
    }

    #[tokio::test]
    async fn test_extract_fields() {
        let result = run(inputs(&[
            ("transform_type", json!("extract_fields")),
            ("data", json!({"user": {"name": "ada", "id": 7}, "extra": true})),
            ("fields", json!(["user.name", "user.id", "missing"])),
        ]))
        .await;

        assert!(result.success);
        assert_eq!(
            result.outputs.get("result"),
            Some(&json!({"name": "ada", "id": 7}))
        );
    }

    #[tokio::test]
    async fn test_filter_data() {
        let result = run(inputs(&[
            ("transform_type", json!("filter_data")),
            (
                "data",
                json!([{"n": 1}, {"n": 5}, {"n": 10}]),
            ),
            (
                "predicate",
                json!({"field": "n", "operator": "gte", "value": 5}),
            ),
        ]))
        .await;

        assert!(result.success);
        assert_eq!(
            result.outputs.get("result"),
            Some(&json!([{"n": 5}, {"n": 10}]))
        );
    }

    #[tokio::test]
    async fn test_map_values() {
        let result = run(inputs(&[
            ("transform_type", json!("map_values")),
            ("data", json!(["on", "off", "unknown"])),
            ("mapping", json!({"on": true, "off": false})),
        ]))
        .await;

        assert!(result.success);
        assert_eq!(
            result.outputs.get("result"),
            Some(&json!([true, false, "unknown"]))
        );
    }

    #[tokio::test]
    async fn test_aggregate() {
        let result = run(inputs(&[
            ("transform_type", json!("aggregate")),
            (
                "data",
                json!([{"score": 10}, {"score": 20}, {"score": 30}, {"other": 1}]),
            ),
            ("field", json!("score")),
        ]))
        .await;

        assert!(result.success);
        let aggregated = result.outputs.get("result").unwrap();
        assert_eq!(aggregated["count"], 3);
        assert_eq!(aggregated["sum"], 60.0);
        assert_eq!(aggregated["avg"], 20.0);
        assert_eq!(aggregated["min"], 10.0);
        assert_eq!(aggregated["max"], 30.0);
    }

    #[tokio::test]
    async fn test_aggregate_empty_list() {
        let result = run(inputs(&[
            ("transform_type", json!("aggregate")),
            ("data", json!([])),
            ("field", json!("score")),
        ]))
        .await;

        assert!(result.success);
        let aggregated = result.outputs.get("result").unwrap();
        assert_eq!(aggregated["count"], 0);
        assert_eq!(aggregated["min"], Value::Null);
    }

    #[tokio::test]
    async fn test_format_text() {
        let result = run(inputs(&[
            ("transform_type", json!("format_text")),
            ("data", json!({"name": "ada"})),
            ("template", json!("{{name}} in {{env}}")),
        ]))
        .await;

        assert!(result.success);
        assert_eq!(result.outputs.get("result"), Some(&json!("ada in prod")));
    }

    #[tokio::test]
    async fn test_custom_script() {
        let result = run(inputs(&[
            ("transform_type", json!("custom_script")),
            ("data", json!({"count": 4})),
            ("script", json!("data.count * 2 + 1")),
        ]))
        .await;

        assert!(result.success);
        assert_eq!(result.outputs.get("result"), Some(&json!(9.0)));
    }

    #[tokio::test]
    async fn test_unknown_transform_type() {
        let result = run(inputs(&[
            ("transform_type", json!("reticulate")),
            ("data", json!(1)),
        ]))
        .await;
        assert!(!result.success);
        assert!(!result.retryable);
    }

    #[test]
    fn test_validate() {
        let handler = TransformHandler::new();
        let step = Step::new("t", StepType::Transform, 10);
        assert_eq!(handler.validate(&step).len(), 1);

        let step = Step::new("t", StepType::Transform, 10)
            .with_config("transform_type", json!("aggregate"));
        assert!(handler.validate(&step).is_empty());
    }
}
