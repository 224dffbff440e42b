//! Http step - outbound requests with interpolation and auth injection

use crate::core::{ExecutionContext, Step, StepMetrics, StepType};
use crate::steps::{interpolate_inputs, StepHandler, StepResult};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::debug;

/// Executes http steps through a shared client
pub struct HttpHandler {
    client: reqwest::Client,
}

impl HttpHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn method_from(inputs: &Map<String, Value>) -> Result<Method, String> {
        let name = inputs
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET");
        match name.to_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "DELETE" => Ok(Method::DELETE),
            "PATCH" => Ok(Method::PATCH),
            other => Err(format!("unsupported method: {}", other)),
        }
    }

    /// Inject configured auth into the header map
    ///
    /// `auth: {type: bearer|basic|api_key, ...}` in the step config.
    fn apply_auth(
        builder: reqwest::RequestBuilder,
        auth: &Value,
    ) -> Result<reqwest::RequestBuilder, String> {
        let kind = auth
            .get("type")
            .and_then(Value::as_str)
            .ok_or("auth.type is required")?;
        match kind {
            "bearer" => {
                let token = auth
                    .get("token")
                    .and_then(Value::as_str)
                    .ok_or("auth.token is required for bearer auth")?;
                Ok(builder.bearer_auth(token))
            }
            "basic" => {
                let username = auth
                    .get("username")
                    .and_then(Value::as_str)
                    .ok_or("auth.username is required for basic auth")?;
                let password = auth.get("password").and_then(Value::as_str);
                Ok(builder.basic_auth(username, password))
            }
            "api_key" => {
                let header = auth
                    .get("header")
                    .and_then(Value::as_str)
                    .unwrap_or("X-API-Key");
                let key = auth
                    .get("key")
                    .and_then(Value::as_str)
                    .ok_or("auth.key is required for api_key auth")?;
                Ok(builder.header(header, key))
            }
            other => Err(format!("unsupported auth type: {}", other)),
        }
    }
}

impl Default for HttpHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepHandler for HttpHandler {
    fn step_type(&self) -> StepType {
        StepType::Http
    }

    fn validate(&self, step: &Step) -> Vec<String> {
        let mut errors = Vec::new();
        if step.config_str("url").is_none() {
            errors.push("url is required".to_string());
        }
        if let Some(method) = step.config_str("method") {
            if !matches!(
                method.to_uppercase().as_str(),
                "GET" | "POST" | "PUT" | "DELETE" | "PATCH"
            ) {
                errors.push(format!("unsupported method: {}", method));
            }
        }
        errors
    }

    fn side_effecting(&self, _step: &Step, _inputs: &Map<String, Value>) -> bool {
        // Even a GET reaches the outside world; dry-run skips all of them
        true
    }

    async fn execute(
        &self,
        _step: &Step,
        inputs: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> StepResult {
        let Some(url_template) = inputs.get("url").and_then(Value::as_str) else {
            return StepResult::fail_terminal("url is required");
        };
        let method = match Self::method_from(inputs) {
            Ok(method) => method,
            Err(err) => return StepResult::fail_terminal(err),
        };

        let url = interpolate_inputs(url_template, inputs, context);
        debug!(%method, %url, "Http step");

        let mut builder = self.client.request(method, &url);

        if let Some(headers) = inputs.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                let rendered =
                    interpolate_inputs(&crate::core::context::stringify(value), inputs, context);
                builder = builder.header(name, rendered);
            }
        }

        if let Some(auth) = inputs.get("auth") {
            builder = match Self::apply_auth(builder, auth) {
                Ok(builder) => builder,
                Err(err) => return StepResult::fail_terminal(err),
            };
        }

        if let Some(body) = inputs.get("body") {
            match body {
                Value::String(text) => {
                    builder = builder.body(interpolate_inputs(text, inputs, context));
                }
                structured => {
                    let rendered = interpolate_inputs(
                        &serde_json::to_string(structured).unwrap_or_default(),
                        inputs,
                        context,
                    );
                    builder = builder
                        .header("content-type", "application/json")
                        .body(rendered);
                }
            }
        }

        let started = std::time::Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => return StepResult::fail(format!("request failed: {}", err)),
        };

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut outputs = Map::new();
        outputs.insert("status_code".to_string(), json!(status));
        match serde_json::from_str::<Value>(&text) {
            Ok(parsed) => {
                outputs.insert("body".to_string(), parsed);
            }
            Err(_) => {
                outputs.insert("body".to_string(), json!(text));
            }
        }
        outputs.insert(
            "metrics".to_string(),
            json!({
                "status_code": status,
                "response_time_ms": elapsed_ms,
                "content_length": text.len(),
            }),
        );

        let metrics = StepMetrics {
            duration_ms: elapsed_ms,
            ..Default::default()
        };

        // Any status below 400 counts as success
        if status < 400 {
            StepResult::ok(outputs).with_metrics(metrics)
        } else {
            // Failure still carries the response body for diagnostics
            let mut result =
                StepResult::fail(format!("request returned status {}", status)).with_metrics(metrics);
            result.outputs = outputs;
            result.retryable = status == 429 || status >= 500;
            result
        }
    }
}
