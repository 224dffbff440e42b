//! Anthropic messages-API adapter

use crate::cost::pricing;
use crate::provider::{
    models, response_lines, Credentials, DeltaStream, GenerateRequest, GenerateResponse,
    ModelDescriptor, Provider, ProviderError, ProviderHealth, ProviderKind, ProviderResult, Role,
    StreamDelta, Throttle, Usage,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, error};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic provider
#[derive(Debug)]
pub struct AnthropicProvider {
    credentials: Credentials,
    client: reqwest::Client,
    throttle: Throttle,
}

impl AnthropicProvider {
    /// Create a provider from credentials
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            client: reqwest::Client::new(),
            throttle: Throttle::default(),
        }
    }

    fn base_url(&self) -> &str {
        self.credentials
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
    }

    /// Build the messages-API request body
    ///
    /// A flat prompt becomes a single user message; system messages are
    /// hoisted into the top-level `system` parameter.
    fn build_body(&self, request: &GenerateRequest, stream: bool) -> Value {
        let mut system = request.system.clone();
        let mut messages = Vec::new();
        for message in request.as_messages() {
            match message.role {
                Role::System => {
                    system.get_or_insert_with(String::new).push_str(&message.content);
                }
                Role::User => messages.push(json!({"role": "user", "content": message.content})),
                Role::Assistant => {
                    messages.push(json!({"role": "assistant", "content": message.content}))
                }
            }
        }

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
            "stream": stream,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        if !request.stop_sequences.is_empty() {
            body["stop_sequences"] = json!(request.stop_sequences);
        }
        body
    }

    async fn post_messages(&self, body: &Value) -> ProviderResult<reqwest::Response> {
        self.throttle.pace().await;

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url()))
            .header("x-api-key", &self.credentials.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::transport("anthropic", e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(std::time::Duration::from_secs);
        let text = response.text().await.unwrap_or_default();
        error!(status = status.as_u16(), "Anthropic API error: {}", text);

        Err(classify_status(
            status.as_u16(),
            &text,
            body["model"].as_str().unwrap_or_default(),
            retry_after,
        ))
    }
}

fn classify_status(
    status: u16,
    body: &str,
    model: &str,
    retry_after: Option<std::time::Duration>,
) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Authentication {
            provider: "anthropic".to_string(),
            message: body.to_string(),
        },
        429 => ProviderError::RateLimit {
            provider: "anthropic".to_string(),
            retry_after,
        },
        404 => ProviderError::ModelNotFound {
            provider: "anthropic".to_string(),
            model: model.to_string(),
        },
        _ => ProviderError::Api {
            provider: "anthropic".to_string(),
            message: format!("status {}: {}", status, body),
            retryable: status >= 500,
        },
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn list_models(&self) -> ProviderResult<Vec<ModelDescriptor>> {
        Ok(models::models_for(ProviderKind::Anthropic))
    }

    async fn generate(&self, request: GenerateRequest) -> ProviderResult<GenerateResponse> {
        let started = std::time::Instant::now();
        let body = self.build_body(&request, false);
        debug!(model = %request.model, "Sending Anthropic request");

        let response = self.post_messages(&body).await?;
        let parsed: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::transport("anthropic", e))?;

        let content = parsed["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let usage = Usage {
            input_tokens: parsed["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: parsed["usage"]["output_tokens"].as_u64().unwrap_or(0),
        };

        Ok(GenerateResponse {
            content,
            usage,
            finish_reason: parsed["stop_reason"].as_str().map(str::to_string),
            cost: pricing::calculate_cost(
                ProviderKind::Anthropic,
                &request.model,
                usage.input_tokens,
                usage.output_tokens,
            ),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn stream(&self, request: GenerateRequest) -> ProviderResult<DeltaStream> {
        let body = self.build_body(&request, true);
        let response = self.post_messages(&body).await?;

        let deltas = response_lines(response, "anthropic")
            .filter_map(|line| async move {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => return Some(Err(err)),
                };
                let data = line.strip_prefix("data:")?.trim();
                let event: Value = serde_json::from_str(data).ok()?;
                match event["type"].as_str() {
                    Some("content_block_delta") => Some(Ok(StreamDelta {
                        content: event["delta"]["text"].as_str().unwrap_or("").to_string(),
                        done: false,
                    })),
                    Some("message_stop") => Some(Ok(StreamDelta {
                        content: String::new(),
                        done: true,
                    })),
                    _ => None,
                }
            })
            .boxed();
        Ok(deltas)
    }

    async fn health_check(&self) -> ProviderHealth {
        let started = std::time::Instant::now();
        // Minimal request: invalid bodies still prove reachability and auth
        let probe = self
            .post_messages(&json!({
                "model": "claude-3-5-haiku-latest",
                "max_tokens": 1,
                "messages": [{"role": "user", "content": "ping"}],
                "stream": false,
            }))
            .await;
        ProviderHealth {
            available: probe.is_ok(),
            latency_ms: started.elapsed().as_millis() as u64,
            error_rate: if probe.is_ok() { 0.0 } else { 1.0 },
        }
    }
}
