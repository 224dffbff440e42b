//! OpenAI adapter - chat completions, legacy completions, embeddings

use crate::cost::pricing;
use crate::provider::{
    models, response_lines, Credentials, DeltaStream, EmbedRequest, GenerateRequest,
    GenerateResponse, ModelDescriptor, Provider, ProviderError, ProviderHealth, ProviderKind,
    ProviderResult, Role, StreamDelta, Throttle, Usage,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, error};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI provider
#[derive(Debug)]
pub struct OpenAiProvider {
    credentials: Credentials,
    client: reqwest::Client,
    throttle: Throttle,
}

impl OpenAiProvider {
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

    /// Legacy completion shape for instruct/base models, chat otherwise
    fn uses_completion_endpoint(request: &GenerateRequest) -> bool {
        request.messages.is_empty() && models::prefers_completion_shape(&request.model)
    }

    fn build_chat_body(request: &GenerateRequest, stream: bool) -> Value {
        let mut messages: Vec<Value> = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        for message in request.as_messages() {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(json!({"role": role, "content": message.content}));
        }

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": stream,
        });
        apply_sampling(&mut body, request);
        body
    }

    fn build_completion_body(request: &GenerateRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "prompt": request.prompt.clone().unwrap_or_default(),
            "stream": stream,
        });
        apply_sampling(&mut body, request);
        body
    }

    async fn post(&self, path: &str, body: &Value) -> ProviderResult<reqwest::Response> {
        self.throttle.pace().await;

        let mut builder = self
            .client
            .post(format!("{}{}", self.base_url(), path))
            .bearer_auth(&self.credentials.api_key)
            .json(body);
        if let Some(org) = &self.credentials.organization {
            builder = builder.header("OpenAI-Organization", org);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::transport("openai", e))?;

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
        error!(status = status.as_u16(), "OpenAI API error: {}", text);

        Err(classify_status(
            status.as_u16(),
            &text,
            body["model"].as_str().unwrap_or_default(),
            retry_after,
        ))
    }
}

fn apply_sampling(body: &mut Value, request: &GenerateRequest) {
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(top_p) = request.top_p {
        body["top_p"] = json!(top_p);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if !request.stop_sequences.is_empty() {
        body["stop"] = json!(request.stop_sequences);
    }
}

fn classify_status(
    status: u16,
    body: &str,
    model: &str,
    retry_after: Option<std::time::Duration>,
) -> ProviderError {
    // OpenAI reports unknown models as 404s with a model_not_found code
    if status == 404 || body.contains("model_not_found") {
        return ProviderError::ModelNotFound {
            provider: "openai".to_string(),
            model: model.to_string(),
        };
    }
    match status {
        401 | 403 => ProviderError::Authentication {
            provider: "openai".to_string(),
            message: body.to_string(),
        },
        429 => ProviderError::RateLimit {
            provider: "openai".to_string(),
            retry_after,
        },
        _ => ProviderError::Api {
            provider: "openai".to_string(),
            message: format!("status {}: {}", status, body),
            retryable: status >= 500,
        },
    }
}

fn parse_usage(parsed: &Value) -> Usage {
    Usage {
        input_tokens: parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn list_models(&self) -> ProviderResult<Vec<ModelDescriptor>> {
        Ok(models::models_for(ProviderKind::OpenAi))
    }

    async fn generate(&self, request: GenerateRequest) -> ProviderResult<GenerateResponse> {
        let started = std::time::Instant::now();
        let completion_shape = Self::uses_completion_endpoint(&request);
        debug!(model = %request.model, completion_shape, "Sending OpenAI request");

        let (path, body) = if completion_shape {
            ("/completions", Self::build_completion_body(&request, false))
        } else {
            ("/chat/completions", Self::build_chat_body(&request, false))
        };

        let response = self.post(path, &body).await?;
        let parsed: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::transport("openai", e))?;

        let choice = &parsed["choices"][0];
        let content = if completion_shape {
            choice["text"].as_str().unwrap_or("").to_string()
        } else {
            choice["message"]["content"].as_str().unwrap_or("").to_string()
        };
        let usage = parse_usage(&parsed);

        Ok(GenerateResponse {
            content,
            usage,
            finish_reason: choice["finish_reason"].as_str().map(str::to_string),
            cost: pricing::calculate_cost(
                ProviderKind::OpenAi,
                &request.model,
                usage.input_tokens,
                usage.output_tokens,
            ),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn stream(&self, request: GenerateRequest) -> ProviderResult<DeltaStream> {
        let completion_shape = Self::uses_completion_endpoint(&request);
        let (path, body) = if completion_shape {
            ("/completions", Self::build_completion_body(&request, true))
        } else {
            ("/chat/completions", Self::build_chat_body(&request, true))
        };

        let response = self.post(path, &body).await?;
        let deltas = response_lines(response, "openai")
            .filter_map(move |line| async move {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => return Some(Err(err)),
                };
                let data = line.strip_prefix("data:")?.trim();
                if data == "[DONE]" {
                    return Some(Ok(StreamDelta {
                        content: String::new(),
                        done: true,
                    }));
                }
                let event: Value = serde_json::from_str(data).ok()?;
                let choice = &event["choices"][0];
                let content = if completion_shape {
                    choice["text"].as_str().unwrap_or("")
                } else {
                    choice["delta"]["content"].as_str().unwrap_or("")
                };
                Some(Ok(StreamDelta {
                    content: content.to_string(),
                    done: false,
                }))
            })
            .boxed();
        Ok(deltas)
    }

    async fn embed(&self, request: EmbedRequest) -> ProviderResult<Vec<Vec<f32>>> {
        let body = json!({
            "model": request.model,
            "input": request.inputs,
        });
        let response = self.post("/embeddings", &body).await?;
        let parsed: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::transport("openai", e))?;

        let embeddings = parsed["data"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        row["embedding"]
                            .as_array()
                            .map(|xs| {
                                xs.iter()
                                    .filter_map(Value::as_f64)
                                    .map(|x| x as f32)
                                    .collect()
                            })
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(embeddings)
    }

    async fn health_check(&self) -> ProviderHealth {
        self.throttle.pace().await;
        let started = std::time::Instant::now();
        let probe = self
            .client
            .get(format!("{}/models", self.base_url()))
            .bearer_auth(&self.credentials.api_key)
            .send()
            .await;
        let available = matches!(&probe, Ok(r) if r.status().is_success());
        ProviderHealth {
            available,
            latency_ms: started.elapsed().as_millis() as u64,
            error_rate: if available { 0.0 } else { 1.0 },
        }
    }
}
