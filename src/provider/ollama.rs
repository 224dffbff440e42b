//! Ollama adapter - local models over the HTTP API, no auth

use crate::provider::{
    models, response_lines, Credentials, DeltaStream, EmbedRequest, GenerateRequest,
    GenerateResponse, ModelDescriptor, Provider, ProviderError, ProviderHealth, ProviderKind,
    ProviderResult, Role, StreamDelta, Throttle, Usage,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama provider for locally served models
#[derive(Debug)]
pub struct OllamaProvider {
    credentials: Credentials,
    client: reqwest::Client,
    throttle: Throttle,
}

impl OllamaProvider {
    /// Create a provider; only the endpoint field of the credentials is used
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

        let mut options = json!({});
        if let Some(temperature) = request.temperature {
            options["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            options["top_p"] = json!(top_p);
        }
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = json!(max_tokens);
        }
        if !request.stop_sequences.is_empty() {
            options["stop"] = json!(request.stop_sequences);
        }

        json!({
            "model": request.model,
            "messages": messages,
            "stream": stream,
            "options": options,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> ProviderResult<reqwest::Response> {
        self.throttle.pace().await;

        let response = self
            .client
            .post(format!("{}{}", self.base_url(), path))
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::transport("ollama", e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        // Ollama reports a missing local model as a 404
        if status.as_u16() == 404 || text.contains("not found") {
            return Err(ProviderError::ModelNotFound {
                provider: "ollama".to_string(),
                model: body["model"].as_str().unwrap_or_default().to_string(),
            });
        }
        Err(ProviderError::Api {
            provider: "ollama".to_string(),
            message: format!("status {}: {}", status, text),
            retryable: status.as_u16() >= 500,
        })
    }
}

fn parse_usage(parsed: &Value) -> Usage {
    Usage {
        input_tokens: parsed["prompt_eval_count"].as_u64().unwrap_or(0),
        output_tokens: parsed["eval_count"].as_u64().unwrap_or(0),
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    async fn list_models(&self) -> ProviderResult<Vec<ModelDescriptor>> {
        Ok(models::models_for(ProviderKind::Ollama))
    }

    async fn generate(&self, request: GenerateRequest) -> ProviderResult<GenerateResponse> {
        let started = std::time::Instant::now();
        let body = Self::build_chat_body(&request, false);
        debug!(model = %request.model, "Sending Ollama request");

        let response = self.post("/api/chat", &body).await?;
        let parsed: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::transport("ollama", e))?;

        let usage = parse_usage(&parsed);
        Ok(GenerateResponse {
            content: parsed["message"]["content"].as_str().unwrap_or("").to_string(),
            usage,
            finish_reason: parsed["done_reason"].as_str().map(str::to_string),
            // Local models are free
            cost: 0.0,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn stream(&self, request: GenerateRequest) -> ProviderResult<DeltaStream> {
        let body = Self::build_chat_body(&request, true);
        let response = self.post("/api/chat", &body).await?;

        // Ollama streams newline-delimited JSON, one object per line
        let deltas = response_lines(response, "ollama")
            .filter_map(|line| async move {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => return Some(Err(err)),
                };
                let event: Value = serde_json::from_str(&line).ok()?;
                Some(Ok(StreamDelta {
                    content: event["message"]["content"].as_str().unwrap_or("").to_string(),
                    done: event["done"].as_bool().unwrap_or(false),
                }))
            })
            .boxed();
        Ok(deltas)
    }

    async fn embed(&self, request: EmbedRequest) -> ProviderResult<Vec<Vec<f32>>> {
        // The embeddings endpoint takes one prompt per call
        let mut embeddings = Vec::with_capacity(request.inputs.len());
        for input in &request.inputs {
            let body = json!({"model": request.model, "prompt": input});
            let response = self.post("/api/embeddings", &body).await?;
            let parsed: Value = response
                .json()
                .await
                .map_err(|e| ProviderError::transport("ollama", e))?;
            let embedding = parsed["embedding"]
                .as_array()
                .map(|xs| {
                    xs.iter()
                        .filter_map(Value::as_f64)
                        .map(|x| x as f32)
                        .collect()
                })
                .unwrap_or_default();
            embeddings.push(embedding);
        }
        Ok(embeddings)
    }

    async fn health_check(&self) -> ProviderHealth {
        let started = std::time::Instant::now();
        let probe = self
            .client
            .get(format!("{}/api/tags", self.base_url()))
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
