//! Provider abstraction - one contract over heterogeneous AI backends

pub mod anthropic;
pub mod models;
pub mod ollama;
pub mod openai;
pub mod registry;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use models::{Capability, ModelDescriptor};
pub use registry::ProviderRegistry;

/// The backends this crate ships adapters for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Ollama,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Decrypted per-user, per-provider credentials
///
/// Produced by the credential collaborator; treated as opaque here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// API key (may be empty for local backends)
    pub api_key: String,

    /// Organization or project identifier
    #[serde(default)]
    pub organization: Option<String>,

    /// Custom endpoint override
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Credentials {
    /// Credentials holding only an API key
    pub fn from_key(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            organization: None,
            endpoint: None,
        }
    }

    /// Stable fingerprint used as a provider-instance cache key
    pub fn fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.api_key.hash(&mut hasher);
        self.organization.hash(&mut hasher);
        self.endpoint.hash(&mut hasher);
        hasher.finish()
    }
}

/// Supplies decrypted credentials for a user and provider
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Look up credentials, or `None` when the user has none configured
    async fn credentials(&self, user_id: &str, kind: ProviderKind) -> Option<Credentials>;
}

/// Static credential map, used by the CLI and tests
pub struct StaticCredentials {
    entries: std::collections::HashMap<ProviderKind, Credentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self {
            entries: std::collections::HashMap::new(),
        }
    }

    /// Read credentials from conventional environment variables
    pub fn from_env() -> Self {
        let mut entries = std::collections::HashMap::new();
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            entries.insert(ProviderKind::Anthropic, Credentials::from_key(&key));
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            entries.insert(ProviderKind::OpenAi, Credentials::from_key(&key));
        }
        // Ollama is local and unauthenticated
        entries.insert(ProviderKind::Ollama, Credentials::default());
        Self { entries }
    }

    pub fn with(mut self, kind: ProviderKind, credentials: Credentials) -> Self {
        self.entries.insert(kind, credentials);
        self
    }
}

impl Default for StaticCredentials {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn credentials(&self, _user_id: &str, kind: ProviderKind) -> Option<Credentials> {
        self.entries.get(&kind).cloned()
    }
}

/// Error taxonomy for provider operations
///
/// Every variant names the provider it came from; `is_retryable` is
/// consulted by the orchestrator's retry wrapper.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider}: authentication failed: {message}")]
    Authentication { provider: String, message: String },

    #[error("{provider}: rate limited")]
    RateLimit {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("{provider}: model not found: {model}")]
    ModelNotFound { provider: String, model: String },

    #[error("{provider}: {message}")]
    Api {
        provider: String,
        message: String,
        retryable: bool,
    },
}

impl ProviderError {
    /// Whether the orchestrator should retry the failed call
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Authentication { .. } => false,
            ProviderError::RateLimit { .. } => true,
            ProviderError::ModelNotFound { .. } => false,
            ProviderError::Api { retryable, .. } => *retryable,
        }
    }

    /// Wrap a transport-level error as a retryable API error
    pub fn transport(provider: &str, err: reqwest::Error) -> Self {
        ProviderError::Api {
            provider: provider.to_string(),
            message: format!("request failed: {}", err),
            retryable: true,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Message role in a chat-shaped request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
        }
    }

    pub fn system(content: &str) -> Self {
        Self {
            role: Role::System,
            content: content.to_string(),
        }
    }
}

/// A generation request - either a flat prompt or a message list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Target model id
    pub model: String,

    /// Flat prompt (completion shape)
    #[serde(default)]
    pub prompt: Option<String>,

    /// Role-tagged messages (chat shape)
    #[serde(default)]
    pub messages: Vec<Message>,

    /// System prompt, when the backend keeps it out of the message list
    #[serde(default)]
    pub system: Option<String>,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub top_p: Option<f32>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub stop_sequences: Vec<String>,

    #[serde(default)]
    pub stream: bool,
}

impl GenerateRequest {
    /// Chat-shaped request with a single user message
    pub fn chat(model: &str, content: &str) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![Message::user(content)],
            ..Default::default()
        }
    }

    /// Completion-shaped request with a flat prompt
    pub fn completion(model: &str, prompt: &str) -> Self {
        Self {
            model: model.to_string(),
            prompt: Some(prompt.to_string()),
            ..Default::default()
        }
    }

    /// The request text viewed as chat messages, regardless of shape
    pub fn as_messages(&self) -> Vec<Message> {
        if !self.messages.is_empty() {
            return self.messages.clone();
        }
        match &self.prompt {
            Some(prompt) => vec![Message::user(prompt)],
            None => Vec::new(),
        }
    }
}

/// Token counts reported by a provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A completed generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Generated text
    pub content: String,

    /// Token usage as reported by the backend
    pub usage: Usage,

    /// Backend-specific finish reason, normalized to a string
    pub finish_reason: Option<String>,

    /// Cost of this call in USD
    pub cost: f64,

    /// Round-trip latency in milliseconds
    pub latency_ms: u64,
}

/// One increment of a streamed generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDelta {
    /// Text produced by this delta (may be empty on the final event)
    pub content: String,

    /// Set on the final delta
    pub done: bool,
}

/// An embedding request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub model: String,
    pub inputs: Vec<String>,
}

/// Result of a provider health probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub available: bool,
    pub latency_ms: u64,
    pub error_rate: f64,
}

/// A finite stream of generation deltas; not restartable
pub type DeltaStream = BoxStream<'static, ProviderResult<StreamDelta>>;

/// Uniform contract over AI backends
///
/// Constructed with credentials through the [`ProviderRegistry`]; the
/// constructor is this contract's `Initialize(credentials)`.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    /// Which backend this is
    fn kind(&self) -> ProviderKind;

    /// Models this backend serves
    async fn list_models(&self) -> ProviderResult<Vec<ModelDescriptor>>;

    /// Run a generation to completion
    async fn generate(&self, request: GenerateRequest) -> ProviderResult<GenerateResponse>;

    /// Stream a generation as deltas
    async fn stream(&self, request: GenerateRequest) -> ProviderResult<DeltaStream>;

    /// Embed a batch of inputs
    ///
    /// Backends without embedding support return a non-retryable error.
    async fn embed(&self, request: EmbedRequest) -> ProviderResult<Vec<Vec<f32>>> {
        let _ = request;
        Err(ProviderError::Api {
            provider: self.kind().to_string(),
            message: "embeddings not supported".to_string(),
            retryable: false,
        })
    }

    /// Probe availability and latency
    async fn health_check(&self) -> ProviderHealth;
}

/// Client-side minimum spacing between requests to one provider instance
///
/// A simple throttle, not a token bucket: each call waits until at least
/// `min_gap` has passed since the previous one.
#[derive(Debug)]
pub struct Throttle {
    min_gap: Duration,
    last: tokio::sync::Mutex<Option<tokio::time::Instant>>,
}

impl Throttle {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last: tokio::sync::Mutex::new(None),
        }
    }

    /// Wait out the remainder of the gap, then claim the slot
    pub async fn pace(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_gap {
                tokio::time::sleep(self.min_gap - elapsed).await;
            }
        }
        *last = Some(tokio::time::Instant::now());
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

/// Split a streaming HTTP response into lines
///
/// Both SSE (`data: {...}`) and NDJSON backends reduce to line framing;
/// adapters strip their own prefixes.
pub(crate) fn response_lines(
    response: reqwest::Response,
    provider: &str,
) -> BoxStream<'static, ProviderResult<String>> {
    use futures::StreamExt;

    let provider = provider.to_string();
    let stream = futures::stream::try_unfold(
        (response, String::new(), std::collections::VecDeque::new()),
        move |(mut response, mut buffer, mut pending)| {
            let provider = provider.clone();
            async move {
                loop {
                    if let Some(line) = pending.pop_front() {
                        return Ok(Some((line, (response, buffer, pending))));
                    }
                    match response.chunk().await {
                        Ok(Some(bytes)) => {
                            buffer.push_str(&String::from_utf8_lossy(&bytes));
                            while let Some(pos) = buffer.find('\n') {
                                let line: String = buffer.drain(..=pos).collect();
                                let line = line.trim_end().to_string();
                                if !line.is_empty() {
                                    pending.push_back(line);
                                }
                            }
                        }
                        Ok(None) => {
                            let line = buffer.trim_end().to_string();
                            buffer.clear();
                            if !line.is_empty() {
                                pending.push_back(line);
                            } else if pending.is_empty() {
                                return Ok(None);
                            }
                        }
                        Err(err) => return Err(ProviderError::transport(&provider, err)),
                    }
                }
            }
        },
    );
    stream.boxed()
}
