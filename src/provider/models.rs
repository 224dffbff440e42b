//! Builtin model catalog - descriptors per provider

use crate::provider::ProviderKind;
use serde::{Deserialize, Serialize};

/// A named feature a model supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Completion,
    Embeddings,
    Vision,
    FunctionCalling,
    Streaming,
}

/// Everything the engine needs to know about one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier as the backend expects it
    pub id: String,

    /// Serving backend
    pub provider: ProviderKind,

    /// Supported capabilities
    pub capabilities: Vec<Capability>,

    /// Context window in tokens
    pub context_window: u32,

    /// Maximum output tokens per request
    pub max_output_tokens: u32,

    /// USD per 1K input tokens
    pub input_cost_per_1k: f64,

    /// USD per 1K output tokens
    pub output_cost_per_1k: f64,

    pub supports_streaming: bool,
    pub supports_functions: bool,
    pub supports_vision: bool,
}

impl ModelDescriptor {
    fn chat(
        id: &str,
        provider: ProviderKind,
        context_window: u32,
        max_output_tokens: u32,
        input_cost_per_1k: f64,
        output_cost_per_1k: f64,
    ) -> Self {
        Self {
            id: id.to_string(),
            provider,
            capabilities: vec![Capability::Chat, Capability::Streaming],
            context_window,
            max_output_tokens,
            input_cost_per_1k,
            output_cost_per_1k,
            supports_streaming: true,
            supports_functions: false,
            supports_vision: false,
        }
    }

    fn with_capability(mut self, capability: Capability) -> Self {
        match capability {
            Capability::Vision => self.supports_vision = true,
            Capability::FunctionCalling => self.supports_functions = true,
            _ => {}
        }
        self.capabilities.push(capability);
        self
    }
}

/// The builtin catalog
///
/// Rates are USD per 1K tokens; local models are free.
pub fn catalog() -> Vec<ModelDescriptor> {
    vec![
        // Anthropic
        ModelDescriptor::chat(
            "claude-3-5-sonnet-latest",
            ProviderKind::Anthropic,
            200_000,
            8_192,
            0.003,
            0.015,
        )
        .with_capability(Capability::Vision)
        .with_capability(Capability::FunctionCalling),
        ModelDescriptor::chat(
            "claude-3-5-haiku-latest",
            ProviderKind::Anthropic,
            200_000,
            8_192,
            0.0008,
            0.004,
        )
        .with_capability(Capability::FunctionCalling),
        ModelDescriptor::chat(
            "claude-3-opus-latest",
            ProviderKind::Anthropic,
            200_000,
            4_096,
            0.015,
            0.075,
        )
        .with_capability(Capability::Vision)
        .with_capability(Capability::FunctionCalling),
        // OpenAI
        ModelDescriptor::chat("gpt-4o", ProviderKind::OpenAi, 128_000, 16_384, 0.0025, 0.01)
            .with_capability(Capability::Vision)
            .with_capability(Capability::FunctionCalling),
        ModelDescriptor::chat(
            "gpt-4o-mini",
            ProviderKind::OpenAi,
            128_000,
            16_384,
            0.00015,
            0.0006,
        )
        .with_capability(Capability::FunctionCalling),
        ModelDescriptor::chat(
            "gpt-4-turbo",
            ProviderKind::OpenAi,
            128_000,
            4_096,
            0.01,
            0.03,
        )
        .with_capability(Capability::FunctionCalling),
        ModelDescriptor::chat(
            "gpt-3.5-turbo",
            ProviderKind::OpenAi,
            16_385,
            4_096,
            0.0005,
            0.0015,
        ),
        ModelDescriptor::chat(
            "gpt-3.5-turbo-instruct",
            ProviderKind::OpenAi,
            4_096,
            4_096,
            0.0015,
            0.002,
        )
        .with_capability(Capability::Completion),
        ModelDescriptor {
            id: "text-embedding-3-small".to_string(),
            provider: ProviderKind::OpenAi,
            capabilities: vec![Capability::Embeddings],
            context_window: 8_191,
            max_output_tokens: 0,
            input_cost_per_1k: 0.00002,
            output_cost_per_1k: 0.0,
            supports_streaming: false,
            supports_functions: false,
            supports_vision: false,
        },
        // Ollama (local, free)
        ModelDescriptor::chat("llama3.1", ProviderKind::Ollama, 131_072, 4_096, 0.0, 0.0),
        ModelDescriptor::chat("mistral", ProviderKind::Ollama, 32_768, 4_096, 0.0, 0.0),
        ModelDescriptor::chat("qwen2.5", ProviderKind::Ollama, 32_768, 4_096, 0.0, 0.0),
    ]
}

/// Catalog entries for one provider
pub fn models_for(provider: ProviderKind) -> Vec<ModelDescriptor> {
    catalog()
        .into_iter()
        .filter(|m| m.provider == provider)
        .collect()
}

/// Find a model by id across all providers
pub fn find(model_id: &str) -> Option<ModelDescriptor> {
    catalog().into_iter().find(|m| m.id == model_id)
}

/// Whether a model id should use the legacy completion request shape
///
/// Heuristic on the id string: instruct-tuned and legacy base models
/// take a flat prompt; everything else chats.
pub fn prefers_completion_shape(model_id: &str) -> bool {
    let lower = model_id.to_lowercase();
    lower.contains("instruct") || lower.contains("davinci") || lower.contains("babbage")
}
