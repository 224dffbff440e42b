//! Provider registry - constructors and cached instances
//!
//! Owned and dependency-injected, never ambient global state: the
//! registry is created at startup and handed to whatever needs it.

use crate::provider::{
    anthropic::AnthropicProvider, ollama::OllamaProvider, openai::OpenAiProvider, Credentials,
    Provider, ProviderError, ProviderHealth, ProviderKind, ProviderResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

type Constructor = Arc<dyn Fn(Credentials) -> Arc<dyn Provider> + Send + Sync>;

/// Maps provider kinds to constructors and caches built instances
pub struct ProviderRegistry {
    constructors: HashMap<ProviderKind, Constructor>,
    cache: RwLock<HashMap<(ProviderKind, u64), Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with all builtin adapters registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ProviderKind::Anthropic, |c| {
            Arc::new(AnthropicProvider::new(c))
        });
        registry.register(ProviderKind::OpenAi, |c| Arc::new(OpenAiProvider::new(c)));
        registry.register(ProviderKind::Ollama, |c| Arc::new(OllamaProvider::new(c)));
        registry
    }

    /// Register a constructor for a provider kind
    pub fn register<F>(&mut self, kind: ProviderKind, constructor: F)
    where
        F: Fn(Credentials) -> Arc<dyn Provider> + Send + Sync + 'static,
    {
        self.constructors.insert(kind, Arc::new(constructor));
    }

    /// Registered provider kinds
    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.constructors.keys().copied().collect()
    }

    /// Build a fresh, caller-owned instance
    pub fn create(
        &self,
        kind: ProviderKind,
        credentials: Credentials,
    ) -> ProviderResult<Arc<dyn Provider>> {
        let constructor = self.constructors.get(&kind).ok_or_else(|| ProviderError::Api {
            provider: kind.to_string(),
            message: "provider not registered".to_string(),
            retryable: false,
        })?;
        Ok(constructor(credentials))
    }

    /// Fetch a cached instance for these credentials, building on first use
    pub async fn get_or_create(
        &self,
        kind: ProviderKind,
        credentials: Credentials,
    ) -> ProviderResult<Arc<dyn Provider>> {
        let key = (kind, credentials.fingerprint());
        {
            let cache = self.cache.read().await;
            if let Some(provider) = cache.get(&key) {
                return Ok(provider.clone());
            }
        }

        let provider = self.create(kind, credentials)?;
        debug!(provider = %kind, "Caching provider instance");
        self.cache.write().await.insert(key, provider.clone());
        Ok(provider)
    }

    /// Drop all cached instances
    pub async fn drain(&self) {
        self.cache.write().await.clear();
    }

    /// Probe every registered provider for which credentials are supplied
    pub async fn health_check_all(
        &self,
        credentials: &HashMap<ProviderKind, Credentials>,
    ) -> HashMap<ProviderKind, ProviderHealth> {
        let mut probes = Vec::new();
        for (kind, creds) in credentials {
            if let Ok(provider) = self.create(*kind, creds.clone()) {
                let kind = *kind;
                probes.push(async move { (kind, provider.health_check().await) });
            }
        }

        futures::future::join_all(probes).await.into_iter().collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
