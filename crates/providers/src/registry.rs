//! Maps a provider identifier to its adapter (spec §2 step 4). Built
//! once at startup and shared behind an `Arc` by the router.

use crate::adapter::ProviderAdapter;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self { adapters: HashMap::new() }
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.platform_id().to_string(), adapter);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider_id).cloned()
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    /// Populate with every adapter this crate ships, keyed by the
    /// platform id recognized throughout the gateway (spec §4.2 step 1
    /// defaults requests to `claude` when the caller omits `providerId`).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::anthropic::AnthropicAdapter::new()));
        registry.register(Arc::new(crate::openai_compat::OpenAiCompatAdapter::openai()));
        registry.register(Arc::new(crate::openai_compat::OpenAiCompatAdapter::qwen()));
        registry.register(Arc::new(crate::openai_compat::OpenAiCompatAdapter::glm()));
        registry.register(Arc::new(crate::openai_compat::OpenAiCompatAdapter::kimi()));
        registry.register(Arc::new(crate::openai_compat::OpenAiCompatAdapter::deepseek()));
        registry.register(Arc::new(crate::wenxin::WenxinAdapter));
        registry.register(Arc::new(crate::spark::SparkAdapter));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_claude_and_the_openai_compatible_family() {
        let registry = AdapterRegistry::with_defaults();
        for id in ["claude", "openai", "qwen", "glm", "kimi", "deepseek", "wenxin", "spark"] {
            assert!(registry.get(id).is_some(), "missing adapter for {id}");
        }
    }

    #[test]
    fn unknown_provider_id_returns_none() {
        let registry = AdapterRegistry::with_defaults();
        assert!(registry.get("does-not-exist").is_none());
    }
}
