//! Provider registry for managing LLM provider instances.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use super::anthropic::AnthropicProvider;
use super::error::LLMError;
use super::openai::OpenAICompatibleProvider;
use super::provider::{LLMProvider, Provider, ProviderCapabilities};
use crate::config::Config;

/// A registered provider implementation and the quirks it declared.
#[derive(Clone)]
pub struct RegisteredProvider {
    pub implementation: Arc<dyn LLMProvider>,
    pub capabilities: ProviderCapabilities,
}

/// Registry of LLM providers, keyed by provider type.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<Provider, RegisteredProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every known provider against one shared HTTP client.
    ///
    /// The client carries the configured proxy and request timeout. Keys are
    /// not captured here; they travel with each request.
    pub fn from_config(config: &Config) -> Result<Self, LLMError> {
        let mut builder =
            Client::builder().timeout(Duration::from_secs(config.request_timeout_seconds));
        if let Some(proxy) = config.proxy.as_deref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
            debug!(proxy, "Using HTTP proxy for provider requests");
        }
        let client = builder.build()?;

        let mut registry = Self::new();
        for provider in Provider::ALL {
            let base_url = config.base_url(provider);
            let implementation: Arc<dyn LLMProvider> = match provider {
                Provider::Anthropic => Arc::new(
                    AnthropicProvider::new(client.clone(), base_url)
                        .with_max_tokens(config.max_tokens),
                ),
                _ => Arc::new(OpenAICompatibleProvider::new(client.clone(), base_url)),
            };
            registry.register(provider, implementation, provider.default_capabilities());
        }
        debug!(count = registry.providers.len(), "Registered providers");

        Ok(registry)
    }

    /// Register a provider implementation with its declared capabilities.
    pub fn register(
        &mut self,
        provider: Provider,
        implementation: Arc<dyn LLMProvider>,
        capabilities: ProviderCapabilities,
    ) {
        self.providers.insert(
            provider,
            RegisteredProvider {
                implementation,
                capabilities,
            },
        );
    }

    /// Get a provider by type.
    pub fn get(&self, provider: &Provider) -> Option<RegisteredProvider> {
        self.providers.get(provider).cloned()
    }

    /// Registered providers with their capabilities, in stable order.
    pub fn entries(&self) -> impl Iterator<Item = (Provider, ProviderCapabilities)> + '_ {
        self.providers
            .iter()
            .map(|(provider, entry)| (*provider, entry.capabilities))
    }
}
