//! API key resolution.

use thiserror::Error;

use crate::config::Config;
use crate::llm::Provider;

/// No usable key for the configured provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no API key configured for provider '{provider}' (set api_keys.{provider} or {env})")]
pub struct CredentialError {
    pub provider: Provider,
    pub env: &'static str,
}

/// Resolves the credential for the provider named in a config.
pub trait CredentialResolver: Send + Sync {
    fn api_key(&self, config: &Config) -> Result<String, CredentialError>;
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads `api_keys` from the config, falling back to the provider's env var.
pub struct ConfigCredentials {
    env: EnvLookup,
}

impl Default for ConfigCredentials {
    fn default() -> Self {
        Self::with_env(|name| std::env::var(name).ok())
    }
}

impl ConfigCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom environment lookup instead of the process environment.
    pub fn with_env(env: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self { env: Box::new(env) }
    }
}

impl CredentialResolver for ConfigCredentials {
    fn api_key(&self, config: &Config) -> Result<String, CredentialError> {
        let provider = config.provider;

        if let Some(key) = config.api_keys.get(&provider).filter(|k| !k.is_empty()) {
            return Ok(key.clone());
        }

        let Some(env) = provider.api_key_env() else {
            // Keyless backend (local Ollama)
            return Ok(String::new());
        };

        (self.env)(env)
            .filter(|k| !k.is_empty())
            .ok_or(CredentialError { provider, env })
    }
}
