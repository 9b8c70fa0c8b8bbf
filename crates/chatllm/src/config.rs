use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::budget::ModelPrice;
use crate::chat::UnknownRolePolicy;
use crate::llm::Provider;

pub const DEFAULT_CONFIG_PATH: &str = ".chatllm/config.yaml";

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_provider")]
    pub provider: Provider,
    #[serde(default = "default_model")]
    pub model: String,
    /// Ledger key that spend is accumulated under.
    #[serde(default = "default_budget_user")]
    pub budget_user: String,
    #[serde(default = "default_show_spinner")]
    pub show_spinner: bool,
    /// Prepended as a system turn when a new conversation starts.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub unknown_role_policy: UnknownRolePolicy,
    /// Proxy URL applied to every provider request.
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// API keys by provider. Take precedence over environment variables.
    /// An unknown provider name fails the whole load.
    #[serde(default)]
    pub api_keys: BTreeMap<Provider, String>,
    #[serde(default)]
    pub providers: BTreeMap<Provider, ProviderConfig>,
    #[serde(default)]
    pub budget: BudgetConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            budget_user: default_budget_user(),
            show_spinner: default_show_spinner(),
            system_prompt: None,
            unknown_role_policy: UnknownRolePolicy::default(),
            proxy: None,
            request_timeout_seconds: default_request_timeout(),
            max_tokens: default_max_tokens(),
            api_keys: BTreeMap::new(),
            providers: BTreeMap::new(),
            budget: BudgetConfig::default(),
        }
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }

    /// Base URL for a provider, honoring per-provider overrides.
    pub fn base_url(&self, provider: Provider) -> String {
        self.providers
            .get(&provider)
            .and_then(|p| p.base_url.clone())
            .unwrap_or_else(|| provider.default_base_url().to_string())
    }
}

fn default_provider() -> Provider {
    Provider::OpenAI
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_budget_user() -> String {
    "default".to_string()
}

fn default_show_spinner() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_tokens() -> u32 {
    4096
}

// ============================================================================
// ProviderConfig
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub base_url: Option<String>,
}

// ============================================================================
// BudgetConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_budget_path")]
    pub path: PathBuf,
    /// Spending cap in USD given to users on first use.
    #[serde(default)]
    pub total_budget: Option<f64>,
    /// Price used for models missing from the pricing table.
    #[serde(default)]
    pub default_price: Option<ModelPrice>,
    /// Per-model prices, merged over the built-in table.
    #[serde(default)]
    pub pricing: BTreeMap<String, ModelPrice>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            path: default_budget_path(),
            total_budget: None,
            default_price: None,
            pricing: BTreeMap::new(),
        }
    }
}

fn default_budget_path() -> PathBuf {
    PathBuf::from(".chatllm/budget.json")
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

// ============================================================================
// Tests
// ============================================================================
