//! LLM provider client for chat completions.

mod anthropic;
mod error;
mod openai;
mod provider;
mod registry;
mod types;

pub use anthropic::AnthropicProvider;
pub use error::LLMError;
pub use openai::OpenAICompatibleProvider;
pub use provider::{LLMProvider, Provider, ProviderCapabilities};
pub use registry::{ProviderRegistry, RegisteredProvider};
pub use types::{ChatRequest, ChatResponse, Choice, Message, ResponseMessage, Role, UnknownRole, Usage};
