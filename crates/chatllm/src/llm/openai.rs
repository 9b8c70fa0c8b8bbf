//! OpenAI-compatible LLM provider.
//!
//! Works with OpenAI, OpenRouter, Groq, Ollama, and other compatible APIs.

use async_trait::async_trait;
use reqwest::Client;

use super::error::{LLMError, check_response_error};
use super::provider::LLMProvider;
use super::types::{ChatRequest, ChatResponse};

/// OpenAI-compatible provider.
pub struct OpenAICompatibleProvider {
    client: Client,
    base_url: String,
}

impl OpenAICompatibleProvider {
    #[must_use]
    pub fn new(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let url = self.endpoint();

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");

        if !request.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", request.api_key));
        }

        tracing::debug!(url = %url, model = %request.model, "sending chat completion");
        let response = req.json(&request).send().await?;

        if let Some(err) = check_response_error(&response) {
            return Err(err);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LLMError::Api { status, message });
        }

        Ok(response.json().await?)
    }
}
