//! Anthropic LLM provider with native API format.

use async_trait::async_trait;
use reqwest::Client;

use super::error::{LLMError, check_response_error};
use super::provider::LLMProvider;
use super::types::{ChatRequest, ChatResponse, Choice, ResponseMessage, Role, Usage};

/// Anthropic provider with native API format.
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_version: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub const DEFAULT_API_VERSION: &'static str = "2023-06-01";
    pub const DEFAULT_MAX_TOKENS: u32 = 4096;

    #[must_use]
    pub fn new(client: Client, base_url: String) -> Self {
        Self {
            client,
            base_url,
            api_version: Self::DEFAULT_API_VERSION.to_string(),
            max_tokens: Self::DEFAULT_MAX_TOKENS,
        }
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let anthropic_request = to_request(&request, self.max_tokens);

        tracing::debug!(
            url = %url,
            model = %anthropic_request.model,
            messages = anthropic_request.messages.len(),
            "sending anthropic message request"
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-api-key", &request.api_key)
            .header("anthropic-version", &self.api_version)
            .json(&anthropic_request)
            .send()
            .await?;

        if let Some(err) = check_response_error(&response) {
            return Err(err);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LLMError::Api { status, message });
        }

        let anthropic_response: Response = response.json().await?;
        Ok(from_response(anthropic_response))
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, serde::Serialize)]
struct Request {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<RequestMessage>,
}

#[derive(Debug, serde::Serialize)]
struct RequestMessage {
    role: &'static str,
    content: String,
}

#[derive(serde::Deserialize)]
struct Response {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ResponseContent>,
    stop_reason: Option<String>,
    usage: Option<ResponseUsage>,
}

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(serde::Deserialize)]
struct ResponseUsage {
    input_tokens: u32,
    output_tokens: u32,
}

// ============================================================================
// Conversions
// ============================================================================

fn to_request(request: &ChatRequest, max_tokens: u32) -> Request {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut messages = Vec::new();

    for msg in &request.messages {
        match msg.role {
            Role::System => {
                if !msg.content.is_empty() {
                    system_parts.push(&msg.content);
                }
            }
            Role::Assistant => messages.push(RequestMessage {
                role: "assistant",
                content: msg.content.clone(),
            }),
            // Anthropic only knows user/assistant turns
            Role::User | Role::Function | Role::Tool => messages.push(RequestMessage {
                role: "user",
                content: msg.content.clone(),
            }),
        }
    }

    merge_consecutive_messages(&mut messages);

    let model = request
        .model
        .strip_prefix("anthropic/")
        .unwrap_or(&request.model)
        .to_string();

    Request {
        model,
        max_tokens,
        system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
        messages,
    }
}

/// Merge consecutive messages with the same role into single messages.
///
/// The Anthropic API requires strict user/assistant alternation.
fn merge_consecutive_messages(messages: &mut Vec<RequestMessage>) {
    if messages.len() < 2 {
        return;
    }

    let mut merged: Vec<RequestMessage> = Vec::with_capacity(messages.len());

    for msg in messages.drain(..) {
        match merged.last_mut() {
            Some(last) if last.role == msg.role => {
                if msg.content.is_empty() {
                    continue;
                }
                if !last.content.is_empty() {
                    last.content.push_str("\n\n");
                }
                last.content.push_str(&msg.content);
            }
            _ => merged.push(msg),
        }
    }

    *messages = merged;
}

fn from_response(response: Response) -> ChatResponse {
    let content = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ResponseContent::Text { text } => Some(text),
            ResponseContent::Other => None,
        })
        .collect::<Vec<_>>()
        .join("");

    ChatResponse {
        id: response.id,
        model: response.model,
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: Role::Assistant.as_str().to_string(),
                content: Some(content),
            },
            finish_reason: response.stop_reason,
        }],
        usage: response.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
            cost: None,
        }),
    }
}
