//! Canonical response shape and the mapper that produces it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::budget::BudgetLedger;
use crate::llm::{ChatResponse, Usage};
use crate::ui::{Notice, OutputSurface};

/// Provider-independent result handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalResponse {
    pub choices: Vec<CanonicalChoice>,
    pub usage: TokenUsage,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalChoice {
    pub message: CanonicalMessage,
    /// Empty when the provider gave no reason.
    pub finish_reason: String,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub content: String,
    pub role: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<Usage> for TokenUsage {
    fn from(usage: Usage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// A raw completion that cannot be mapped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedResponseError {
    #[error("response from model '{model}' has no choices")]
    NoChoices { model: String },
}

impl TryFrom<&ChatResponse> for CanonicalResponse {
    type Error = MalformedResponseError;

    fn try_from(raw: &ChatResponse) -> Result<Self, Self::Error> {
        if raw.choices.is_empty() {
            return Err(MalformedResponseError::NoChoices {
                model: raw.model.clone(),
            });
        }

        let choices = raw
            .choices
            .iter()
            .map(|choice| CanonicalChoice {
                message: CanonicalMessage {
                    content: choice.message.content.clone().unwrap_or_default(),
                    role: choice.message.role.clone(),
                },
                finish_reason: choice.finish_reason.clone().unwrap_or_default(),
                index: choice.index,
            })
            .collect();

        let usage = raw.usage.map(TokenUsage::from).unwrap_or_else(|| {
            debug!(model = %raw.model, "Response carries no usage, recording zeros");
            TokenUsage::default()
        });

        Ok(Self {
            choices,
            usage,
            model: raw.model.clone(),
        })
    }
}

/// Charges the ledger for a raw completion and maps it to canonical form.
pub struct ResponseMapper {
    ledger: Arc<dyn BudgetLedger>,
    surface: Arc<dyn OutputSurface>,
}

impl ResponseMapper {
    pub fn new(ledger: Arc<dyn BudgetLedger>, surface: Arc<dyn OutputSurface>) -> Self {
        Self { ledger, surface }
    }

    /// Returns the first choice's text and the canonical response.
    ///
    /// A failed cost update is reported and does not stop mapping. A response
    /// without choices is reported and yields `None`. A first choice without
    /// text content yields `None` silently.
    pub fn map(&self, user: &str, raw: &ChatResponse) -> Option<(String, CanonicalResponse)> {
        if let Err(e) = self.ledger.update_cost(user, raw) {
            warn!(user, model = %raw.model, error = %e, "Budget update failed");
            self.surface
                .notify(Notice::error(format!("Budget update error: {e}")));
        }

        let response = match CanonicalResponse::try_from(raw) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Unexpected response format");
                self.surface
                    .notify(Notice::error(format!("Unexpected response format: {raw:?}")));
                return None;
            }
        };

        let Some(content) = raw.choices.first().and_then(|c| c.message.content.clone()) else {
            debug!(model = %raw.model, "First choice has no text content");
            return None;
        };

        Some((content, response))
    }
}
