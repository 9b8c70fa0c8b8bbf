//! Caller-side conversation history entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::llm::Role;

/// One entry of a conversation history as the caller keeps it.
///
/// The role is an unchecked string; validation happens during normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
    /// Text an assistant turn should continue from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl ConversationTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            prefix: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System.as_str(), content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User.as_str(), content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant.as_str(), content)
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Parse the turn at position `index` of a JSON history.
    pub fn from_value(index: usize, value: &Value) -> Result<Self, MalformedTurnError> {
        let Some(object) = value.as_object() else {
            return Err(MalformedTurnError::new(index, "turn is not an object"));
        };

        let string_field = |name: &str| -> Result<Option<String>, MalformedTurnError> {
            match object.get(name) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(_) => Err(MalformedTurnError::new(
                    index,
                    format!("field '{name}' is not a string"),
                )),
            }
        };

        let role = string_field("role")?
            .ok_or_else(|| MalformedTurnError::new(index, "missing field 'role'"))?;
        let content = string_field("content")?
            .ok_or_else(|| MalformedTurnError::new(index, "missing field 'content'"))?;
        let prefix = string_field("prefix")?;

        Ok(Self {
            role,
            content,
            prefix,
        })
    }
}

/// Parse a JSON array of turns, failing on the first malformed one.
pub fn turns_from_json(value: &Value) -> Result<Vec<ConversationTurn>, MalformedTurnError> {
    let Some(items) = value.as_array() else {
        return Err(MalformedTurnError::new(0, "history is not an array of turns"));
    };
    items
        .iter()
        .enumerate()
        .map(|(index, item)| ConversationTurn::from_value(index, item))
        .collect()
}

/// A history entry that cannot be turned into a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed conversation turn at index {index}: {reason}")]
pub struct MalformedTurnError {
    pub index: usize,
    pub reason: String,
}

impl MalformedTurnError {
    pub fn new(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            reason: reason.into(),
        }
    }
}
