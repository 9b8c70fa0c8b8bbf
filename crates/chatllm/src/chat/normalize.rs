//! Conversation → provider request normalization.
//!
//! Two rules are applied to a copy of the caller's history:
//! - Assistant-prefix folding, for providers that declare it: an assistant
//!   turn's `prefix` is appended to its content, separated by a space.
//! - Role repair: roles outside the valid set are handled per
//!   [`UnknownRolePolicy`]. The default rewrites them to `user`, which loses
//!   the original role; a warning is returned so callers can surface it.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::turn::{ConversationTurn, MalformedTurnError};
use crate::llm::{ChatRequest, Message, ProviderCapabilities, Role};

/// What to do with a turn whose role is not recognized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownRolePolicy {
    /// Send the turn as a `user` turn.
    #[default]
    CoerceToUser,
    /// Refuse the history.
    Reject,
}

/// Something normalization changed that the caller may care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizationWarning {
    RoleCoerced { index: usize, original: String },
}

impl fmt::Display for NormalizationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizationWarning::RoleCoerced { index, original } => {
                write!(f, "turn {index}: unknown role {original:?} sent as user")
            }
        }
    }
}

/// A request ready for dispatch plus anything worth reporting.
#[derive(Debug)]
pub struct Normalized {
    pub request: ChatRequest,
    pub warnings: Vec<NormalizationWarning>,
}

pub fn normalize(
    turns: &[ConversationTurn],
    model: &str,
    api_key: String,
    capabilities: ProviderCapabilities,
    policy: UnknownRolePolicy,
) -> Result<Normalized, MalformedTurnError> {
    let mut warnings = Vec::new();
    let mut messages = Vec::with_capacity(turns.len());

    for (index, turn) in turns.iter().enumerate() {
        let role = match turn.role.parse::<Role>() {
            Ok(role) => role,
            Err(unknown) => match policy {
                UnknownRolePolicy::CoerceToUser => {
                    warnings.push(NormalizationWarning::RoleCoerced {
                        index,
                        original: unknown.0,
                    });
                    Role::User
                }
                UnknownRolePolicy::Reject => {
                    return Err(MalformedTurnError::new(index, unknown.to_string()));
                }
            },
        };

        let message = match (&turn.prefix, role) {
            (Some(prefix), Role::Assistant) if capabilities.assistant_prefix => Message {
                role,
                content: format!("{} {}", turn.content, prefix),
                prefix: None,
            },
            _ => Message {
                role,
                content: turn.content.clone(),
                prefix: turn.prefix.clone(),
            },
        };
        messages.push(message);
    }

    Ok(Normalized {
        request: ChatRequest {
            model: model.to_string(),
            messages,
            api_key,
        },
        warnings,
    })
}
