//! Errors raised inside a chat call.

use thiserror::Error;

use super::turn::MalformedTurnError;
use crate::credentials::CredentialError;
use crate::llm::{LLMError, Provider};

/// Everything that can end a chat call early.
///
/// Only `Cancelled` is silent; the rest are shown to the user.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("provider '{0}' is not registered")]
    UnknownProvider(Provider),

    #[error(transparent)]
    MalformedTurn(#[from] MalformedTurnError),

    #[error(transparent)]
    Dispatch(#[from] LLMError),

    #[error("request cancelled")]
    Cancelled,
}
