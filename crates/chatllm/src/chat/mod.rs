//! Conversation handling: normalization, dispatch and response mapping.

mod error;
mod mediator;
mod normalize;
mod response;
mod turn;

pub use error::ChatError;
pub use mediator::{ChatMediator, InteractionContext};
pub use normalize::{NormalizationWarning, Normalized, UnknownRolePolicy, normalize};
pub use response::{
    CanonicalChoice, CanonicalMessage, CanonicalResponse, MalformedResponseError,
    ResponseMapper, TokenUsage,
};
pub use turn::{ConversationTurn, MalformedTurnError, turns_from_json};
