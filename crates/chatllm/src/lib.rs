//! chatllm - a terminal chat client for hosted and local LLM providers.
//!
//! The core is [`chat::ChatMediator`]: it normalizes a conversation for the
//! configured provider, dispatches it, charges the [`budget::BudgetLedger`]
//! and reports problems on a [`ui::OutputSurface`] instead of failing.

pub mod budget;
pub mod chat;
pub mod config;
pub mod credentials;
pub mod llm;
pub mod ui;

#[cfg(test)]
mod testing;
