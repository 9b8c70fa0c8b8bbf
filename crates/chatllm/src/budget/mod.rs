//! Per-user spend tracking for LLM completions.
//!
//! The ledger is injected into the chat layer as `Arc<dyn BudgetLedger>`.
//! `FileBudgetLedger` is the production implementation: a JSON file keyed by
//! user, written atomically on `save` and flushed on drop if still dirty.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::ChatResponse;

mod file;
mod pricing;

pub use file::{FileBudgetLedger, UserBudget};
pub use pricing::{ModelPrice, PricingTable};

/// Accumulates completion cost per user and persists it.
#[async_trait]
pub trait BudgetLedger: Send + Sync {
    /// Charge one completion to `user`, returning the amount charged in USD.
    fn update_cost(&self, user: &str, completion: &ChatResponse) -> Result<f64, BudgetError>;

    /// Total spend recorded for `user` (zero for unknown users).
    fn current_cost(&self, user: &str) -> f64;

    /// Persist the current state.
    async fn save(&self) -> Result<(), BudgetError>;
}

/// Errors raised while charging or persisting the ledger.
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("no price known for model '{0}'")]
    UnknownModel(String),

    #[error("completion for model '{0}' carries no usage data")]
    MissingUsage(String),

    #[error("budget file error at {}: {source}", path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse budget file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl BudgetError {
    pub fn file_io(path: &Path, source: std::io::Error) -> Self {
        BudgetError::FileIo {
            path: path.to_path_buf(),
            source,
        }
    }
}
