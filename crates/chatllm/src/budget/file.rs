//! JSON-file budget ledger.
//!
//! Writes go to a temp file that is fsynced and renamed over the target.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::pricing::PricingTable;
use super::{BudgetError, BudgetLedger};
use crate::config::BudgetConfig;
use crate::llm::ChatResponse;

/// Spend record for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBudget {
    #[serde(default)]
    pub total_budget: Option<f64>,
    #[serde(default)]
    pub current_cost: f64,
    /// Spend broken down by model name.
    #[serde(default)]
    pub model_cost: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl UserBudget {
    fn new(total_budget: Option<f64>, now: DateTime<Utc>) -> Self {
        Self {
            total_budget,
            current_cost: 0.0,
            model_cost: BTreeMap::new(),
            created_at: now,
            last_updated_at: now,
        }
    }

    pub fn remaining(&self) -> Option<f64> {
        self.total_budget.map(|total| total - self.current_cost)
    }
}

#[derive(Default)]
struct LedgerState {
    users: BTreeMap<String, UserBudget>,
    revision: u64,
    saved_revision: u64,
}

impl LedgerState {
    fn is_dirty(&self) -> bool {
        self.revision != self.saved_revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}

/// Budget ledger persisted as a JSON object keyed by user.
pub struct FileBudgetLedger {
    path: PathBuf,
    pricing: PricingTable,
    default_budget: Option<f64>,
    state: Mutex<LedgerState>,
}

impl FileBudgetLedger {
    /// Load the ledger at `path`. A missing file yields an empty ledger.
    pub async fn open(
        path: impl Into<PathBuf>,
        pricing: PricingTable,
        default_budget: Option<f64>,
    ) -> Result<Self, BudgetError> {
        let path = path.into();
        let users = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(BudgetError::file_io(&path, e)),
        };
        debug!(path = %path.display(), "Opened budget ledger");

        Ok(Self {
            path,
            pricing,
            default_budget,
            state: Mutex::new(LedgerState {
                users,
                ..LedgerState::default()
            }),
        })
    }

    pub async fn from_config(config: &BudgetConfig) -> Result<Self, BudgetError> {
        Self::open(
            config.path.clone(),
            PricingTable::from_config(config),
            config.total_budget,
        )
        .await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set `user`'s spending cap, creating the record if needed.
    pub fn create_budget(&self, user: &str, total_budget: f64) {
        let mut state = self.lock();
        let now = Utc::now();
        state
            .users
            .entry(user.to_string())
            .or_insert_with(|| UserBudget::new(None, now))
            .total_budget = Some(total_budget);
        state.touch();
    }

    pub fn user_budget(&self, user: &str) -> Option<UserBudget> {
        self.lock().users.get(user).cloned()
    }

    /// Budget left for `user`, if a cap is set.
    pub fn remaining(&self, user: &str) -> Option<f64> {
        self.lock().users.get(user).and_then(UserBudget::remaining)
    }

    pub fn is_over_budget(&self, user: &str) -> bool {
        self.remaining(user).is_some_and(|left| left <= 0.0)
    }
}

#[async_trait]
impl BudgetLedger for FileBudgetLedger {
    fn update_cost(&self, user: &str, completion: &ChatResponse) -> Result<f64, BudgetError> {
        let cost = self.pricing.cost(completion)?;
        let now = Utc::now();

        let mut state = self.lock();
        let record = state
            .users
            .entry(user.to_string())
            .or_insert_with(|| UserBudget::new(self.default_budget, now));
        record.current_cost += cost;
        *record
            .model_cost
            .entry(completion.model.clone())
            .or_default() += cost;
        record.last_updated_at = now;
        let total = record.current_cost;
        state.touch();

        debug!(user, model = %completion.model, cost, total, "Recorded completion cost");
        Ok(cost)
    }

    fn current_cost(&self, user: &str) -> f64 {
        self.lock()
            .users
            .get(user)
            .map_or(0.0, |record| record.current_cost)
    }

    async fn save(&self) -> Result<(), BudgetError> {
        let (data, revision) = {
            let state = self.lock();
            (serde_json::to_vec_pretty(&state.users)?, state.revision)
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BudgetError::file_io(parent, e))?;
        }
        atomic_write_file(&self.path, &data).await?;

        let mut state = self.lock();
        state.saved_revision = state.saved_revision.max(revision);
        Ok(())
    }
}

impl Drop for FileBudgetLedger {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.is_dirty() {
            return;
        }

        let result = serde_json::to_vec_pretty(&state.users)
            .map_err(BudgetError::from)
            .and_then(|data| write_file_blocking(&self.path, &data));
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "Failed to flush budget ledger");
        }
    }
}

fn temp_path_for(final_path: &Path) -> PathBuf {
    let file_name = final_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("budget");
    final_path.with_file_name(format!("{}.{}.tmp", file_name, ulid::Ulid::new()))
}

/// Write data to a temp file, fsync it, then atomically rename to the final path.
async fn atomic_write_file(final_path: &Path, data: &[u8]) -> Result<(), BudgetError> {
    let temp_path = temp_path_for(final_path);

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| BudgetError::file_io(&temp_path, e))?;
    file.write_all(data)
        .await
        .map_err(|e| BudgetError::file_io(&temp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| BudgetError::file_io(&temp_path, e))?;
    fs::rename(&temp_path, final_path)
        .await
        .map_err(|e| BudgetError::file_io(final_path, e))?;
    Ok(())
}

/// Blocking counterpart of [`atomic_write_file`] for use from `Drop`.
fn write_file_blocking(final_path: &Path, data: &[u8]) -> Result<(), BudgetError> {
    if let Some(parent) = final_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| BudgetError::file_io(parent, e))?;
    }
    let temp_path = temp_path_for(final_path);

    let mut file =
        std::fs::File::create(&temp_path).map_err(|e| BudgetError::file_io(&temp_path, e))?;
    file.write_all(data)
        .and_then(|()| file.sync_all())
        .map_err(|e| BudgetError::file_io(&temp_path, e))?;
    std::fs::rename(&temp_path, final_path).map_err(|e| BudgetError::file_io(final_path, e))
}
