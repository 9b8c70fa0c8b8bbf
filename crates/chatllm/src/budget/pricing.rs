//! Model pricing used to turn token counts into cost.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::BudgetError;
use crate::config::BudgetConfig;
use crate::llm::{ChatResponse, Usage};

/// USD price per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl ModelPrice {
    pub const fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }

    pub fn cost(&self, usage: &Usage) -> f64 {
        (f64::from(usage.prompt_tokens) * self.input_per_mtok
            + f64::from(usage.completion_tokens) * self.output_per_mtok)
            / 1_000_000.0
    }
}

// Keys are model-name prefixes; dated snapshots resolve to their family.
const BUILTIN_PRICES: &[(&str, ModelPrice)] = &[
    ("gpt-4o", ModelPrice::new(2.50, 10.00)),
    ("gpt-4o-mini", ModelPrice::new(0.15, 0.60)),
    ("gpt-4.1", ModelPrice::new(2.00, 8.00)),
    ("gpt-4.1-mini", ModelPrice::new(0.40, 1.60)),
    ("gpt-4.1-nano", ModelPrice::new(0.10, 0.40)),
    ("o3-mini", ModelPrice::new(1.10, 4.40)),
    ("claude-3-5-haiku", ModelPrice::new(0.80, 4.00)),
    ("claude-3-5-sonnet", ModelPrice::new(3.00, 15.00)),
    ("claude-3-7-sonnet", ModelPrice::new(3.00, 15.00)),
    ("claude-sonnet-4", ModelPrice::new(3.00, 15.00)),
    ("claude-3-opus", ModelPrice::new(15.00, 75.00)),
    ("claude-opus-4", ModelPrice::new(15.00, 75.00)),
    ("llama-3.1-8b-instant", ModelPrice::new(0.05, 0.08)),
    ("llama-3.3-70b-versatile", ModelPrice::new(0.59, 0.79)),
];

/// Price lookup by model name.
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: BTreeMap<String, ModelPrice>,
    default_price: Option<ModelPrice>,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PricingTable {
    pub fn builtin() -> Self {
        Self {
            prices: BUILTIN_PRICES
                .iter()
                .map(|(model, price)| ((*model).to_string(), *price))
                .collect(),
            default_price: None,
        }
    }

    /// Built-in prices overlaid with configured ones.
    pub fn from_config(config: &BudgetConfig) -> Self {
        let mut table = Self::builtin();
        table.prices.extend(
            config
                .pricing
                .iter()
                .map(|(model, price)| (model.clone(), *price)),
        );
        table.default_price = config.default_price;
        table
    }

    pub fn set_price(&mut self, model: impl Into<String>, price: ModelPrice) {
        self.prices.insert(model.into(), price);
    }

    /// Exact name, then without a `vendor/` prefix, then the longest known
    /// prefix, then the default price.
    pub fn lookup(&self, model: &str) -> Option<ModelPrice> {
        let bare = model.rsplit_once('/').map_or(model, |(_, name)| name);

        self.prices
            .get(model)
            .or_else(|| self.prices.get(bare))
            .copied()
            .or_else(|| {
                self.prices
                    .iter()
                    .filter(|(key, _)| bare.starts_with(key.as_str()))
                    .max_by_key(|(key, _)| key.len())
                    .map(|(_, price)| *price)
            })
            .or(self.default_price)
    }

    /// Cost of one completion. A provider-reported cost wins over the table.
    pub fn cost(&self, completion: &ChatResponse) -> Result<f64, BudgetError> {
        let usage = completion
            .usage
            .ok_or_else(|| BudgetError::MissingUsage(completion.model.clone()))?;

        if let Some(cost) = usage.cost {
            return Ok(cost);
        }

        let price = self
            .lookup(&completion.model)
            .ok_or_else(|| BudgetError::UnknownModel(completion.model.clone()))?;
        Ok(price.cost(&usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::completion;

    #[test]
    fn dated_snapshot_resolves_to_longest_prefix() {
        let table = PricingTable::builtin();
        assert_eq!(
            table.lookup("gpt-4o-mini-2024-07-18"),
            Some(ModelPrice::new(0.15, 0.60))
        );
        assert_eq!(
            table.lookup("gpt-4o-2024-08-06"),
            Some(ModelPrice::new(2.50, 10.00))
        );
    }

    #[test]
    fn vendor_prefix_is_ignored() {
        let table = PricingTable::builtin();
        assert_eq!(
            table.lookup("anthropic/claude-3-5-sonnet-20241022"),
            Some(ModelPrice::new(3.00, 15.00))
        );
    }

    #[test]
    fn unknown_model_uses_default_or_fails() {
        let mut table = PricingTable::builtin();
        assert!(table.lookup("mystery-model").is_none());

        table.default_price = Some(ModelPrice::new(0.0, 0.0));
        assert_eq!(table.lookup("mystery-model"), Some(ModelPrice::new(0.0, 0.0)));
    }

    #[test]
    fn config_overrides_builtin() {
        let mut config = BudgetConfig::default();
        config
            .pricing
            .insert("gpt-4o".to_string(), ModelPrice::new(1.0, 1.0));
        let table = PricingTable::from_config(&config);
        assert_eq!(table.lookup("gpt-4o"), Some(ModelPrice::new(1.0, 1.0)));
    }

    #[test]
    fn cost_from_token_counts() {
        let table = PricingTable::builtin();
        let cost = table
            .cost(&completion("gpt-4o", "hi", 1_000_000, 100_000))
            .unwrap();
        assert!((cost - 3.5).abs() < 1e-9);
    }

    #[test]
    fn reported_cost_wins() {
        let mut raw = completion("mystery-model", "hi", 10, 10);
        if let Some(usage) = raw.usage.as_mut() {
            usage.cost = Some(0.0042);
        }
        assert_eq!(PricingTable::builtin().cost(&raw).unwrap(), 0.0042);
    }

    #[test]
    fn missing_usage_and_unknown_model_are_errors() {
        let table = PricingTable::builtin();

        let mut raw = completion("gpt-4o", "hi", 1, 1);
        raw.usage = None;
        assert!(matches!(table.cost(&raw), Err(BudgetError::MissingUsage(_))));

        let raw = completion("mystery-model", "hi", 1, 1);
        assert!(matches!(
            table.cost(&raw),
            Err(BudgetError::UnknownModel(model)) if model == "mystery-model"
        ));
    }
}
