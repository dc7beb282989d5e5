//! Explicit operating settings for the packing floor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use packhouse_core::{DomainError, DomainResult};

/// Operating settings, threaded explicitly through ledger and packing math.
///
/// Every field has a serde default, so a partial settings document fills the
/// gaps with the standard values instead of failing to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackhouseSettings {
    /// Remaining weight (kg) at or below which a batch counts as exhausted.
    pub closure_threshold: f64,
    /// Packing loss percentage applied when no override matches.
    pub loss_percent: f64,
    /// Per-product-type loss percentage overrides.
    pub loss_percent_overrides: BTreeMap<String, f64>,
    /// Weight (kg) of one intake bag.
    pub bag_weight: f64,
}

impl Default for PackhouseSettings {
    fn default() -> Self {
        Self {
            closure_threshold: 0.001,
            loss_percent: 0.0,
            loss_percent_overrides: BTreeMap::new(),
            bag_weight: 25.0,
        }
    }
}

impl PackhouseSettings {
    /// Loss percentage for `product_type`, falling back to the default.
    pub fn loss_percent_for(&self, product_type: &str) -> f64 {
        self.loss_percent_overrides
            .get(product_type)
            .copied()
            .unwrap_or(self.loss_percent)
    }

    /// Replace non-finite or negative values with the standard defaults.
    ///
    /// Settings documents are edited by hand; a broken number degrades to its
    /// default instead of propagating into every calculation.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !self.closure_threshold.is_finite() || self.closure_threshold < 0.0 {
            self.closure_threshold = defaults.closure_threshold;
        }
        if !self.loss_percent.is_finite() || self.loss_percent < 0.0 {
            self.loss_percent = defaults.loss_percent;
        }
        if !self.bag_weight.is_finite() || self.bag_weight < 0.0 {
            self.bag_weight = defaults.bag_weight;
        }
        self.loss_percent_overrides
            .retain(|_, pct| pct.is_finite() && *pct >= 0.0);
        self
    }

    /// Parse a JSON settings document, filling gaps and sanitizing values.
    pub fn from_json(raw: &str) -> DomainResult<Self> {
        let parsed: Self = serde_json::from_str(raw)
            .map_err(|e| DomainError::validation(format!("settings document: {e}")))?;
        Ok(parsed.sanitized())
    }
}
