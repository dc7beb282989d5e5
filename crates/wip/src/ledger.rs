use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use packhouse_core::{Aggregate, BatchCode, DateKey, DomainError, DomainResult};

use crate::batch::{
    BatchCommand, BatchEvent, BatchRecord, BatchStatus, ConsumeWeight, ConsumptionPurpose,
    WipBatch,
};
use crate::settings::PackhouseSettings;

/// Matching dimensions for batch selection.
///
/// `None` and `""` both mean "no variant" and match each other; a named
/// variant matches only itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchKey {
    pub seed_type: String,
    pub size: String,
    pub variant: Option<String>,
}

impl BatchKey {
    pub fn new(
        seed_type: impl Into<String>,
        size: impl Into<String>,
        variant: Option<String>,
    ) -> Self {
        Self {
            seed_type: seed_type.into().trim().to_owned(),
            size: size.into().trim().to_owned(),
            variant,
        }
    }

    fn variant_name(&self) -> &str {
        self.variant.as_deref().map(str::trim).unwrap_or("")
    }

    /// Whether a batch carries exactly these dimensions.
    pub fn matches(&self, batch: &WipBatch) -> bool {
        batch.seed_type() == self.seed_type.trim()
            && batch.size() == self.size.trim()
            && batch.variant().unwrap_or("") == self.variant_name()
    }
}

/// A request to draw weight from matching batches, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionRequest {
    pub key: BatchKey,
    /// Kilograms required. Negative or non-finite values are treated as zero.
    pub weight: f64,
    pub purpose: ConsumptionPurpose,
    /// Code of the packing/transfer document driving the draw, if any.
    pub reference: Option<BatchCode>,
}

/// One planned draw against a single batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConsumption {
    pub code: BatchCode,
    /// Kilograms to draw from this batch.
    pub consumed: f64,
    /// Kilograms left in the batch after the draw.
    pub remaining_after: f64,
    /// Whether the draw leaves the batch at or below the closure threshold.
    pub closes: bool,
}

/// A FIFO consumption plan: which batches to draw from and how much.
///
/// Building a plan never fails and never mutates the pool. Insufficient
/// supply is reported in `short_by` for the caller's policy, not raised as an
/// error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionPlan {
    pub key: BatchKey,
    pub purpose: ConsumptionPurpose,
    pub reference: Option<BatchCode>,
    /// Kilograms originally asked for (malformed input clamped to zero).
    pub required_weight: f64,
    pub consumptions: Vec<BatchConsumption>,
    /// Kilograms the pool could not supply; zero when fully satisfied.
    pub short_by: f64,
}

impl ConsumptionPlan {
    /// Walk `candidates` in the given order, drawing `min(remaining,
    /// outstanding)` from each batch until the requirement is satisfied or the
    /// candidates run out.
    ///
    /// A residual requirement at or below the closure threshold counts as
    /// fully satisfied, so float dust never produces a phantom shortfall.
    pub fn build<'a, I>(
        candidates: I,
        request: &ConsumptionRequest,
        closure_threshold: f64,
    ) -> Self
    where
        I: IntoIterator<Item = &'a WipBatch>,
    {
        let required = if request.weight.is_finite() && request.weight > 0.0 {
            request.weight
        } else {
            0.0
        };

        let mut outstanding = required;
        let mut consumptions = Vec::new();
        for batch in candidates {
            if outstanding <= closure_threshold {
                break;
            }
            let remaining = batch.remaining_weight();
            if remaining <= closure_threshold {
                continue;
            }

            let consumed = remaining.min(outstanding);
            let remaining_after = remaining - consumed;
            consumptions.push(BatchConsumption {
                code: batch.code().clone(),
                consumed,
                remaining_after,
                closes: remaining_after <= closure_threshold,
            });
            outstanding -= consumed;
        }

        let short_by = if outstanding <= closure_threshold {
            0.0
        } else {
            outstanding
        };

        Self {
            key: request.key.clone(),
            purpose: request.purpose,
            reference: request.reference.clone(),
            required_weight: required,
            consumptions,
            short_by,
        }
    }

    /// Whether the full requirement can be drawn from the pool.
    pub fn fully_consumed(&self) -> bool {
        self.short_by == 0.0
    }

    /// Total kilograms the plan draws across all batches.
    pub fn total_drawn(&self) -> f64 {
        self.consumptions.iter().map(|c| c.consumed).sum()
    }
}

/// Grouped stock totals for one seed/size/variant combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockSummary {
    pub seed_type: String,
    pub size: String,
    pub variant: Option<String>,
    pub batches: usize,
    pub active_batches: usize,
    pub initial_weight: f64,
    pub consumed_weight: f64,
    pub remaining_weight: f64,
}

impl StockSummary {
    /// Percentage of the intake weight already consumed.
    pub fn percent_consumed(&self) -> f64 {
        if self.initial_weight > 0.0 {
            self.consumed_weight / self.initial_weight * 100.0
        } else {
            0.0
        }
    }
}

/// In-memory pool of WIP batches with FIFO selection and consumption.
///
/// The ledger is a derived view: load it from stored records (or rebuild it
/// from events), plan and commit consumption, then persist the updated
/// records. Concurrency control around the backing store belongs to the
/// caller.
#[derive(Debug, Clone)]
pub struct BatchLedger {
    settings: PackhouseSettings,
    batches: BTreeMap<BatchCode, WipBatch>,
}

impl BatchLedger {
    pub fn new(settings: PackhouseSettings) -> Self {
        Self {
            settings: settings.sanitized(),
            batches: BTreeMap::new(),
        }
    }

    /// Bulk load from stored records.
    ///
    /// Duplicate codes keep the first record and log the rest, mirroring how
    /// duplicated rows behave upstream.
    pub fn from_records<I>(settings: PackhouseSettings, records: I) -> Self
    where
        I: IntoIterator<Item = BatchRecord>,
    {
        let mut ledger = Self::new(settings);
        for record in records {
            let batch = WipBatch::from_record(record);
            if ledger.batches.contains_key(batch.code()) {
                tracing::warn!(code = %batch.code(), "skipping duplicate batch record");
                continue;
            }
            ledger.batches.insert(batch.code().clone(), batch);
        }
        ledger
    }

    /// Rebuild a ledger by replaying batch events in order.
    pub fn rehydrate<I>(settings: PackhouseSettings, events: I) -> DomainResult<Self>
    where
        I: IntoIterator<Item = BatchEvent>,
    {
        let mut ledger = Self::new(settings);
        for event in events {
            let code = event.code().clone();
            match &event {
                BatchEvent::BatchCreated(_) => {
                    if ledger.batches.contains_key(&code) {
                        return Err(DomainError::conflict(format!(
                            "batch {code} created twice in the event stream"
                        )));
                    }
                    let mut batch = WipBatch::empty(code.clone());
                    batch.apply(&event);
                    ledger.batches.insert(code, batch);
                }
                _ => {
                    let batch = ledger
                        .batches
                        .get_mut(&code)
                        .ok_or_else(DomainError::not_found)?;
                    batch.apply(&event);
                }
            }
        }
        Ok(ledger)
    }

    /// Add a batch to the pool. Duplicate codes are a conflict.
    pub fn insert(&mut self, batch: WipBatch) -> DomainResult<()> {
        if self.batches.contains_key(batch.code()) {
            return Err(DomainError::conflict(format!(
                "batch {} already exists",
                batch.code()
            )));
        }
        self.batches.insert(batch.code().clone(), batch);
        Ok(())
    }

    pub fn settings(&self) -> &PackhouseSettings {
        &self.settings
    }

    pub fn get(&self, code: &BatchCode) -> Option<&WipBatch> {
        self.batches.get(code)
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WipBatch> {
        self.batches.values()
    }

    /// Snapshot every batch in its persistence shape, in code order.
    pub fn records(&self) -> Vec<BatchRecord> {
        self.batches.values().map(WipBatch::record).collect()
    }

    /// Open batches with usable stock matching `key`, oldest first.
    ///
    /// Ordered by production date with the code as a deterministic tie-break;
    /// the ordering of the backing store never matters.
    pub fn eligible(&self, key: &BatchKey) -> Vec<&WipBatch> {
        let mut matches: Vec<&WipBatch> = self
            .batches
            .values()
            .filter(|batch| batch.status() == BatchStatus::Active)
            .filter(|batch| batch.remaining_weight() > self.settings.closure_threshold)
            .filter(|batch| key.matches(batch))
            .collect();
        matches.sort_by_key(|batch| batch.production_date());
        matches
    }

    /// Oldest eligible batch for `key`, or `None` when nothing matches.
    pub fn select_fifo(&self, key: &BatchKey) -> Option<&WipBatch> {
        self.eligible(key).into_iter().next()
    }

    /// Total usable kilograms across eligible batches for `key`.
    pub fn remaining_for(&self, key: &BatchKey) -> f64 {
        self.eligible(key)
            .iter()
            .map(|batch| batch.remaining_weight())
            .sum()
    }

    /// Build a FIFO consumption plan for `request` without touching state.
    pub fn plan(&self, request: &ConsumptionRequest) -> ConsumptionPlan {
        let plan = ConsumptionPlan::build(
            self.eligible(&request.key),
            request,
            self.settings.closure_threshold,
        );
        if !plan.fully_consumed() {
            tracing::debug!(
                seed_type = %request.key.seed_type,
                size = %request.key.size,
                short_by = plan.short_by,
                "consumption plan is short of stock"
            );
        }
        plan
    }

    /// Apply a plan to the pool, returning the batch events for persistence.
    ///
    /// Commit is all-or-nothing: draws run against staged copies of the
    /// touched batches and the pool adopts them only once every draw has gone
    /// through, so a failing commit leaves every batch as it was. A plan
    /// built from a pool that has since changed, or one that asks more of a
    /// batch than it holds, fails with a conflict.
    pub fn commit(
        &mut self,
        plan: &ConsumptionPlan,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Vec<BatchEvent>> {
        let threshold = self.settings.closure_threshold;

        // Each staged copy carries the running state of its batch, so a plan
        // listing one code twice is checked against what the earlier draw
        // left rather than against the untouched pool.
        let mut staged: BTreeMap<BatchCode, WipBatch> = BTreeMap::new();
        let mut events = Vec::new();
        for draw in &plan.consumptions {
            let batch = match staged.entry(draw.code.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let current = self
                        .batches
                        .get(&draw.code)
                        .ok_or_else(DomainError::not_found)?;
                    entry.insert(current.clone())
                }
            };
            if batch.status().is_terminal() {
                return Err(DomainError::conflict(format!(
                    "plan is stale: batch {} is already complete",
                    draw.code
                )));
            }
            if draw.consumed > batch.remaining_weight() + threshold {
                return Err(DomainError::conflict(format!(
                    "plan is stale: batch {} no longer holds {} kg",
                    draw.code, draw.consumed
                )));
            }

            let command = BatchCommand::ConsumeWeight(ConsumeWeight {
                code: draw.code.clone(),
                weight: draw.consumed,
                purpose: plan.purpose,
                reference: plan.reference.clone(),
                closure_threshold: threshold,
                occurred_at,
            });
            let emitted = batch.handle(&command)?;
            for event in &emitted {
                batch.apply(event);
            }
            events.extend(emitted);
        }

        self.batches.extend(staged);
        Ok(events)
    }

    /// Next code under `prefix` and `date_key`, one past the pool's highest
    /// matching sequence. Saturates at `u32::MAX` rather than rolling over.
    pub fn next_code(&self, prefix: &str, date_key: &DateKey) -> DomainResult<BatchCode> {
        let next = self
            .batches
            .keys()
            .filter(|code| code.prefix() == prefix && code.date_key() == date_key)
            .map(BatchCode::sequence)
            .max()
            .map_or(1, |highest| highest.saturating_add(1));
        BatchCode::new(prefix, date_key.clone(), next)
    }

    /// Stock totals grouped by seed type, size and variant, in group order.
    pub fn summary(&self) -> Vec<StockSummary> {
        let mut groups: BTreeMap<(String, String, String), StockSummary> = BTreeMap::new();
        for batch in self.batches.values() {
            let group_key = (
                batch.seed_type().to_owned(),
                batch.size().to_owned(),
                batch.variant().unwrap_or("").to_owned(),
            );
            let entry = groups.entry(group_key).or_insert_with(|| StockSummary {
                seed_type: batch.seed_type().to_owned(),
                size: batch.size().to_owned(),
                variant: batch.variant().map(str::to_owned),
                batches: 0,
                active_batches: 0,
                initial_weight: 0.0,
                consumed_weight: 0.0,
                remaining_weight: 0.0,
            });
            entry.batches += 1;
            if batch.status() == BatchStatus::Active {
                entry.active_batches += 1;
            }
            entry.initial_weight += batch.initial_weight();
            entry.consumed_weight += batch.consumed_weight();
            entry.remaining_weight += batch.remaining_weight();
        }
        groups.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use packhouse_core::Event;
    use proptest::prelude::*;

    use super::*;
    use crate::batch::{BatchClosed, BatchCreated, CreateBatch, WeightConsumed};

    fn code(s: &str) -> BatchCode {
        BatchCode::parse(s).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2015, 6, d).unwrap()
    }

    fn beetroot_key() -> BatchKey {
        BatchKey::new("Beetroot", "Medium", None)
    }

    fn batch(code_str: &str, produced: u32, initial: f64, consumed: f64) -> WipBatch {
        batch_with(code_str, produced, initial, consumed, "Beetroot", "Medium", None)
    }

    fn batch_with(
        code_str: &str,
        produced: u32,
        initial: f64,
        consumed: f64,
        seed_type: &str,
        size: &str,
        variant: Option<&str>,
    ) -> WipBatch {
        WipBatch::from_record(BatchRecord {
            code: code(code_str),
            product_type: "BT6".to_string(),
            seed_type: seed_type.to_string(),
            size: size.to_string(),
            variant: variant.map(str::to_string),
            initial_weight: initial,
            consumed_weight: consumed,
            status: BatchStatus::Active,
            production_date: day(produced),
        })
    }

    fn ledger_of(batches: Vec<WipBatch>) -> BatchLedger {
        let mut ledger = BatchLedger::new(PackhouseSettings::default());
        for b in batches {
            ledger.insert(b).unwrap();
        }
        ledger
    }

    fn request(weight: f64) -> ConsumptionRequest {
        ConsumptionRequest {
            key: beetroot_key(),
            weight,
            purpose: ConsumptionPurpose::Packing,
            reference: None,
        }
    }

    fn complete(mut batch: WipBatch) -> WipBatch {
        let events = vec![BatchEvent::BatchClosed(BatchClosed {
            code: batch.code().clone(),
            remaining_weight: batch.remaining_weight(),
            occurred_at: Utc::now(),
        })];
        for event in &events {
            batch.apply(event);
        }
        batch
    }

    #[test]
    fn fifo_prefers_the_oldest_matching_batch() {
        let ledger = ledger_of(vec![
            batch("BT6-150612-001", 12, 40.0, 0.0),
            batch("BT6-150610-001", 10, 40.0, 0.0),
            batch("BT6-150614-001", 14, 40.0, 0.0),
        ]);

        let selected = ledger.select_fifo(&beetroot_key()).unwrap();
        assert_eq!(selected.code(), &code("BT6-150610-001"));
    }

    #[test]
    fn fifo_tie_breaks_by_code_order() {
        let ledger = ledger_of(vec![
            batch("BT6-150610-002", 10, 40.0, 0.0),
            batch("BT6-150610-001", 10, 40.0, 0.0),
        ]);

        let selected = ledger.select_fifo(&beetroot_key()).unwrap();
        assert_eq!(selected.code(), &code("BT6-150610-001"));
    }

    #[test]
    fn selection_skips_complete_and_exhausted_batches() {
        let ledger = ledger_of(vec![
            complete(batch("BT6-150608-001", 8, 40.0, 0.0)),
            // Remaining 0.0005 kg sits below the closure threshold.
            batch("BT6-150609-001", 9, 40.0, 39.9995),
            batch("BT6-150612-001", 12, 40.0, 0.0),
        ]);

        let selected = ledger.select_fifo(&beetroot_key()).unwrap();
        assert_eq!(selected.code(), &code("BT6-150612-001"));
    }

    #[test]
    fn selection_matches_dimensions_exactly() {
        let ledger = ledger_of(vec![
            batch_with("BT6-150610-001", 10, 40.0, 0.0, "Carrot", "Medium", None),
            batch_with("BT6-150610-002", 10, 40.0, 0.0, "Beetroot", "Large", None),
            batch_with("BT6-150610-003", 10, 40.0, 0.0, "Beetroot", "Medium", Some("Coated")),
            batch_with("BT6-150611-001", 11, 40.0, 0.0, "Beetroot", "Medium", None),
        ]);

        let selected = ledger.select_fifo(&beetroot_key()).unwrap();
        assert_eq!(selected.code(), &code("BT6-150611-001"));

        let coated = BatchKey::new("Beetroot", "Medium", Some("Coated".to_string()));
        let selected = ledger.select_fifo(&coated).unwrap();
        assert_eq!(selected.code(), &code("BT6-150610-003"));
    }

    #[test]
    fn empty_string_variant_means_no_variant() {
        let ledger = ledger_of(vec![batch("BT6-150610-001", 10, 40.0, 0.0)]);

        let blank = BatchKey::new("Beetroot", "Medium", Some("".to_string()));
        assert!(ledger.select_fifo(&blank).is_some());
    }

    #[test]
    fn select_fifo_returns_none_when_nothing_matches() {
        let ledger = ledger_of(vec![batch("BT6-150610-001", 10, 40.0, 0.0)]);
        let key = BatchKey::new("Parsnip", "Medium", None);
        assert!(ledger.select_fifo(&key).is_none());
    }

    #[test]
    fn plan_spreads_across_batches_oldest_first() {
        let ledger = ledger_of(vec![
            batch("BT6-150610-001", 10, 50.0, 0.0),
            batch("BT6-150612-001", 12, 30.0, 0.0),
        ]);

        let plan = ledger.plan(&request(70.0));

        assert_eq!(plan.consumptions.len(), 2);
        assert_eq!(plan.consumptions[0].code, code("BT6-150610-001"));
        assert_eq!(plan.consumptions[0].consumed, 50.0);
        assert_eq!(plan.consumptions[0].remaining_after, 0.0);
        assert!(plan.consumptions[0].closes);
        assert_eq!(plan.consumptions[1].code, code("BT6-150612-001"));
        assert_eq!(plan.consumptions[1].consumed, 20.0);
        assert_eq!(plan.consumptions[1].remaining_after, 10.0);
        assert!(!plan.consumptions[1].closes);
        assert_eq!(plan.short_by, 0.0);
        assert!(plan.fully_consumed());
        assert_eq!(plan.total_drawn(), 70.0);
    }

    #[test]
    fn plan_reports_shortfall_after_draining_the_pool() {
        let ledger = ledger_of(vec![
            batch("BT6-150610-001", 10, 50.0, 0.0),
            batch("BT6-150612-001", 12, 20.0, 0.0),
        ]);

        let plan = ledger.plan(&request(150.0));

        assert_eq!(plan.consumptions.len(), 2);
        assert_eq!(plan.total_drawn(), 70.0);
        assert_eq!(plan.short_by, 80.0);
        assert!(!plan.fully_consumed());
        assert!(plan.consumptions.iter().all(|c| c.closes));
    }

    #[test]
    fn plan_for_zero_weight_is_a_valid_noop() {
        let ledger = ledger_of(vec![batch("BT6-150610-001", 10, 50.0, 0.0)]);

        for weight in [0.0, -5.0, f64::NAN] {
            let plan = ledger.plan(&request(weight));
            assert!(plan.consumptions.is_empty());
            assert_eq!(plan.short_by, 0.0);
            assert!(plan.fully_consumed());
            assert_eq!(plan.required_weight, 0.0);
        }
    }

    #[test]
    fn residual_dust_counts_as_fully_satisfied() {
        let ledger = ledger_of(vec![
            batch("BT6-150610-001", 10, 50.0, 0.0),
            batch("BT6-150612-001", 12, 20.0, 0.0),
        ]);

        // Half a gram over the supply, within the closure threshold.
        let plan = ledger.plan(&request(70.0005));

        assert_eq!(plan.consumptions.len(), 2);
        assert_eq!(plan.short_by, 0.0);
        assert!(plan.fully_consumed());
    }

    #[test]
    fn plan_does_not_mutate_the_pool() {
        let ledger = ledger_of(vec![
            batch("BT6-150610-001", 10, 50.0, 0.0),
            batch("BT6-150612-001", 12, 30.0, 0.0),
        ]);
        let before = ledger.records();

        let _ = ledger.plan(&request(70.0));

        assert_eq!(ledger.records(), before);
    }

    #[test]
    fn commit_applies_draws_and_closes_exhausted_batches() {
        let mut ledger = ledger_of(vec![
            batch("BT6-150610-001", 10, 50.0, 0.0),
            batch("BT6-150612-001", 12, 30.0, 0.0),
        ]);

        let plan = ledger.plan(&request(70.0));
        let events = ledger.commit(&plan, Utc::now()).unwrap();

        let types: Vec<&str> = events.iter().map(Event::event_type).collect();
        assert_eq!(
            types,
            vec![
                "wip.batch.weight_consumed",
                "wip.batch.closed",
                "wip.batch.weight_consumed",
            ]
        );

        let first = ledger.get(&code("BT6-150610-001")).unwrap();
        assert_eq!(first.status(), BatchStatus::Complete);
        assert_eq!(first.remaining_weight(), 0.0);

        let second = ledger.get(&code("BT6-150612-001")).unwrap();
        assert_eq!(second.status(), BatchStatus::Active);
        assert_eq!(second.remaining_weight(), 10.0);
    }

    #[test]
    fn commit_carries_purpose_and_reference_into_events() {
        let mut ledger = ledger_of(vec![batch("BT6-150610-001", 10, 50.0, 0.0)]);
        let reference = code("PK6-100615-001");

        let req = ConsumptionRequest {
            key: beetroot_key(),
            weight: 10.0,
            purpose: ConsumptionPurpose::Transfer,
            reference: Some(reference.clone()),
        };
        let plan = ledger.plan(&req);
        let events = ledger.commit(&plan, Utc::now()).unwrap();

        match &events[0] {
            BatchEvent::WeightConsumed(e) => {
                assert_eq!(e.purpose, ConsumptionPurpose::Transfer);
                assert_eq!(e.reference.as_ref(), Some(&reference));
            }
            other => panic!("Expected WeightConsumed, got {other:?}"),
        }
    }

    #[test]
    fn committing_a_stale_plan_is_a_conflict() {
        let mut ledger = ledger_of(vec![
            batch("BT6-150610-001", 10, 50.0, 0.0),
            batch("BT6-150612-001", 12, 30.0, 0.0),
        ]);

        let plan = ledger.plan(&request(70.0));
        ledger.commit(&plan, Utc::now()).unwrap();

        let err = ledger.commit(&plan, Utc::now()).unwrap_err();
        match err {
            DomainError::Conflict(msg) if msg.contains("stale") => {}
            other => panic!("Expected stale-plan conflict, got {other:?}"),
        }

        // The failed commit must not have drawn anything extra.
        let second = ledger.get(&code("BT6-150612-001")).unwrap();
        assert_eq!(second.remaining_weight(), 10.0);
    }

    #[test]
    fn commit_rejects_draws_that_jointly_overdraw_one_batch() {
        let mut ledger = ledger_of(vec![batch("BT6-150610-001", 10, 50.0, 0.0)]);

        // Hand-built plan whose two draws each fit the batch on their own
        // but whose sum does not.
        let draw = BatchConsumption {
            code: code("BT6-150610-001"),
            consumed: 30.0,
            remaining_after: 20.0,
            closes: false,
        };
        let plan = ConsumptionPlan {
            key: beetroot_key(),
            purpose: ConsumptionPurpose::Packing,
            reference: None,
            required_weight: 60.0,
            consumptions: vec![draw.clone(), draw],
            short_by: 0.0,
        };

        let err = ledger.commit(&plan, Utc::now()).unwrap_err();
        match err {
            DomainError::Conflict(_) => {}
            other => panic!("Expected conflict, got {other:?}"),
        }

        let batch = ledger.get(&code("BT6-150610-001")).unwrap();
        assert_eq!(batch.remaining_weight(), 50.0);
        assert_eq!(batch.status(), BatchStatus::Active);
    }

    #[test]
    fn commit_accepts_split_draws_on_one_batch_within_stock() {
        let mut ledger = ledger_of(vec![batch("BT6-150610-001", 10, 50.0, 0.0)]);

        let plan = ConsumptionPlan {
            key: beetroot_key(),
            purpose: ConsumptionPurpose::Packing,
            reference: None,
            required_weight: 40.0,
            consumptions: vec![
                BatchConsumption {
                    code: code("BT6-150610-001"),
                    consumed: 25.0,
                    remaining_after: 25.0,
                    closes: false,
                },
                BatchConsumption {
                    code: code("BT6-150610-001"),
                    consumed: 15.0,
                    remaining_after: 10.0,
                    closes: false,
                },
            ],
            short_by: 0.0,
        };

        let events = ledger.commit(&plan, Utc::now()).unwrap();
        assert_eq!(events.len(), 2);

        let batch = ledger.get(&code("BT6-150610-001")).unwrap();
        assert_eq!(batch.remaining_weight(), 10.0);
        assert_eq!(batch.status(), BatchStatus::Active);
    }

    #[test]
    fn failed_commit_leaves_the_pool_untouched() {
        let mut ledger = ledger_of(vec![
            batch("BT6-150610-001", 10, 50.0, 0.0),
            batch("BT6-150612-001", 12, 30.0, 0.0),
        ]);
        let before = ledger.records();

        // The first draw is fine on its own; the second names a batch the
        // pool does not hold.
        let plan = ConsumptionPlan {
            key: beetroot_key(),
            purpose: ConsumptionPurpose::Packing,
            reference: None,
            required_weight: 60.0,
            consumptions: vec![
                BatchConsumption {
                    code: code("BT6-150610-001"),
                    consumed: 40.0,
                    remaining_after: 10.0,
                    closes: false,
                },
                BatchConsumption {
                    code: code("BT6-150620-001"),
                    consumed: 20.0,
                    remaining_after: 0.0,
                    closes: true,
                },
            ],
            short_by: 0.0,
        };

        let err = ledger.commit(&plan, Utc::now()).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
        assert_eq!(ledger.records(), before);
    }

    #[test]
    fn insert_rejects_duplicate_codes() {
        let mut ledger = ledger_of(vec![batch("BT6-150610-001", 10, 50.0, 0.0)]);
        let err = ledger.insert(batch("BT6-150610-001", 10, 20.0, 0.0)).unwrap_err();
        match err {
            DomainError::Conflict(msg) if msg.contains("already exists") => {}
            other => panic!("Expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn from_records_keeps_the_first_of_duplicate_codes() {
        let records = vec![
            batch("BT6-150610-001", 10, 50.0, 0.0).record(),
            batch("BT6-150610-001", 10, 99.0, 0.0).record(),
        ];

        let ledger = BatchLedger::from_records(PackhouseSettings::default(), records);
        assert_eq!(ledger.len(), 1);
        assert_eq!(
            ledger.get(&code("BT6-150610-001")).unwrap().initial_weight(),
            50.0
        );
    }

    #[test]
    fn next_code_scans_the_pool() {
        let key = DateKey::new("150615").unwrap();
        let ledger = ledger_of(vec![
            batch("BT6-150615-001", 15, 50.0, 0.0),
            batch("BT6-150615-005", 15, 50.0, 0.0),
            batch("ER-150615-002", 15, 50.0, 0.0),
        ]);

        let next = ledger.next_code("BT6", &key).unwrap();
        assert_eq!(next.to_string(), "BT6-150615-006");

        let empty = BatchLedger::new(PackhouseSettings::default());
        let first = empty.next_code("BT6", &key).unwrap();
        assert_eq!(first.to_string(), "BT6-150615-001");
    }

    #[test]
    fn next_code_saturates_instead_of_overflowing() {
        let key = DateKey::new("150615").unwrap();
        let ledger = ledger_of(vec![batch("BT6-150615-4294967295", 15, 50.0, 0.0)]);

        let next = ledger.next_code("BT6", &key).unwrap();
        assert_eq!(next.sequence(), u32::MAX);
    }

    #[test]
    fn summary_groups_by_dimensions() {
        let ledger = ledger_of(vec![
            batch("BT6-150610-001", 10, 50.0, 20.0),
            batch("BT6-150612-001", 12, 30.0, 0.0),
            batch_with("CR4-150610-001", 10, 80.0, 0.0, "Carrot", "Small", None),
        ]);

        let summary = ledger.summary();
        assert_eq!(summary.len(), 2);

        let beetroot = &summary[0];
        assert_eq!(beetroot.seed_type, "Beetroot");
        assert_eq!(beetroot.batches, 2);
        assert_eq!(beetroot.active_batches, 2);
        assert_eq!(beetroot.initial_weight, 80.0);
        assert_eq!(beetroot.consumed_weight, 20.0);
        assert_eq!(beetroot.remaining_weight, 60.0);
        assert_eq!(beetroot.percent_consumed(), 25.0);

        assert_eq!(summary[1].seed_type, "Carrot");
    }

    #[test]
    fn remaining_for_sums_only_eligible_stock() {
        let ledger = ledger_of(vec![
            batch("BT6-150610-001", 10, 50.0, 20.0),
            complete(batch("BT6-150611-001", 11, 100.0, 0.0)),
            batch("BT6-150612-001", 12, 30.0, 0.0),
        ]);

        assert_eq!(ledger.remaining_for(&beetroot_key()), 60.0);
    }

    #[test]
    fn rehydrate_replays_the_event_stream() {
        let created_at = Utc::now();
        let events = vec![
            BatchEvent::BatchCreated(BatchCreated {
                code: code("BT6-150610-001"),
                product_type: "BT6".to_string(),
                seed_type: "Beetroot".to_string(),
                size: "Medium".to_string(),
                variant: None,
                initial_weight: 50.0,
                production_date: day(10),
                occurred_at: created_at,
            }),
            BatchEvent::WeightConsumed(WeightConsumed {
                code: code("BT6-150610-001"),
                weight: 20.0,
                remaining_after: 30.0,
                purpose: ConsumptionPurpose::Packing,
                reference: None,
                occurred_at: created_at,
            }),
        ];

        let ledger = BatchLedger::rehydrate(PackhouseSettings::default(), events).unwrap();
        let batch = ledger.get(&code("BT6-150610-001")).unwrap();
        assert_eq!(batch.remaining_weight(), 30.0);
        assert_eq!(batch.status(), BatchStatus::Active);
    }

    #[test]
    fn rehydrate_rejects_orphan_and_duplicate_events() {
        let orphan = vec![BatchEvent::WeightConsumed(WeightConsumed {
            code: code("BT6-150610-001"),
            weight: 20.0,
            remaining_after: 30.0,
            purpose: ConsumptionPurpose::Packing,
            reference: None,
            occurred_at: Utc::now(),
        })];
        assert_eq!(
            BatchLedger::rehydrate(PackhouseSettings::default(), orphan).unwrap_err(),
            DomainError::NotFound
        );

        let created = BatchEvent::BatchCreated(BatchCreated {
            code: code("BT6-150610-001"),
            product_type: "BT6".to_string(),
            seed_type: "Beetroot".to_string(),
            size: "Medium".to_string(),
            variant: None,
            initial_weight: 50.0,
            production_date: day(10),
            occurred_at: Utc::now(),
        });
        let err =
            BatchLedger::rehydrate(PackhouseSettings::default(), vec![created.clone(), created])
                .unwrap_err();
        match err {
            DomainError::Conflict(msg) if msg.contains("created twice") => {}
            other => panic!("Expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn ledger_and_batch_commands_agree_end_to_end() {
        let mut ledger = BatchLedger::new(PackhouseSettings::default());

        let mut batch = WipBatch::empty(code("BT6-150610-001"));
        let events = batch
            .handle(&BatchCommand::CreateBatch(CreateBatch {
                code: code("BT6-150610-001"),
                product_type: "BT6".to_string(),
                seed_type: "Beetroot".to_string(),
                size: "Medium".to_string(),
                variant: None,
                initial_weight: 50.0,
                production_date: day(10),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        for event in &events {
            batch.apply(event);
        }
        ledger.insert(batch).unwrap();

        let plan = ledger.plan(&request(50.0));
        let events = ledger.commit(&plan, Utc::now()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            ledger.get(&code("BT6-150610-001")).unwrap().status(),
            BatchStatus::Complete
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a plan draws exactly `required - short_by`, up to the
        /// closure threshold of float dust, and never over-draws a batch.
        #[test]
        fn plans_conserve_weight(
            remainings in prop::collection::vec(0.0f64..500.0, 0..10),
            required in 0.0f64..3000.0,
        ) {
            let batches: Vec<WipBatch> = remainings
                .iter()
                .enumerate()
                .map(|(i, &left)| {
                    let code_str = format!("BT6-1506{:02}-{:03}", 1 + (i % 27), i + 1);
                    batch(&code_str, 1 + (i as u32 % 27), left, 0.0)
                })
                .collect();
            let ledger = ledger_of(batches);
            let threshold = ledger.settings().closure_threshold;

            let plan = ledger.plan(&request(required));

            let drawn = plan.total_drawn();
            let residual = plan.required_weight - drawn - plan.short_by;
            prop_assert!(residual >= -1e-9);
            prop_assert!(residual <= threshold + 1e-9);

            for draw in &plan.consumptions {
                let batch = ledger.get(&draw.code).unwrap();
                prop_assert!(draw.consumed > 0.0);
                prop_assert!(draw.consumed <= batch.remaining_weight() + 1e-9);
            }

            // A shortfall means every eligible batch was fully drained.
            if plan.short_by > 0.0 {
                prop_assert_eq!(plan.consumptions.len(), ledger.eligible(&beetroot_key()).len());
                prop_assert!(plan.consumptions.iter().all(|c| c.closes));
            }
        }

        /// Property: eligibility ordering is by production date no matter how
        /// the records arrive.
        #[test]
        fn eligible_batches_are_always_date_ordered(
            days in prop::collection::vec(1u32..29, 1..10),
        ) {
            let batches: Vec<WipBatch> = days
                .iter()
                .enumerate()
                .map(|(i, &d)| {
                    let code_str = format!("BT6-1506{d:02}-{:03}", i + 1);
                    batch(&code_str, d, 40.0, 0.0)
                })
                .collect();
            let ledger = ledger_of(batches);

            let eligible = ledger.eligible(&beetroot_key());
            let dates: Vec<NaiveDate> = eligible.iter().map(|b| b.production_date()).collect();
            let mut sorted = dates.clone();
            sorted.sort();
            prop_assert_eq!(dates, sorted);
        }
    }
}
