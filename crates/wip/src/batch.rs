use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use packhouse_core::{Aggregate, AggregateRoot, BatchCode, DomainError, Event};

/// Lifecycle status of a WIP batch.
///
/// A batch starts `Active` and becomes `Complete` once consumption drives its
/// remaining weight to (or below) the closure threshold. `Complete` is
/// terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Active,
    Complete,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Complete)
    }
}

impl core::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Sheet form, as operators see it.
        let name = match self {
            BatchStatus::Active => "ACTIVE",
            BatchStatus::Complete => "COMPLETE",
        };
        f.write_str(name)
    }
}

/// Why weight is being drawn from a batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumptionPurpose {
    Packing,
    Transfer,
}

impl core::fmt::Display for ConsumptionPurpose {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            ConsumptionPurpose::Packing => "PACKING",
            ConsumptionPurpose::Transfer => "TRANSFER",
        };
        f.write_str(name)
    }
}

/// Strict snapshot of a batch in its persistence shape.
///
/// This is the only form the domain reads or writes; loosely-typed rows are
/// mapped into it at the boundary before the ledger ever sees them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub code: BatchCode,
    pub product_type: String,
    pub seed_type: String,
    pub size: String,
    pub variant: Option<String>,
    /// Kilograms put into the batch at creation. Immutable afterwards.
    pub initial_weight: f64,
    /// Kilograms drawn so far. Monotonically non-decreasing.
    pub consumed_weight: f64,
    pub status: BatchStatus,
    pub production_date: NaiveDate,
}

/// Aggregate root: WipBatch.
///
/// Holds one work-in-progress seed lot from intake until consumption closes
/// it. Created once, consumed by packing/transfer draws, never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct WipBatch {
    code: BatchCode,
    product_type: String,
    seed_type: String,
    size: String,
    variant: Option<String>,
    initial_weight: f64,
    consumed_weight: f64,
    status: BatchStatus,
    production_date: NaiveDate,
    version: u64,
    created: bool,
}

impl WipBatch {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(code: BatchCode) -> Self {
        Self {
            code,
            product_type: String::new(),
            seed_type: String::new(),
            size: String::new(),
            variant: None,
            initial_weight: 0.0,
            consumed_weight: 0.0,
            status: BatchStatus::Active,
            production_date: NaiveDate::default(),
            version: 0,
            created: false,
        }
    }

    /// Rebuild an aggregate from a stored record.
    ///
    /// Malformed numbers are neutralized rather than rejected: negative or
    /// non-finite weights become zero, blank variants become "no variant".
    /// Historical rows keep loading even when someone has mangled a cell.
    pub fn from_record(record: BatchRecord) -> Self {
        Self {
            code: record.code,
            product_type: record.product_type.trim().to_owned(),
            seed_type: record.seed_type.trim().to_owned(),
            size: record.size.trim().to_owned(),
            variant: normalize_variant(record.variant),
            initial_weight: sanitize_weight(record.initial_weight),
            consumed_weight: sanitize_weight(record.consumed_weight),
            status: record.status,
            production_date: record.production_date,
            version: 0,
            created: true,
        }
    }

    /// Snapshot of the current state in the persistence shape.
    pub fn record(&self) -> BatchRecord {
        BatchRecord {
            code: self.code.clone(),
            product_type: self.product_type.clone(),
            seed_type: self.seed_type.clone(),
            size: self.size.clone(),
            variant: self.variant.clone(),
            initial_weight: self.initial_weight,
            consumed_weight: self.consumed_weight,
            status: self.status,
            production_date: self.production_date,
        }
    }

    pub fn code(&self) -> &BatchCode {
        &self.code
    }

    pub fn product_type(&self) -> &str {
        &self.product_type
    }

    pub fn seed_type(&self) -> &str {
        &self.seed_type
    }

    pub fn size(&self) -> &str {
        &self.size
    }

    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    pub fn initial_weight(&self) -> f64 {
        self.initial_weight
    }

    pub fn consumed_weight(&self) -> f64 {
        self.consumed_weight
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn production_date(&self) -> NaiveDate {
        self.production_date
    }

    /// Kilograms still available: `max(0, initial - consumed)`.
    ///
    /// Clamped so accumulated float drift can never report negative stock.
    pub fn remaining_weight(&self) -> f64 {
        (self.initial_weight - self.consumed_weight).max(0.0)
    }

    /// Whether remaining stock sits at or below the closure threshold.
    pub fn should_close(&self, closure_threshold: f64) -> bool {
        self.remaining_weight() <= closure_threshold
    }
}

fn sanitize_weight(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn normalize_variant(variant: Option<String>) -> Option<String> {
    variant.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    })
}

impl AggregateRoot for WipBatch {
    type Id = BatchCode;

    fn id(&self) -> &Self::Id {
        &self.code
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateBatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBatch {
    pub code: BatchCode,
    pub product_type: String,
    pub seed_type: String,
    pub size: String,
    pub variant: Option<String>,
    pub initial_weight: f64,
    pub production_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConsumeWeight.
///
/// Carries the closure threshold so the decision logic stays pure; the caller
/// that owns the settings fills it in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumeWeight {
    pub code: BatchCode,
    /// Kilograms to draw.
    pub weight: f64,
    pub purpose: ConsumptionPurpose,
    /// Code of the packing/transfer document this draw feeds, if any.
    pub reference: Option<BatchCode>,
    /// Remaining weight at or below this closes the batch.
    pub closure_threshold: f64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchCommand {
    CreateBatch(CreateBatch),
    ConsumeWeight(ConsumeWeight),
}

/// Event: BatchCreated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCreated {
    pub code: BatchCode,
    pub product_type: String,
    pub seed_type: String,
    pub size: String,
    pub variant: Option<String>,
    pub initial_weight: f64,
    pub production_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Event: WeightConsumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightConsumed {
    pub code: BatchCode,
    pub weight: f64,
    pub remaining_after: f64,
    pub purpose: ConsumptionPurpose,
    pub reference: Option<BatchCode>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BatchClosed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchClosed {
    pub code: BatchCode,
    /// Residual weight written off when the batch closed.
    pub remaining_weight: f64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchEvent {
    BatchCreated(BatchCreated),
    WeightConsumed(WeightConsumed),
    BatchClosed(BatchClosed),
}

impl BatchEvent {
    /// Code of the batch this event belongs to.
    pub fn code(&self) -> &BatchCode {
        match self {
            BatchEvent::BatchCreated(e) => &e.code,
            BatchEvent::WeightConsumed(e) => &e.code,
            BatchEvent::BatchClosed(e) => &e.code,
        }
    }
}

impl Event for BatchEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BatchEvent::BatchCreated(_) => "wip.batch.created",
            BatchEvent::WeightConsumed(_) => "wip.batch.weight_consumed",
            BatchEvent::BatchClosed(_) => "wip.batch.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BatchEvent::BatchCreated(e) => e.occurred_at,
            BatchEvent::WeightConsumed(e) => e.occurred_at,
            BatchEvent::BatchClosed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for WipBatch {
    type Command = BatchCommand;
    type Event = BatchEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BatchEvent::BatchCreated(e) => {
                self.code = e.code.clone();
                self.product_type = e.product_type.clone();
                self.seed_type = e.seed_type.clone();
                self.size = e.size.clone();
                self.variant = e.variant.clone();
                self.initial_weight = e.initial_weight;
                self.consumed_weight = 0.0;
                self.status = BatchStatus::Active;
                self.production_date = e.production_date;
                self.created = true;
            }
            BatchEvent::WeightConsumed(e) => {
                self.consumed_weight += e.weight;
            }
            BatchEvent::BatchClosed(_) => {
                self.status = BatchStatus::Complete;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BatchCommand::CreateBatch(cmd) => self.handle_create(cmd),
            BatchCommand::ConsumeWeight(cmd) => self.handle_consume(cmd),
        }
    }
}

impl WipBatch {
    fn ensure_code(&self, code: &BatchCode) -> Result<(), DomainError> {
        if self.code != *code {
            return Err(DomainError::invariant("batch code mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateBatch) -> Result<Vec<BatchEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("batch already exists"));
        }
        self.ensure_code(&cmd.code)?;
        if cmd.product_type.trim().is_empty() {
            return Err(DomainError::validation("product type cannot be empty"));
        }
        if cmd.seed_type.trim().is_empty() {
            return Err(DomainError::validation("seed type cannot be empty"));
        }
        if cmd.size.trim().is_empty() {
            return Err(DomainError::validation("size cannot be empty"));
        }
        if !cmd.initial_weight.is_finite() || cmd.initial_weight < 0.0 {
            return Err(DomainError::validation(
                "initial weight must be a non-negative number",
            ));
        }

        Ok(vec![BatchEvent::BatchCreated(BatchCreated {
            code: cmd.code.clone(),
            product_type: cmd.product_type.trim().to_owned(),
            seed_type: cmd.seed_type.trim().to_owned(),
            size: cmd.size.trim().to_owned(),
            variant: normalize_variant(cmd.variant.clone()),
            initial_weight: cmd.initial_weight,
            production_date: cmd.production_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_consume(&self, cmd: &ConsumeWeight) -> Result<Vec<BatchEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_code(&cmd.code)?;
        if self.status.is_terminal() {
            return Err(DomainError::invariant(
                "cannot consume from a complete batch",
            ));
        }
        if !cmd.weight.is_finite() || cmd.weight <= 0.0 {
            return Err(DomainError::validation("consumed weight must be positive"));
        }
        if !cmd.closure_threshold.is_finite() || cmd.closure_threshold < 0.0 {
            return Err(DomainError::validation(
                "closure threshold must be a non-negative number",
            ));
        }

        let remaining = self.remaining_weight();
        if cmd.weight > remaining + cmd.closure_threshold {
            return Err(DomainError::invariant(
                "consumption exceeds remaining weight",
            ));
        }

        let remaining_after = (remaining - cmd.weight).max(0.0);
        let mut events = vec![BatchEvent::WeightConsumed(WeightConsumed {
            code: cmd.code.clone(),
            weight: cmd.weight,
            remaining_after,
            purpose: cmd.purpose,
            reference: cmd.reference.clone(),
            occurred_at: cmd.occurred_at,
        })];

        if remaining_after <= cmd.closure_threshold {
            events.push(BatchEvent::BatchClosed(BatchClosed {
                code: cmd.code.clone(),
                remaining_weight: remaining_after,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }
}
