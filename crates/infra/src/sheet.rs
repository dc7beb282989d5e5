//! Sheet row mapping: header probing, defensive cell parsing, write-back.
//!
//! Exports arrive as header → cell maps with inconsistent spellings and
//! hand-edited values. Everything gets funneled through [`batch_record`] into
//! the strict [`BatchRecord`] shape here, so the domain crates never see a
//! raw cell.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use packhouse_core::{BatchCode, Event};
use packhouse_wip::{
    BatchEvent, BatchLedger, BatchRecord, BatchStatus, ConsumptionPlan, PackhouseSettings,
};

const BATCH_ID_HEADERS: &[&str] = &["Batch ID", "Batch No", "ID"];
const PRODUCT_TYPE_HEADERS: &[&str] = &["Product Type", "Product"];
const SEED_TYPE_HEADERS: &[&str] = &["Seed Type", "Seed"];
const SIZE_HEADERS: &[&str] = &["Size", "Seed Size"];
const VARIANT_HEADERS: &[&str] = &["Variant", "Variety"];
const INITIAL_WEIGHT_HEADERS: &[&str] = &["Initial Weight", "Initial Weight (kg)", "Start Weight"];
const CONSUMED_WEIGHT_HEADERS: &[&str] =
    &["Consumed Weight", "Consumed Weight (kg)", "Used Weight"];
const STATUS_HEADERS: &[&str] = &["Status", "Batch Status"];
const PRODUCTION_DATE_HEADERS: &[&str] = &["Production Date", "Date", "Produced On"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];

/// One exported row: an ordered header → cell map.
///
/// Headers are probed case- and punctuation-insensitively, so "Batch ID",
/// "batch_id" and "BatchId" all land on the same cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SheetRow(BTreeMap<String, String>);

impl SheetRow {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn set(&mut self, header: impl Into<String>, value: impl Into<String>) {
        self.0.insert(header.into(), value.into());
    }

    /// First non-empty cell under any of the candidate headers.
    pub fn get(&self, candidates: &[&str]) -> Option<&str> {
        for candidate in candidates {
            let want = normalize_header(candidate);
            for (header, value) in &self.0 {
                if normalize_header(header) == want && !value.trim().is_empty() {
                    return Some(value.trim());
                }
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Parse a weight cell. Anything unusable (non-numeric, negative,
/// non-finite) counts as zero.
pub fn parse_weight(cell: Option<&str>) -> f64 {
    let Some(raw) = cell else {
        return 0.0;
    };
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    match cleaned.parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => value,
        _ => 0.0,
    }
}

/// Parse a status cell. Unknown spellings count as active.
pub fn parse_status(cell: Option<&str>) -> BatchStatus {
    match cell.map(str::trim) {
        Some(s)
            if s.eq_ignore_ascii_case("complete")
                || s.eq_ignore_ascii_case("completed")
                || s.eq_ignore_ascii_case("closed") =>
        {
            BatchStatus::Complete
        }
        _ => BatchStatus::Active,
    }
}

/// Parse a date cell against the formats seen in exports.
pub fn parse_date(cell: Option<&str>) -> Option<NaiveDate> {
    let raw = cell?.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Map a row into a strict record.
///
/// A row without a parseable batch code or production date is unusable and
/// returns `None` (with a warning); every other malformed cell degrades to a
/// neutral default instead.
pub fn batch_record(row: &SheetRow) -> Option<BatchRecord> {
    let raw_code = row.get(BATCH_ID_HEADERS);
    let Some(code) = raw_code.and_then(BatchCode::parse) else {
        tracing::warn!(
            cell = raw_code.unwrap_or(""),
            "skipping row without a parseable batch code"
        );
        return None;
    };
    let Some(production_date) = parse_date(row.get(PRODUCTION_DATE_HEADERS)) else {
        tracing::warn!(code = %code, "skipping row without a parseable production date");
        return None;
    };

    Some(BatchRecord {
        code,
        product_type: row.get(PRODUCT_TYPE_HEADERS).unwrap_or("").to_owned(),
        seed_type: row.get(SEED_TYPE_HEADERS).unwrap_or("").to_owned(),
        size: row.get(SIZE_HEADERS).unwrap_or("").to_owned(),
        variant: row.get(VARIANT_HEADERS).map(str::to_owned),
        initial_weight: parse_weight(row.get(INITIAL_WEIGHT_HEADERS)),
        consumed_weight: parse_weight(row.get(CONSUMED_WEIGHT_HEADERS)),
        status: parse_status(row.get(STATUS_HEADERS)),
        production_date,
    })
}

/// Canonical write-back form of a record.
pub fn record_row(record: &BatchRecord) -> SheetRow {
    let mut row = SheetRow::new();
    row.set("Batch ID", record.code.to_string());
    row.set("Product Type", record.product_type.clone());
    row.set("Seed Type", record.seed_type.clone());
    row.set("Size", record.size.clone());
    row.set("Variant", record.variant.clone().unwrap_or_default());
    row.set("Initial Weight", record.initial_weight.to_string());
    row.set("Consumed Weight", record.consumed_weight.to_string());
    row.set("Status", record.status.to_string());
    row.set(
        "Production Date",
        record.production_date.format("%Y-%m-%d").to_string(),
    );
    row
}

/// Load rows into a ledger, skipping unusable rows.
pub fn load_ledger(settings: PackhouseSettings, rows: &[SheetRow]) -> BatchLedger {
    let records: Vec<BatchRecord> = rows.iter().filter_map(batch_record).collect();
    tracing::debug!(rows = rows.len(), loaded = records.len(), "loaded batch rows");
    BatchLedger::from_records(settings, records)
}

/// Write-back rows for the batches a committed plan has drawn from.
pub fn updated_rows(ledger: &BatchLedger, plan: &ConsumptionPlan) -> Vec<SheetRow> {
    plan.consumptions
        .iter()
        .filter_map(|draw| ledger.get(&draw.code))
        .map(|batch| record_row(&batch.record()))
        .collect()
}

/// Append-only audit row for a batch event.
pub fn event_row(event: &BatchEvent) -> SheetRow {
    let mut row = SheetRow::new();
    row.set("Event", event.event_type());
    row.set("Batch ID", event.code().to_string());
    row.set("Occurred At", event.occurred_at().to_rfc3339());
    match event {
        BatchEvent::BatchCreated(e) => {
            row.set("Weight", e.initial_weight.to_string());
        }
        BatchEvent::WeightConsumed(e) => {
            row.set("Weight", e.weight.to_string());
            row.set("Remaining", e.remaining_after.to_string());
            row.set("Purpose", e.purpose.to_string());
            if let Some(reference) = &e.reference {
                row.set("Reference", reference.to_string());
            }
        }
        BatchEvent::BatchClosed(e) => {
            row.set("Remaining", e.remaining_weight.to_string());
        }
    }
    row
}
