//! WIP batch domain module (event-sourced).
//!
//! Business rules for work-in-progress seed batches: lifecycle, FIFO
//! selection, consumption planning and packing arithmetic. This crate is pure
//! domain logic (no IO, no HTTP, no storage).

pub mod batch;
pub mod ledger;
pub mod packing;
pub mod settings;

pub use batch::{
    BatchClosed, BatchCommand, BatchCreated, BatchEvent, BatchRecord, BatchStatus, ConsumeWeight,
    ConsumptionPurpose, CreateBatch, WeightConsumed, WipBatch,
};
pub use ledger::{
    BatchConsumption, BatchKey, BatchLedger, ConsumptionPlan, ConsumptionRequest, StockSummary,
};
pub use packing::PackingRun;
pub use settings::PackhouseSettings;
