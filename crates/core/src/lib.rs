//! `packhouse-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the error taxonomy, aggregate/event contracts, structured batch identifiers,
//! and weight units shared by the WIP crates.

pub mod aggregate;
pub mod error;
pub mod event;
pub mod id;
pub mod weight;

pub use aggregate::{Aggregate, AggregateRoot};
pub use error::{DomainError, DomainResult};
pub use event::Event;
pub use id::{BatchCode, DateKey, next_sequence};
pub use weight::WeightUnit;
