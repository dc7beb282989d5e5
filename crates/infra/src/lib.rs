//! Persistence boundary: loosely-typed sheet rows in, strict records out.

pub mod sheet;


pub use sheet::{
    SheetRow, batch_record, event_row, load_ledger, parse_date, parse_status, parse_weight,
    record_row, updated_rows,
};
