//! Record validation.
//!
//! - [`record`] - format rules for one row
//! - [`orchestrator`] - runs a whole file, including postal lookups
//! - [`pipeline`] - sniff → read → map → validate in one call

pub mod orchestrator;
pub mod pipeline;
pub mod record;

pub use orchestrator::Validator;
pub use pipeline::{
    check_bytes, check_file, read_bytes, sniff_bytes, suggest_mapping, CheckOutcome, FileInfo,
};
pub use record::{check_record, RowCheck};
