//! # Postcheck - shipment CSV validation and correction
//!
//! Postcheck checks address spreadsheets before they are imported into a
//! postal shipping platform: it detects how the file is encoded, maps its
//! columns onto a fixed schema, validates and normalizes every field
//! (CEP, CPF/CNPJ, phone, state), cross-checks addresses against postal
//! code providers and writes back a corrected copy in the original encoding.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────┐   ┌─────────┐   ┌────────────┐   ┌────────┐   ┌────────┐
//! │ CSV bytes │──▶│ Sniffer │──▶│ Mapping │──▶│ Normalizer │──▶│ Lookup │──▶│ Report │
//! │ (any enc) │   │ (parser)│   │         │   │ (per field)│   │ (HTTP) │   │        │
//! └───────────┘   └─────────┘   └─────────┘   └────────────┘   └────────┘   └───┬────┘
//!                                                                  Writer ◀──────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use postcheck::{check_file, write_file, EngineConfig, EventSink, ValidationMode, Validator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let validator = Validator::from_config(EngineConfig::load(None)?, EventSink::default())?;
//!     let outcome = check_file(&validator, "envios.csv".as_ref(), None, ValidationMode::Full).await?;
//!     println!("{}", outcome.report.summary());
//!     std::fs::write("corrigido.csv", write_file(&outcome.file, &outcome.report, false)?)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per concern
//! - [`models`] - Records, findings, corrections, report
//! - [`parser`] - Encoding/delimiter detection and reading
//! - [`mapping`] - Header → canonical field resolution
//! - [`normalize`] - Field format rules
//! - [`lookup`] - Postal code providers and reconciliation
//! - [`validation`] - Orchestrator and end-to-end pipeline
//! - [`writer`] - Corrected CSV output
//! - [`events`] - Run diagnostics
//! - [`config`] - Engine configuration
//! - [`api`] - HTTP API server

// Core modules
pub mod error;
pub mod models;

// Reading
pub mod mapping;
pub mod parser;

// Checking
pub mod lookup;
pub mod normalize;
pub mod validation;

// Output
pub mod writer;

// Ambient
pub mod config;
pub mod events;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, LookupError, MappingError, ParseError, PipelineError, PipelineResult, RunError,
    ServerError, SniffError, WriteError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    CanonicalField, Correction, CorrectionSource, Finding, FindingCode, LookupResult,
    NormalizedRecord, RawRecord, Report, Severity, ValidationMode,
};

// =============================================================================
// Re-exports - CSV Reading
// =============================================================================

pub use parser::{
    decode_content, detect_delimiter, detect_format, format_delimiter, parse_bytes,
    parse_bytes_auto, parse_file_auto, Encoding, FileFormat, ParsedFile,
};

// =============================================================================
// Re-exports - Mapping
// =============================================================================

pub use mapping::{
    resolve_mapping, ColumnMapping, ColumnResolver, MappingOverrides, MappingSuggestion,
};

// =============================================================================
// Re-exports - Normalizer
// =============================================================================

pub use normalize::{normalize_field, Normalized};

// =============================================================================
// Re-exports - Lookup
// =============================================================================

pub use lookup::{HttpProvider, LookupVerdict, PostalLookup, PostalProvider, UnverifiedReason};

// =============================================================================
// Re-exports - Validation
// =============================================================================

pub use validation::{check_bytes, check_file, read_bytes, CheckOutcome, FileInfo, Validator};

// =============================================================================
// Re-exports - Writer, events, config
// =============================================================================

pub use config::{EngineConfig, ProviderConfig, ProviderFormat};
pub use events::{EventSink, RunEvent};
pub use writer::{write_csv, write_file};

// Server
pub mod server {
    pub use crate::api::server::{router, start_server, AppState};
}
