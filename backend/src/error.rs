//! Error types for the postcheck validation engine.
//!
//! Only two kinds of error stop a run before any row is processed:
//!
//! - [`SniffError`] - no usable encoding/delimiter (the "unreadable file" case)
//! - [`MappingError`] - a required field has no source column
//!
//! Everything that goes wrong for a single row or a single provider is
//! recorded as data in the [`Report`](crate::models::Report) instead.
//! [`LookupError`] never leaves the lookup aggregator, and [`RunError`]
//! only exists to tell a cancelled run apart from a finished one.
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

use crate::models::CanonicalField;

// =============================================================================
// File Sniffing Errors
// =============================================================================

/// The file could not be decoded with any candidate encoding/delimiter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SniffError {
    /// Nothing to sniff.
    #[error("File is empty")]
    Empty,

    /// No candidate encoding produced text (binary or UTF-16 input).
    #[error("No supported encoding could decode the file")]
    NoEncoding,

    /// Text decoded, but no delimiter gave a consistent column count.
    #[error("Could not determine the field delimiter (tried {tried})")]
    NoDelimiter { tried: String },
}

// =============================================================================
// CSV Reading Errors
// =============================================================================

/// Errors while reading the whole file with a sniffed format.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Failed to read file.
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    /// Format detection failed.
    #[error(transparent)]
    Unreadable(#[from] SniffError),

    /// Invalid CSV structure.
    #[error("Invalid CSV at line {line}: {message}")]
    Csv { line: u64, message: String },

    /// No header row.
    #[error("No headers found in CSV")]
    NoHeaders,
}

// =============================================================================
// Column Mapping Errors
// =============================================================================

/// Column mapping could not cover the required fields.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// Required canonical fields left without a source column.
    #[error("Required fields are not mapped: {}", join_fields(.missing_fields))]
    MissingFields { missing_fields: Vec<CanonicalField> },

    /// Two overrides point at the same source column.
    #[error("Column '{column}' is mapped to more than one field: {}", join_fields(.fields))]
    DuplicateColumn {
        column: String,
        fields: Vec<CanonicalField>,
    },
}

fn join_fields(fields: &[CanonicalField]) -> String {
    fields
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Provider Errors
// =============================================================================

/// A single provider failed to answer for a single postal code.
///
/// These are degraded to an "address could not be verified" warning by the
/// aggregator and never propagate as run-level errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// HTTP request failed.
    #[error("Request failed: {0}")]
    Request(String),

    /// Non-success HTTP status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// Provider has no address for this postal code.
    #[error("Postal code not found")]
    NotFound,

    /// Response could not be interpreted as an address.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Provider did not answer within its timeout.
    #[error("Timed out")]
    Timeout,
}

// =============================================================================
// Run Errors
// =============================================================================

/// A validation run that did not reach DONE.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The run was cancelled; no report is produced.
    #[error("Validation cancelled after {processed} of {total} rows")]
    Cancelled { processed: usize, total: usize },
}

// =============================================================================
// Writer Errors
// =============================================================================

/// Errors while serialising the corrected CSV.
#[derive(Debug, Error)]
pub enum WriteError {
    /// CSV serialisation error.
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("Write IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while loading engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error.
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Environment override could not be parsed.
    #[error("Invalid value for {name}: '{value}'")]
    InvalidEnv { name: String, value: String },

    /// Structurally invalid configuration.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level errors of [`crate::validation::check_bytes`] and friends.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// CSV reading error.
    #[error("CSV error: {0}")]
    Parse(#[from] ParseError),

    /// Mapping error.
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Run did not complete.
    #[error("{0}")]
    Run(#[from] RunError),

    /// Writer error.
    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<SniffError> for PipelineError {
    fn from(err: SniffError) -> Self {
        PipelineError::Parse(ParseError::Unreadable(err))
    }
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Server IO error.
    #[error("Server IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for format detection.
pub type SniffResult<T> = Result<T, SniffError>;

/// Result type for CSV reading.
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for column mapping.
pub type MappingResult<T> = Result<T, MappingError>;

/// Result type for provider lookups.
pub type ProviderResult<T> = Result<T, LookupError>;

/// Result type for writing.
pub type WriteResult<T> = Result<T, WriteError>;

/// Result type for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
