//! End-to-end checks: sniff, read, resolve the mapping, validate.
//!
//! # Example
//!
//! ```rust,ignore
//! use postcheck::{check_file, EngineConfig, EventSink, ValidationMode, Validator};
//!
//! let validator = Validator::from_config(EngineConfig::load(None)?, EventSink::default())?;
//! let outcome = check_file(&validator, "envios.csv".as_ref(), None, ValidationMode::Full).await?;
//! println!("{}", outcome.report.summary());
//! ```

use serde::Serialize;
use std::path::Path;

use super::orchestrator::Validator;
use crate::config::SnifferConfig;
use crate::error::{PipelineResult, SniffResult};
use crate::mapping::{MappingOverrides, MappingSuggestion};
use crate::models::{Report, ValidationMode};
use crate::parser::{detect_format_with, format_delimiter, parse_bytes, FileFormat, ParsedFile};

/// File summary for presentation layers.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub encoding: String,
    pub delimiter: String,
    pub headers: Vec<String>,
    pub row_count: usize,
}

impl FileInfo {
    pub fn of(file: &ParsedFile) -> Self {
        Self {
            encoding: file.format.encoding.label().to_string(),
            delimiter: format_delimiter(file.format.delimiter).to_string(),
            headers: file.headers.to_vec(),
            row_count: file.records.len(),
        }
    }
}

/// A validated file: the rows as read plus the report about them.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub file: ParsedFile,
    pub report: Report,
}

/// Detect the format from the configured sample prefix.
pub fn sniff_bytes(bytes: &[u8], config: &SnifferConfig) -> SniffResult<FileFormat> {
    let sample = &bytes[..bytes.len().min(config.sample_bytes)];
    detect_format_with(sample, config.max_sample_rows)
}

/// Read a file with the configured sniffer settings.
pub fn read_bytes(bytes: &[u8], config: &SnifferConfig) -> PipelineResult<ParsedFile> {
    let format = sniff_bytes(bytes, config)?;
    tracing::info!(
        encoding = %format.encoding,
        delimiter = format_delimiter(format.delimiter),
        "format detected"
    );
    Ok(parse_bytes(bytes, format)?)
}

/// Read a file and propose a mapping without requiring it to be complete.
pub fn suggest_mapping(
    validator: &Validator,
    bytes: &[u8],
    overrides: Option<&MappingOverrides>,
) -> PipelineResult<(ParsedFile, MappingSuggestion)> {
    let file = read_bytes(bytes, &validator.config().sniffer)?;
    let suggestion = validator
        .config()
        .mapping
        .resolver()
        .suggest(&file.headers, overrides)?;
    Ok((file, suggestion))
}

/// Validate file contents already in memory.
pub async fn check_bytes(
    validator: &Validator,
    bytes: &[u8],
    overrides: Option<&MappingOverrides>,
    mode: ValidationMode,
) -> PipelineResult<CheckOutcome> {
    let file = read_bytes(bytes, &validator.config().sniffer)?;
    let mapping = validator
        .config()
        .mapping
        .resolver()
        .resolve(&file.headers, overrides)?;
    tracing::info!(rows = file.records.len(), mapped = mapping.len(), "mapping resolved");

    let report = validator.validate(&file.records, &mapping, mode).await?;
    Ok(CheckOutcome { file, report })
}

/// Validate a file on disk.
pub async fn check_file(
    validator: &Validator,
    path: &Path,
    overrides: Option<&MappingOverrides>,
    mode: ValidationMode,
) -> PipelineResult<CheckOutcome> {
    let bytes = tokio::fs::read(path).await.map_err(crate::error::ParseError::from)?;
    check_bytes(validator, &bytes, overrides, mode).await
}
