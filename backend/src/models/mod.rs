//! Domain models for the postcheck validation engine.
//!
//! This module contains the core data structures used throughout the pipeline:
//!
//! - [`CanonicalField`] - The fixed target schema every record is normalized into
//! - [`RawRecord`] / [`NormalizedRecord`] - A source row before and after normalization
//! - [`Finding`] / [`Correction`] - What the engine found and what it proposes
//! - [`LookupResult`] - One provider's answer for one postal code
//! - [`Report`] - Everything a run produced, in row order

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::mapping::ColumnMapping;

// =============================================================================
// Canonical Schema
// =============================================================================

/// A slot of the platform's import schema.
///
/// Downstream code addresses record values only through this enum, never
/// through raw header strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    RecipientName,
    DocumentId,
    Phone,
    PostalCode,
    Street,
    Number,
    Complement,
    Neighborhood,
    City,
    State,
    Reference,
}

impl CanonicalField {
    /// Every field, in schema order.
    pub const ALL: [CanonicalField; 11] = [
        Self::RecipientName,
        Self::DocumentId,
        Self::Phone,
        Self::PostalCode,
        Self::Street,
        Self::Number,
        Self::Complement,
        Self::Neighborhood,
        Self::City,
        Self::State,
        Self::Reference,
    ];

    /// Snake-case identifier used in reports, config and CLI flags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecipientName => "recipient_name",
            Self::DocumentId => "document_id",
            Self::Phone => "phone",
            Self::PostalCode => "postal_code",
            Self::Street => "street",
            Self::Number => "number",
            Self::Complement => "complement",
            Self::Neighborhood => "neighborhood",
            Self::City => "city",
            Self::State => "state",
            Self::Reference => "reference",
        }
    }

    /// Fields a postal lookup can correct.
    pub fn is_address(&self) -> bool {
        matches!(
            self,
            Self::Street | Self::Neighborhood | Self::City | Self::State
        )
    }

    fn position(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == normalized)
            .ok_or_else(|| format!("Unknown field: {}", s))
    }
}

// =============================================================================
// Records
// =============================================================================

/// One data row of the source file.
///
/// Values stay exactly as read; the header is shared between all rows of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based line number in the source file (the header is line 1).
    pub row_index: usize,
    headers: Arc<Vec<String>>,
    values: Vec<String>,
}

impl RawRecord {
    pub fn new(row_index: usize, headers: Arc<Vec<String>>, values: Vec<String>) -> Self {
        Self {
            row_index,
            headers,
            values,
        }
    }

    /// Value of the column with this exact header name.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|h| h == column)
            .and_then(|i| self.value_at(i))
    }

    /// Value at a column position; missing trailing cells read as absent.
    pub fn value_at(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Iterate `(column name, value)` pairs in header order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.as_str(), self.value_at(i).unwrap_or("")))
    }
}

/// A record after format normalization: one value per canonical field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct NormalizedRecord {
    pub row_index: usize,
    values: [String; 11],
}

impl NormalizedRecord {
    pub fn new(row_index: usize) -> Self {
        Self {
            row_index,
            values: Default::default(),
        }
    }

    pub fn get(&self, field: CanonicalField) -> &str {
        &self.values[field.position()]
    }

    pub fn set(&mut self, field: CanonicalField, value: impl Into<String>) {
        self.values[field.position()] = value.into();
    }
}

// =============================================================================
// Findings
// =============================================================================

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// The record cannot be trusted as-is.
    Error,
    /// Non-fatal quality issue.
    Warning,
}

/// Machine-readable reason of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCode {
    RequiredFieldEmpty,
    FieldTooLong,
    PostalCodeLength,
    PostalCodeZeroPadded,
    PostalCodeReformatted,
    DocumentLength,
    DocumentCheckDigit,
    DocumentRepeatedDigits,
    PhoneLength,
    PhoneAreaCodeMissing,
    StateUnknown,
    AddressUnverified,
    AddressAmbiguous,
}

/// A validation issue attached to a row and field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub row_index: usize,
    pub field: CanonicalField,
    pub severity: Severity,
    pub code: FindingCode,
    pub message: String,
}

impl Finding {
    pub fn error(
        row_index: usize,
        field: CanonicalField,
        code: FindingCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row_index,
            field,
            severity: Severity::Error,
            code,
            message: message.into(),
        }
    }

    pub fn warning(
        row_index: usize,
        field: CanonicalField,
        code: FindingCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row_index,
            field,
            severity: Severity::Warning,
            code,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

// =============================================================================
// Corrections
// =============================================================================

/// Where a suggested value came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "provider", rename_all = "snake_case")]
pub enum CorrectionSource {
    /// Deterministic reformatting (postal code, document, phone, state).
    FormatRule,
    /// Address data returned by a lookup provider.
    LookupProvider(String),
}

impl CorrectionSource {
    pub fn is_lookup(&self) -> bool {
        matches!(self, Self::LookupProvider(_))
    }
}

impl fmt::Display for CorrectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FormatRule => f.write_str("format"),
            Self::LookupProvider(id) => write!(f, "lookup:{}", id),
        }
    }
}

/// A proposed replacement value. Never applied automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub row_index: usize,
    pub field: CanonicalField,
    pub original_value: String,
    pub suggested_value: String,
    pub source: CorrectionSource,
}

// =============================================================================
// Lookup
// =============================================================================

/// One provider's answer for one postal code. Discarded after reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LookupResult {
    pub provider_id: String,
    pub postal_code: String,
    pub street: String,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    /// Share of the four address fields the provider filled in.
    pub confidence: f32,
}

impl LookupResult {
    pub fn new(
        provider_id: impl Into<String>,
        postal_code: impl Into<String>,
        street: impl Into<String>,
        neighborhood: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        let mut result = Self {
            provider_id: provider_id.into(),
            postal_code: postal_code.into(),
            street: street.into().trim().to_string(),
            neighborhood: neighborhood.into().trim().to_string(),
            city: city.into().trim().to_string(),
            state: state.into().trim().to_uppercase(),
            confidence: 0.0,
        };
        let filled = [
            &result.street,
            &result.neighborhood,
            &result.city,
            &result.state,
        ]
        .iter()
        .filter(|v| !v.is_empty())
        .count();
        result.confidence = filled as f32 / 4.0;
        result
    }

    /// Provider value for an address field, if the field is one.
    pub fn value_for(&self, field: CanonicalField) -> Option<&str> {
        match field {
            CanonicalField::Street => Some(&self.street),
            CanonicalField::Neighborhood => Some(&self.neighborhood),
            CanonicalField::City => Some(&self.city),
            CanonicalField::State => Some(&self.state),
            _ => None,
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// Quick (format rules only) or full (format rules plus postal lookup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    Quick,
    #[default]
    Full,
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quick" | "format" => Ok(Self::Quick),
            "full" => Ok(Self::Full),
            other => Err(format!("Unknown validation mode: {}", other)),
        }
    }
}

/// Result of one completed validation run. Read-only once built.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run_id: Uuid,
    pub mode: ValidationMode,
    pub mapping: ColumnMapping,
    pub findings: Vec<Finding>,
    pub corrections: Vec<Correction>,
    pub total_rows: usize,
    pub rows_with_errors: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Report {
    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Warning)
    }

    pub fn findings_for_row(&self, row_index: usize) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.row_index == row_index)
    }

    pub fn corrections_for_row(&self, row_index: usize) -> impl Iterator<Item = &Correction> {
        self.corrections
            .iter()
            .filter(move |c| c.row_index == row_index)
    }

    /// One-line summary for logs and CLI output.
    pub fn summary(&self) -> String {
        format!(
            "{} rows, {} with errors, {} errors, {} warnings, {} corrections",
            self.total_rows,
            self.rows_with_errors,
            self.errors().count(),
            self.warnings().count(),
            self.corrections.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_roundtrip_through_str() {
        for field in CanonicalField::ALL {
            assert_eq!(field.as_str().parse::<CanonicalField>(), Ok(field));
        }
        assert_eq!(
            "Postal-Code".parse::<CanonicalField>(),
            Ok(CanonicalField::PostalCode)
        );
        assert!("zip".parse::<CanonicalField>().is_err());
    }

    #[test]
    fn test_field_serializes_snake_case() {
        let json = serde_json::to_string(&CanonicalField::RecipientName).unwrap();
        assert_eq!(json, "\"recipient_name\"");
    }

    #[test]
    fn test_raw_record_short_row() {
        let headers = Arc::new(vec!["NOME".to_string(), "CEP".to_string()]);
        let record = RawRecord::new(2, headers, vec!["Ana".to_string()]);
        assert_eq!(record.get("NOME"), Some("Ana"));
        assert_eq!(record.get("CEP"), None);
        assert_eq!(record.iter().nth(1), Some(("CEP", "")));
    }

    #[test]
    fn test_lookup_result_confidence() {
        let full = LookupResult::new("a", "01310100", "Av. Paulista", "Bela Vista", "São Paulo", "sp");
        assert_eq!(full.confidence, 1.0);
        assert_eq!(full.state, "SP");

        let city_wide = LookupResult::new("a", "13990000", "", "", "Espírito Santo do Pinhal", "SP");
        assert_eq!(city_wide.confidence, 0.5);
    }

    #[test]
    fn test_correction_source_serialization() {
        let json = serde_json::to_value(CorrectionSource::LookupProvider("viacep".into())).unwrap();
        assert_eq!(json["kind"], "lookup_provider");
        assert_eq!(json["provider"], "viacep");
    }
}
