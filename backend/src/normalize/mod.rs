//! Field Normalizer - pure formatting and validation rules.
//!
//! One function per field kind. Every function is total: it accepts any
//! string, never panics, and returns a best-effort value plus at most one
//! [`FieldIssue`]. Feeding a normalized value back in yields the same value
//! and never a new issue: a warning about the value itself (a phone with no
//! area code) is reported again, one about the reformatting is not.
//!
//! | Field          | Canonical form                          |
//! |----------------|-----------------------------------------|
//! | Postal code    | `NNNNN-NNN`                             |
//! | Document (CPF) | `NNN.NNN.NNN-NN`                        |
//! | Document (CNPJ)| `NN.NNN.NNN/NNNN-NN`                    |
//! | Phone          | `(DD) NNNNN-NNNN` / `(DD) NNNN-NNNN`    |
//! | State          | two-letter UF code                      |

pub mod document;
pub mod phone;
pub mod postal_code;
pub mod state;

use crate::models::{CanonicalField, Finding, FindingCode, Severity};

pub use document::{normalize_document, DocumentKind};
pub use phone::normalize_phone;
pub use postal_code::{is_canonical_postal_code, normalize_postal_code, POSTAL_CODE_DIGITS};
pub use state::normalize_state;

/// Longest recipient name the platform accepts.
pub const MAX_NAME_CHARS: usize = 100;

/// A problem found by a normalizer, not yet tied to a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub severity: Severity,
    pub code: FindingCode,
    pub message: String,
}

impl FieldIssue {
    pub fn error(code: FindingCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
        }
    }

    pub fn warning(code: FindingCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message: message.into(),
        }
    }

    /// Attach the issue to a row and field.
    pub fn into_finding(self, row_index: usize, field: CanonicalField) -> Finding {
        Finding {
            row_index,
            field,
            severity: self.severity,
            code: self.code,
            message: self.message,
        }
    }
}

/// Output of a normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub value: String,
    pub issue: Option<FieldIssue>,
}

impl Normalized {
    pub fn ok(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            issue: None,
        }
    }

    pub fn with_issue(value: impl Into<String>, issue: FieldIssue) -> Self {
        Self {
            value: value.into(),
            issue: Some(issue),
        }
    }
}

/// Keep ASCII digits only.
pub(crate) fn digits(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// Trim and collapse internal whitespace runs to a single space.
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower-case, strip Latin accents and collapse whitespace.
///
/// Used wherever two spellings of a place name must compare equal.
pub fn fold(value: &str) -> String {
    collapse_whitespace(value)
        .chars()
        .map(strip_accent)
        .flat_map(char::to_lowercase)
        .collect()
}

/// Base letter of an accented Latin letter; other characters unchanged.
pub(crate) fn strip_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        'ñ' => 'n',
        'Ñ' => 'N',
        other => other,
    }
}

/// Recipient names longer than the platform limit are rejected.
pub fn normalize_name(value: &str) -> Normalized {
    let value = collapse_whitespace(value);
    let len = value.chars().count();
    if len > MAX_NAME_CHARS {
        let message = format!("Name has {} characters; the limit is {}", len, MAX_NAME_CHARS);
        return Normalized::with_issue(value, FieldIssue::error(FindingCode::FieldTooLong, message));
    }
    Normalized::ok(value)
}

/// Dispatch to the rule for a field. Fields without a rule have their
/// whitespace collapsed.
///
/// Empty input is treated as absent by every rule: required-field checks
/// happen in the orchestrator.
pub fn normalize_field(field: CanonicalField, raw: &str) -> Normalized {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Normalized::ok("");
    }
    match field {
        CanonicalField::PostalCode => normalize_postal_code(trimmed),
        CanonicalField::DocumentId => normalize_document(trimmed),
        CanonicalField::Phone => normalize_phone(trimmed),
        CanonicalField::State => normalize_state(trimmed),
        CanonicalField::RecipientName => normalize_name(trimmed),
        _ => Normalized::ok(collapse_whitespace(trimmed)),
    }
}
