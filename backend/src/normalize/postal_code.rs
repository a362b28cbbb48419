//! CEP (Brazilian postal code): eight digits, written `NNNNN-NNN`.

use super::{digits, FieldIssue, Normalized};
use crate::models::FindingCode;

/// Digits in a CEP.
pub const POSTAL_CODE_DIGITS: usize = 8;

/// Whether a value is already in `NNNNN-NNN` form.
pub fn is_canonical_postal_code(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == POSTAL_CODE_DIGITS + 1
        && bytes.iter().enumerate().all(|(i, b)| match i {
            5 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

fn format_cep(d: &str) -> String {
    format!("{}-{}", &d[..5], &d[5..])
}

/// Normalize a postal code.
///
/// - 8 digits: reformatted, with a warning when punctuation had to be inferred
/// - 7 digits: a leading zero dropped by a spreadsheet is restored (warning)
/// - anything else: error, value kept as entered
pub fn normalize_postal_code(value: &str) -> Normalized {
    let value = value.trim();
    if is_canonical_postal_code(value) {
        return Normalized::ok(value);
    }

    let d = digits(value);
    match d.len() {
        POSTAL_CODE_DIGITS => {
            let canonical = format_cep(&d);
            let message = format!("Postal code '{}' reformatted to '{}'", value, canonical);
            Normalized::with_issue(
                canonical,
                FieldIssue::warning(FindingCode::PostalCodeReformatted, message),
            )
        }
        7 => {
            let canonical = format_cep(&format!("0{}", d));
            let message = format!(
                "Postal code '{}' has 7 digits; leading zero restored as '{}'",
                value, canonical
            );
            Normalized::with_issue(
                canonical,
                FieldIssue::warning(FindingCode::PostalCodeZeroPadded, message),
            )
        }
        n => {
            let message = format!(
                "Postal code must have {} digits, found {}. Use NNNNN-NNN",
                POSTAL_CODE_DIGITS, n
            );
            Normalized::with_issue(value, FieldIssue::error(FindingCode::PostalCodeLength, message))
        }
    }
}
