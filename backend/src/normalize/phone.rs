//! Brazilian phone numbers: two-digit area code (DDD) plus an 8-digit
//! landline or 9-digit mobile number.

use super::{digits, FieldIssue, Normalized};
use crate::models::FindingCode;

const COUNTRY_CODE: &str = "55";

fn format_local(d: &str) -> String {
    let split = d.len() - 4;
    format!("{}-{}", &d[..split], &d[split..])
}

/// Normalize a phone number to `(DD) NNNNN-NNNN` / `(DD) NNNN-NNNN`.
///
/// - 12/13 digits starting with 55: country code dropped
/// - 11/12 digits starting with 0: trunk prefix dropped
/// - 8/9 digits: accepted, warning that the area code is missing (again on
///   every pass, since the normalized value still lacks it)
/// - anything else: error, value kept as entered
pub fn normalize_phone(value: &str) -> Normalized {
    let value = value.trim();
    let all = digits(value);

    let mut national = all.as_str();
    if matches!(national.len(), 12 | 13) && national.starts_with(COUNTRY_CODE) {
        national = &national[COUNTRY_CODE.len()..];
    }
    if matches!(national.len(), 11 | 12) && national.starts_with('0') {
        national = &national[1..];
    }

    match national.len() {
        10 | 11 => Normalized::ok(format!("({}) {}", &national[..2], format_local(&national[2..]))),
        8 | 9 => {
            let local = format_local(national);
            let message = format!("Phone '{}' has no area code (DDD)", local);
            Normalized::with_issue(local, FieldIssue::warning(FindingCode::PhoneAreaCodeMissing, message))
        }
        n => {
            let message = format!("Phone must have 10 or 11 digits including the area code, found {}", n);
            Normalized::with_issue(value, FieldIssue::error(FindingCode::PhoneLength, message))
        }
    }
}
