//! National tax IDs: CPF (individuals, 11 digits) and CNPJ (companies,
//! 14 digits), both protected by two mod-11 check digits.

use serde::{Deserialize, Serialize};

use super::{digits, FieldIssue, Normalized};
use crate::models::FindingCode;

/// Class of a document, decided by its digit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Cpf,
    Cnpj,
}

impl DocumentKind {
    pub fn classify(digit_count: usize) -> Option<Self> {
        match digit_count {
            11 => Some(Self::Cpf),
            14 => Some(Self::Cnpj),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Cpf => "CPF",
            Self::Cnpj => "CNPJ",
        }
    }
}

const CNPJ_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

fn mod11_digit(sum: u32) -> u32 {
    let rem = sum % 11;
    if rem < 2 {
        0
    } else {
        11 - rem
    }
}

/// CPF: weights count down from `len + 1` to 2.
fn cpf_check_digit(d: &[u32]) -> u32 {
    let len = d.len() as u32;
    let sum = d.iter().enumerate().map(|(i, v)| v * (len + 1 - i as u32)).sum();
    mod11_digit(sum)
}

/// CNPJ: weights cycle 2..=9 from the right.
fn cnpj_check_digit(d: &[u32]) -> u32 {
    let weights = &CNPJ_WEIGHTS[CNPJ_WEIGHTS.len() - d.len()..];
    let sum = d.iter().zip(weights).map(|(v, w)| v * w).sum();
    mod11_digit(sum)
}

/// Whether the two trailing check digits match the body.
fn has_valid_check_digits(kind: DocumentKind, d: &str) -> bool {
    let nums: Vec<u32> = d.chars().filter_map(|c| c.to_digit(10)).collect();
    if nums.len() < 3 {
        return false;
    }
    let body = nums.len() - 2;
    let check = match kind {
        DocumentKind::Cpf => cpf_check_digit,
        DocumentKind::Cnpj => cnpj_check_digit,
    };
    check(&nums[..body]) == nums[body] && check(&nums[..=body]) == nums[body + 1]
}

fn format_document(kind: DocumentKind, d: &str) -> String {
    match kind {
        DocumentKind::Cpf => format!("{}.{}.{}-{}", &d[..3], &d[3..6], &d[6..9], &d[9..]),
        DocumentKind::Cnpj => format!(
            "{}.{}.{}/{}-{}",
            &d[..2],
            &d[2..5],
            &d[5..8],
            &d[8..12],
            &d[12..]
        ),
    }
}

/// Normalize a CPF or CNPJ.
///
/// A value of the right length is always reformatted, even when its check
/// digits fail, so the written file carries the best-effort form.
pub fn normalize_document(value: &str) -> Normalized {
    let value = value.trim();
    let d = digits(value);

    let Some(kind) = DocumentKind::classify(d.len()) else {
        let message = format!(
            "Document must have 11 (CPF) or 14 (CNPJ) digits, found {}",
            d.len()
        );
        return Normalized::with_issue(value, FieldIssue::error(FindingCode::DocumentLength, message));
    };

    let formatted = format_document(kind, &d);

    if d.chars().all(|c| Some(c) == d.chars().next()) {
        let message = format!("{} '{}' is a repeated-digit placeholder", kind.label(), formatted);
        return Normalized::with_issue(
            formatted,
            FieldIssue::error(FindingCode::DocumentRepeatedDigits, message),
        );
    }

    if !has_valid_check_digits(kind, &d) {
        let message = format!("{} '{}' has invalid check digits", kind.label(), formatted);
        return Normalized::with_issue(formatted, FieldIssue::error(FindingCode::DocumentCheckDigit, message));
    }

    Normalized::ok(formatted)
}
