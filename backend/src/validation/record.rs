//! Row-level checks: project a raw record onto the canonical schema and run
//! every format rule. No I/O, no shared state; each row stands alone.

use crate::mapping::ColumnMapping;
use crate::models::{
    CanonicalField, Correction, CorrectionSource, Finding, FindingCode, NormalizedRecord,
    RawRecord, Severity,
};
use crate::normalize::normalize_field;

/// Everything the format rules produced for one row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowCheck {
    pub record: NormalizedRecord,
    pub findings: Vec<Finding>,
    pub corrections: Vec<Correction>,
}

impl RowCheck {
    pub fn has_error(&self) -> bool {
        self.findings.iter().any(Finding::is_error)
    }

    /// Postal code worth looking up: present and not rejected by the format rules.
    pub fn lookup_key(&self) -> Option<&str> {
        let code = self.record.get(CanonicalField::PostalCode);
        let rejected = self.findings.iter().any(|f| {
            f.field == CanonicalField::PostalCode && f.severity == Severity::Error
        });
        (!code.is_empty() && !rejected).then_some(code)
    }
}

/// Normalize one row. Unmapped fields stay empty and are never checked.
pub fn check_record(
    raw: &RawRecord,
    mapping: &ColumnMapping,
    required: &[CanonicalField],
) -> RowCheck {
    let row = raw.row_index;
    let mut record = NormalizedRecord::new(row);
    let mut findings = Vec::new();
    let mut corrections = Vec::new();

    for (field, column) in mapping.iter() {
        let cell = raw.value_at(column.index).unwrap_or("");
        let entered = cell.trim();

        if entered.is_empty() {
            if required.contains(&field) {
                findings.push(Finding::error(
                    row,
                    field,
                    FindingCode::RequiredFieldEmpty,
                    format!("Required field '{}' (column '{}') is empty", field, column.name),
                ));
            }
            continue;
        }

        let normalized = normalize_field(field, entered);
        if let Some(issue) = normalized.issue {
            findings.push(issue.into_finding(row, field));
        }
        // compared with the cell as read, so whitespace cleanup is a correction too
        if normalized.value != cell {
            corrections.push(Correction {
                row_index: row,
                field,
                original_value: cell.to_string(),
                suggested_value: normalized.value.clone(),
                source: CorrectionSource::FormatRule,
            });
        }
        record.set(field, normalized.value);
    }

    RowCheck {
        record,
        findings,
        corrections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{resolve_mapping, DEFAULT_REQUIRED};
    use std::sync::Arc;

    fn raw(values: &[&str]) -> (RawRecord, ColumnMapping) {
        let header: Vec<String> = [
            "NOME", "CPF", "TELEFONE", "CEP", "ENDERECO", "NUMERO", "BAIRRO", "CIDADE", "UF",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let mapping = resolve_mapping(&header, None).unwrap();
        let record = RawRecord::new(
            2,
            Arc::new(header),
            values.iter().map(|s| s.to_string()).collect(),
        );
        (record, mapping)
    }

    #[test]
    fn test_clean_row() {
        let (record, mapping) = raw(&[
            "Ana Souza", "529.982.247-25", "(11) 91234-5678", "01310-100", "Avenida Paulista",
            "1000", "Bela Vista", "São Paulo", "SP",
        ]);
        let check = check_record(&record, &mapping, &DEFAULT_REQUIRED);
        assert!(check.findings.is_empty());
        assert!(check.corrections.is_empty());
        assert_eq!(check.lookup_key(), Some("01310-100"));
    }

    #[test]
    fn test_format_corrections() {
        let (record, mapping) = raw(&[
            "Ana", "52998224725", "11912345678", "01310100", "Av Paulista", "1000", "Bela Vista",
            "Sao Paulo", "sp",
        ]);
        let check = check_record(&record, &mapping, &DEFAULT_REQUIRED);

        let fields: Vec<_> = check.corrections.iter().map(|c| c.field).collect();
        assert_eq!(
            fields,
            vec![
                CanonicalField::DocumentId,
                CanonicalField::Phone,
                CanonicalField::PostalCode,
                CanonicalField::State
            ]
        );
        assert!(check
            .corrections
            .iter()
            .all(|c| c.source == CorrectionSource::FormatRule));
        assert_eq!(check.record.get(CanonicalField::PostalCode), "01310-100");
        assert!(!check.has_error());
    }

    #[test]
    fn test_whitespace_cleanup_is_a_correction() {
        let (record, mapping) = raw(&[
            "Ana Souza", "", "", "01310-100", "Rua  das   Flores ", "1000", " Bela Vista",
            "São Paulo", "SP",
        ]);
        let check = check_record(&record, &mapping, &DEFAULT_REQUIRED);

        let fixes: Vec<_> = check
            .corrections
            .iter()
            .map(|c| (c.field, c.original_value.as_str(), c.suggested_value.as_str()))
            .collect();
        assert_eq!(
            fixes,
            vec![
                (CanonicalField::Street, "Rua  das   Flores ", "Rua das Flores"),
                (CanonicalField::Neighborhood, " Bela Vista", "Bela Vista"),
            ]
        );
        assert_eq!(check.record.get(CanonicalField::Street), "Rua das Flores");
        assert!(check.findings.is_empty());
    }

    #[test]
    fn test_required_empty_and_bad_postal_code() {
        let (record, mapping) = raw(&["", "", "", "123", "Rua A", "1", "Centro", "Recife"]);
        let check = check_record(&record, &mapping, &DEFAULT_REQUIRED);

        let codes: Vec<_> = check.findings.iter().map(|f| f.code).collect();
        assert_eq!(
            codes,
            vec![
                FindingCode::RequiredFieldEmpty,
                FindingCode::PostalCodeLength,
                FindingCode::RequiredFieldEmpty
            ]
        );
        assert_eq!(check.findings[2].field, CanonicalField::State);
        assert!(check.has_error());
        assert_eq!(check.lookup_key(), None);
    }
}
