//! Federative units (UF). Not part of the platform's hard rules, but
//! providers answer with UF codes, so entered values are brought to the
//! same form before comparing.

use super::{collapse_whitespace, fold, FieldIssue, Normalized};
use crate::models::FindingCode;

const STATES: [(&str, &str); 27] = [
    ("AC", "Acre"),
    ("AL", "Alagoas"),
    ("AP", "Amapá"),
    ("AM", "Amazonas"),
    ("BA", "Bahia"),
    ("CE", "Ceará"),
    ("DF", "Distrito Federal"),
    ("ES", "Espírito Santo"),
    ("GO", "Goiás"),
    ("MA", "Maranhão"),
    ("MT", "Mato Grosso"),
    ("MS", "Mato Grosso do Sul"),
    ("MG", "Minas Gerais"),
    ("PA", "Pará"),
    ("PB", "Paraíba"),
    ("PR", "Paraná"),
    ("PE", "Pernambuco"),
    ("PI", "Piauí"),
    ("RJ", "Rio de Janeiro"),
    ("RN", "Rio Grande do Norte"),
    ("RS", "Rio Grande do Sul"),
    ("RO", "Rondônia"),
    ("RR", "Roraima"),
    ("SC", "Santa Catarina"),
    ("SP", "São Paulo"),
    ("SE", "Sergipe"),
    ("TO", "Tocantins"),
];

pub fn is_state_code(value: &str) -> bool {
    STATES.iter().any(|(uf, _)| *uf == value)
}

/// Normalize a state to its UF code; full names are accepted.
pub fn normalize_state(value: &str) -> Normalized {
    let cleaned = collapse_whitespace(value);
    let upper = cleaned.to_uppercase();
    if is_state_code(&upper) {
        return Normalized::ok(upper);
    }

    let folded = fold(&cleaned);
    if let Some((uf, _)) = STATES.iter().find(|(_, name)| fold(name) == folded) {
        return Normalized::ok(*uf);
    }

    let message = format!("'{}' is not a Brazilian state (UF)", cleaned);
    Normalized::with_issue(cleaned, FieldIssue::warning(FindingCode::StateUnknown, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_uppercased() {
        assert_eq!(normalize_state("sp"), Normalized::ok("SP"));
        assert_eq!(normalize_state(" RJ "), Normalized::ok("RJ"));
    }

    #[test]
    fn test_full_names_mapped() {
        assert_eq!(normalize_state("Sao Paulo"), Normalized::ok("SP"));
        assert_eq!(normalize_state("MATO GROSSO DO SUL"), Normalized::ok("MS"));
        assert_eq!(normalize_state("rio  grande do norte"), Normalized::ok("RN"));
    }

    #[test]
    fn test_unknown_warns() {
        let result = normalize_state("XX");
        assert_eq!(result.value, "XX");
        assert_eq!(result.issue.unwrap().code, FindingCode::StateUnknown);
    }
}
