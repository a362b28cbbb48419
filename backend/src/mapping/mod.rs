//! Column Resolver - map arbitrary header names to canonical fields.
//!
//! Resolution order per field: user override, then a case-insensitive match
//! against the synonym table, then unresolved. Resolution fails closed when a
//! required field stays unresolved.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{MappingError, MappingResult};
use crate::models::CanonicalField;

/// User-chosen source column per field, e.g. from a mapping UI.
pub type MappingOverrides = BTreeMap<CanonicalField, String>;

/// Fields a file must provide unless configured otherwise.
pub const DEFAULT_REQUIRED: [CanonicalField; 7] = [
    CanonicalField::RecipientName,
    CanonicalField::PostalCode,
    CanonicalField::Street,
    CanonicalField::Number,
    CanonicalField::Neighborhood,
    CanonicalField::City,
    CanonicalField::State,
];

/// Built-in header synonyms, matched case-insensitively after trimming.
static DEFAULT_SYNONYMS: Lazy<BTreeMap<CanonicalField, Vec<&'static str>>> = Lazy::new(|| {
    use CanonicalField::*;
    BTreeMap::from([
        (
            RecipientName,
            vec!["NOME", "NOME_DESTINATARIO", "NOME DESTINATARIO", "DESTINATARIO", "DESTINATÁRIO", "RECIPIENT", "NAME"],
        ),
        (
            DocumentId,
            vec!["CPF", "CNPJ", "CPF_CNPJ", "CPF/CNPJ", "CPF-CNPJ", "DOCUMENTO", "DOC", "DOCUMENT"],
        ),
        (
            Phone,
            vec!["TELEFONE", "FONE", "CELULAR", "TEL", "PHONE"],
        ),
        (
            PostalCode,
            vec!["CEP", "CEP_DESTINO", "CODIGO_POSTAL", "CÓDIGO POSTAL", "POSTAL_CODE", "ZIP", "ZIPCODE"],
        ),
        (
            Street,
            vec!["ENDERECO", "ENDEREÇO", "LOGRADOURO", "RUA", "STREET", "ADDRESS"],
        ),
        (
            Number,
            vec!["NUMERO", "NÚMERO", "NUM", "Nº", "NRO", "NUMBER"],
        ),
        (
            Complement,
            vec!["COMPLEMENTO", "COMPL", "COMPLEMENT"],
        ),
        (
            Neighborhood,
            vec!["BAIRRO", "DISTRITO", "NEIGHBORHOOD", "DISTRICT"],
        ),
        (
            City,
            vec!["CIDADE", "MUNICIPIO", "MUNICÍPIO", "LOCALIDADE", "CITY"],
        ),
        (
            State,
            vec!["UF", "ESTADO", "STATE"],
        ),
        (
            Reference,
            vec!["REFERENCIA", "REFERÊNCIA", "PONTO_REFERENCIA", "PONTO DE REFERÊNCIA", "REFERENCE"],
        ),
    ])
});

/// How a column was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingSource {
    Override,
    Synonym,
}

/// A source column resolved for a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedColumn {
    /// Header name as it appears in the file.
    pub name: String,
    /// Position of the column in the header.
    pub index: usize,
    pub source: MappingSource,
}

/// Canonical field -> source column. Optional fields may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnMapping {
    columns: BTreeMap<CanonicalField, ResolvedColumn>,
}

impl ColumnMapping {
    pub fn column(&self, field: CanonicalField) -> Option<&ResolvedColumn> {
        self.columns.get(&field)
    }

    pub fn is_mapped(&self, field: CanonicalField) -> bool {
        self.columns.contains_key(&field)
    }

    /// Field stored in the column at this header position, if any.
    pub fn field_at(&self, index: usize) -> Option<CanonicalField> {
        self.columns
            .iter()
            .find(|(_, c)| c.index == index)
            .map(|(f, _)| *f)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CanonicalField, &ResolvedColumn)> {
        self.columns.iter().map(|(f, c)| (*f, c))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Partial resolution, for presenting a mapping UI before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingSuggestion {
    pub mapping: ColumnMapping,
    pub missing_required: Vec<CanonicalField>,
    /// Header columns no field claimed.
    pub unmapped_columns: Vec<String>,
}

/// Resolves headers against a synonym table and a required-field set.
#[derive(Debug, Clone)]
pub struct ColumnResolver {
    synonyms: BTreeMap<CanonicalField, Vec<String>>,
    required: BTreeSet<CanonicalField>,
}

impl Default for ColumnResolver {
    fn default() -> Self {
        Self::new(DEFAULT_REQUIRED)
    }
}

fn header_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl ColumnResolver {
    /// Resolver with the built-in synonyms and the given required fields.
    pub fn new(required: impl IntoIterator<Item = CanonicalField>) -> Self {
        let synonyms = DEFAULT_SYNONYMS
            .iter()
            .map(|(f, names)| (*f, names.iter().map(|n| header_key(n)).collect()))
            .collect();
        Self {
            synonyms,
            required: required.into_iter().collect(),
        }
    }

    /// Add synonyms for a field; they are tried after the built-in ones.
    pub fn with_synonyms<I, S>(mut self, field: CanonicalField, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entry = self.synonyms.entry(field).or_default();
        for name in names {
            let key = header_key(name.as_ref());
            if !entry.contains(&key) {
                entry.push(key);
            }
        }
        self
    }

    pub fn required(&self) -> impl Iterator<Item = CanonicalField> + '_ {
        self.required.iter().copied()
    }

    pub fn is_required(&self, field: CanonicalField) -> bool {
        self.required.contains(&field)
    }

    pub fn synonyms(&self, field: CanonicalField) -> &[String] {
        self.synonyms.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve what can be resolved without failing.
    pub fn suggest(
        &self,
        header: &[String],
        overrides: Option<&MappingOverrides>,
    ) -> MappingResult<MappingSuggestion> {
        let keys: Vec<String> = header.iter().map(|h| header_key(h)).collect();
        let mut columns: BTreeMap<CanonicalField, ResolvedColumn> = BTreeMap::new();
        let mut claimed: BTreeMap<usize, CanonicalField> = BTreeMap::new();
        let mut overridden: BTreeSet<CanonicalField> = BTreeSet::new();

        // (a) overrides claim their columns first
        if let Some(overrides) = overrides {
            for (field, column) in overrides {
                overridden.insert(*field);
                let wanted = header_key(column);
                if wanted.is_empty() {
                    continue;
                }
                let Some(index) = keys.iter().position(|k| *k == wanted) else {
                    tracing::warn!(field = %field, column = %column, "override names a column not in the header");
                    continue;
                };
                if let Some(other) = claimed.get(&index) {
                    return Err(MappingError::DuplicateColumn {
                        column: header[index].clone(),
                        fields: vec![*other, *field],
                    });
                }
                claimed.insert(index, *field);
                columns.insert(
                    *field,
                    ResolvedColumn {
                        name: header[index].clone(),
                        index,
                        source: MappingSource::Override,
                    },
                );
            }
        }

        // (b) synonyms, skipping fields the user decided on and claimed columns
        for field in CanonicalField::ALL {
            if overridden.contains(&field) {
                continue;
            }
            let found = self.synonyms(field).iter().find_map(|syn| {
                keys.iter()
                    .enumerate()
                    .find(|(i, k)| *k == syn && !claimed.contains_key(i))
                    .map(|(i, _)| i)
            });
            if let Some(index) = found {
                claimed.insert(index, field);
                columns.insert(
                    field,
                    ResolvedColumn {
                        name: header[index].clone(),
                        index,
                        source: MappingSource::Synonym,
                    },
                );
            }
        }

        let missing_required = self
            .required
            .iter()
            .copied()
            .filter(|f| !columns.contains_key(f))
            .collect();
        let unmapped_columns = header
            .iter()
            .enumerate()
            .filter(|(i, _)| !claimed.contains_key(i))
            .map(|(_, h)| h.clone())
            .collect();

        Ok(MappingSuggestion {
            mapping: ColumnMapping { columns },
            missing_required,
            unmapped_columns,
        })
    }

    /// Resolve a full mapping, failing with the exact set of missing
    /// required fields.
    pub fn resolve(
        &self,
        header: &[String],
        overrides: Option<&MappingOverrides>,
    ) -> MappingResult<ColumnMapping> {
        let suggestion = self.suggest(header, overrides)?;
        if !suggestion.missing_required.is_empty() {
            return Err(MappingError::MissingFields {
                missing_fields: suggestion.missing_required,
            });
        }
        Ok(suggestion.mapping)
    }
}

/// Resolve a header with the default synonyms and required fields.
pub fn resolve_mapping(
    header: &[String],
    overrides: Option<&MappingOverrides>,
) -> MappingResult<ColumnMapping> {
    ColumnResolver::default().resolve(header, overrides)
}
