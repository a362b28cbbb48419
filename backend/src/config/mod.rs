//! Engine configuration.
//!
//! Loaded from a JSON file where every field is optional, then overridden
//! from the environment (a `.env` file is honoured):
//!
//! | Variable                            | Overrides                         |
//! |-------------------------------------|-----------------------------------|
//! | `POSTCHECK_CONFIG`                  | path of the JSON file             |
//! | `POSTCHECK_PROVIDER_TIMEOUT_MS`     | `lookup.provider_timeout_ms`      |
//! | `POSTCHECK_LOOKUP_BUDGET_MS`        | `lookup.lookup_budget_ms`         |
//! | `POSTCHECK_MAX_CONCURRENT_LOOKUPS`  | `lookup.max_concurrent_lookups`   |
//!
//! CLI flags are applied by the binary on top of this.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::events::DEFAULT_CHANNEL_CAPACITY;
use crate::mapping::{ColumnResolver, DEFAULT_REQUIRED};
use crate::models::CanonicalField;
use crate::parser::{DEFAULT_MAX_SAMPLE_ROWS, DEFAULT_SAMPLE_BYTES};

/// Placeholder substituted with the 8 postal-code digits in provider URLs.
pub const POSTAL_CODE_PLACEHOLDER: &str = "{postal_code}";

pub const ENV_CONFIG: &str = "POSTCHECK_CONFIG";
pub const ENV_PROVIDER_TIMEOUT_MS: &str = "POSTCHECK_PROVIDER_TIMEOUT_MS";
pub const ENV_LOOKUP_BUDGET_MS: &str = "POSTCHECK_LOOKUP_BUDGET_MS";
pub const ENV_MAX_CONCURRENT_LOOKUPS: &str = "POSTCHECK_MAX_CONCURRENT_LOOKUPS";

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnifferConfig {
    /// Bytes read from the start of the file for detection.
    pub sample_bytes: usize,
    pub max_sample_rows: usize,
}

impl Default for SnifferConfig {
    fn default() -> Self {
        Self {
            sample_bytes: DEFAULT_SAMPLE_BYTES,
            max_sample_rows: DEFAULT_MAX_SAMPLE_ROWS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub required: Vec<CanonicalField>,
    /// Header names accepted in addition to the built-in synonyms.
    pub extra_synonyms: BTreeMap<CanonicalField, Vec<String>>,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            required: DEFAULT_REQUIRED.to_vec(),
            extra_synonyms: BTreeMap::new(),
        }
    }
}

impl MappingConfig {
    /// Resolver with the built-in synonyms plus `extra_synonyms`.
    pub fn resolver(&self) -> ColumnResolver {
        self.extra_synonyms
            .iter()
            .fold(ColumnResolver::new(self.required.iter().copied()), |resolver, (field, names)| {
                resolver.with_synonyms(*field, names)
            })
    }
}

/// JSON pointers (RFC 6901) into a custom provider's response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFormat {
    pub street: String,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    /// Pointer to a flag that is truthy when the code is unknown.
    #[serde(default)]
    pub not_found: Option<String>,
}

/// Shape of a provider's JSON response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderFormat {
    BrasilApi,
    OpenCep,
    Postmon,
    BrasilAberto,
    ViaCep,
    Custom(CustomFormat),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    /// URL template containing `{postal_code}`.
    pub url: String,
    pub format: ProviderFormat,
    /// Overrides `lookup.provider_timeout_ms` for this provider.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Environment variable holding the provider credential.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_auth_header")]
    pub auth_header: String,
}

fn default_auth_header() -> String {
    "Authorization".to_string()
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, url: impl Into<String>, format: ProviderFormat) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            format,
            timeout_ms: None,
            api_key_env: None,
            auth_header: default_auth_header(),
        }
    }

    /// Request URL for a postal code (digits only).
    pub fn url_for(&self, postal_code: &str) -> String {
        let digits: String = postal_code.chars().filter(char::is_ascii_digit).collect();
        self.url.replace(POSTAL_CODE_PLACEHOLDER, &digits)
    }

    /// Credential read from `api_key_env`, if configured and set.
    pub fn credential(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| env::var(name).ok())
            .filter(|v| !v.trim().is_empty())
    }
}

/// Public CEP services, in priority order.
pub fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new(
            "brasilapi",
            "https://brasilapi.com.br/api/cep/v1/{postal_code}",
            ProviderFormat::BrasilApi,
        ),
        ProviderConfig::new(
            "opencep",
            "https://opencep.com/v1/{postal_code}",
            ProviderFormat::OpenCep,
        ),
        ProviderConfig::new(
            "postmon",
            "https://api.postmon.com.br/v1/cep/{postal_code}",
            ProviderFormat::Postmon,
        ),
        ProviderConfig::new(
            "brasilaberto",
            "https://api.brasilaberto.com/v1/zipcode/{postal_code}",
            ProviderFormat::BrasilAberto,
        ),
        ProviderConfig::new(
            "viacep",
            "https://viacep.com.br/ws/{postal_code}/json/",
            ProviderFormat::ViaCep,
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    pub providers: Vec<ProviderConfig>,
    pub provider_timeout_ms: u64,
    /// Wall-clock budget for all lookups of one file.
    pub lookup_budget_ms: u64,
    pub max_concurrent_lookups: usize,
    pub providers_per_batch: usize,
    pub user_agent: String,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            provider_timeout_ms: 10_000,
            lookup_budget_ms: 120_000,
            max_concurrent_lookups: 4,
            providers_per_batch: 2,
            user_agent: concat!("postcheck/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl LookupConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn lookup_budget(&self) -> Duration {
        Duration::from_millis(self.lookup_budget_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

// =============================================================================
// Engine Config
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sniffer: SnifferConfig,
    pub mapping: MappingConfig,
    pub lookup: LookupConfig,
    pub events: EventsConfig,
}

impl EngineConfig {
    /// Load from `path`, or from `POSTCHECK_CONFIG`, or defaults; then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let _ = dotenvy::dotenv();

        let from_env = env::var(ENV_CONFIG).ok();
        let path = path.or(from_env.as_deref().map(Path::new));

        let mut config = match path {
            Some(p) => {
                tracing::info!(path = %p.display(), "loading config");
                Self::from_json(&std::fs::read_to_string(p)?)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Apply `POSTCHECK_*` overrides using `var` to read variables.
    pub fn apply_overrides<F>(&mut self, var: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&var, ENV_PROVIDER_TIMEOUT_MS)? {
            self.lookup.provider_timeout_ms = v;
        }
        if let Some(v) = parse_var(&var, ENV_LOOKUP_BUDGET_MS)? {
            self.lookup.lookup_budget_ms = v;
        }
        if let Some(v) = parse_var(&var, ENV_MAX_CONCURRENT_LOOKUPS)? {
            self.lookup.max_concurrent_lookups = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.sniffer.sample_bytes == 0 {
            return Err(ConfigError::Invalid("sniffer.sample_bytes must be positive".into()));
        }
        if self.lookup.max_concurrent_lookups == 0 {
            return Err(ConfigError::Invalid(
                "lookup.max_concurrent_lookups must be at least 1".into(),
            ));
        }
        if self.lookup.providers_per_batch == 0 {
            return Err(ConfigError::Invalid(
                "lookup.providers_per_batch must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.lookup.providers {
            if !seen.insert(provider.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate provider id '{}'",
                    provider.id
                )));
            }
            if !provider.url.contains(POSTAL_CODE_PLACEHOLDER) {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}' url has no {} placeholder",
                    provider.id, POSTAL_CODE_PLACEHOLDER
                )));
            }
        }
        Ok(())
    }
}

fn parse_var<F, T>(var: &F, name: &str) -> ConfigResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match var(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.lookup.max_concurrent_lookups, 4);
        assert_eq!(config.lookup.providers_per_batch, 2);
        assert_eq!(config.lookup.providers[0].id, "brasilapi");
        assert_eq!(config.lookup.providers.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = EngineConfig::from_json(
            r#"{
                "lookup": {
                    "lookup_budget_ms": 5000,
                    "providers": [{
                        "id": "internal",
                        "url": "http://cep.local/{postal_code}",
                        "format": {
                            "kind": "custom",
                            "street": "/addr/street",
                            "neighborhood": "/addr/district",
                            "city": "/addr/city",
                            "state": "/addr/uf"
                        },
                        "api_key_env": "CEP_TOKEN"
                    }]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.lookup.lookup_budget_ms, 5000);
        assert_eq!(config.lookup.provider_timeout_ms, 10_000);
        assert_eq!(config.sniffer, SnifferConfig::default());
        let provider = &config.lookup.providers[0];
        assert_eq!(provider.auth_header, "Authorization");
        assert!(matches!(provider.format, ProviderFormat::Custom(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_LOOKUP_BUDGET_MS, "1500"),
            (ENV_MAX_CONCURRENT_LOOKUPS, " 8 "),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.lookup.lookup_budget_ms, 1500);
        assert_eq!(config.lookup.max_concurrent_lookups, 8);
        assert_eq!(config.lookup.provider_timeout_ms, 10_000);
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(|name| (name == ENV_PROVIDER_TIMEOUT_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_validation_rejects_bad_providers() {
        let mut config = EngineConfig::default();
        config.lookup.providers.push(ProviderConfig::new(
            "viacep",
            "https://example.com/{postal_code}",
            ProviderFormat::ViaCep,
        ));
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.lookup.providers =
            vec![ProviderConfig::new("x", "https://example.com/cep", ProviderFormat::ViaCep)];
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.lookup.max_concurrent_lookups = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extra_synonyms_reach_resolver() {
        let config = EngineConfig::from_json(
            r#"{"mapping": {"required": ["postal_code"], "extra_synonyms": {"postal_code": ["Zip Destino"]}}}"#,
        )
        .unwrap();
        let resolver = config.mapping.resolver();
        assert!(resolver.is_required(CanonicalField::PostalCode));
        assert!(!resolver.is_required(CanonicalField::City));

        let header = vec!["zip destino".to_string()];
        let mapping = resolver.resolve(&header, None).unwrap();
        assert!(mapping.is_mapped(CanonicalField::PostalCode));
    }

    #[test]
    fn test_url_for_uses_digits() {
        let provider = &default_providers()[4];
        assert_eq!(provider.url_for("01310-100"), "https://viacep.com.br/ws/01310100/json/");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"sniffer": {{"max_sample_rows": 10}}}}"#).unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.sniffer.max_sample_rows, 10);
    }
}
