//! Postal Lookup Aggregator.
//!
//! Asks an ordered list of providers about one postal code and reconciles
//! their answers into a [`LookupVerdict`]:
//!
//! ```text
//!  batch 1: [p1, p2] ──▶ ≥2 answers? ──yes──▶ reconcile(primary, second opinion)
//!                           │ no
//!  batch 2: [p3, p4] ──▶ ... ──▶ no answers at all ──▶ Unverified
//! ```
//!
//! Providers inside a batch run concurrently, each under its own timeout.
//! A failing provider is reported to the [`EventSink`] and otherwise
//! ignored; provider failures never leave this module as errors.

pub mod provider;

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;

use crate::config::LookupConfig;
use crate::error::{ConfigError, ConfigResult, LookupError};
use crate::events::{EventSink, RunEvent};
use crate::mapping::ColumnMapping;
use crate::models::{
    CanonicalField, Correction, CorrectionSource, Finding, FindingCode, LookupResult,
    NormalizedRecord,
};
use crate::normalize::{collapse_whitespace, fold};

pub use provider::{parse_response, HttpProvider, PostalProvider};

/// Answers needed before the aggregator stops asking.
const WANTED_ANSWERS: usize = 2;

/// Address fields a confirmed lookup may correct.
const ADDRESS_FIELDS: [CanonicalField; 4] = [
    CanonicalField::Street,
    CanonicalField::Neighborhood,
    CanonicalField::City,
    CanonicalField::State,
];

/// Why no address could be attached to a postal code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnverifiedReason {
    AllProvidersFailed,
    BudgetExhausted,
}

/// Reconciled outcome for one postal code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum LookupVerdict {
    /// Primary answer, agreed by a second provider when one answered.
    Confirmed {
        result: LookupResult,
        second_opinion: Option<LookupResult>,
    },
    /// Two providers disagree on city or state.
    Ambiguous {
        primary: LookupResult,
        secondary: LookupResult,
    },
    Unverified { reason: UnverifiedReason },
}

/// City and state agree after folding accents, case and whitespace.
pub fn agrees(a: &LookupResult, b: &LookupResult) -> bool {
    fold(&a.city) == fold(&b.city) && a.state.trim().to_uppercase() == b.state.trim().to_uppercase()
}

/// Turn the answers (in provider priority order) into a verdict.
pub fn reconcile(answers: Vec<LookupResult>) -> LookupVerdict {
    let mut answers = answers.into_iter();
    let Some(primary) = answers.next() else {
        return LookupVerdict::Unverified {
            reason: UnverifiedReason::AllProvidersFailed,
        };
    };
    match answers.next() {
        None => LookupVerdict::Confirmed {
            result: primary,
            second_opinion: None,
        },
        Some(secondary) if agrees(&primary, &secondary) => LookupVerdict::Confirmed {
            result: primary,
            second_opinion: Some(secondary),
        },
        Some(secondary) => LookupVerdict::Ambiguous { primary, secondary },
    }
}

fn same_text(a: &str, b: &str) -> bool {
    collapse_whitespace(a).to_lowercase() == collapse_whitespace(b).to_lowercase()
}

impl LookupVerdict {
    /// Findings and corrections this verdict implies for one row.
    ///
    /// Only mapped address fields are ever corrected.
    pub fn row_outcome(
        &self,
        record: &NormalizedRecord,
        mapping: &ColumnMapping,
    ) -> (Vec<Finding>, Vec<Correction>) {
        let row = record.row_index;
        let postal_code = record.get(CanonicalField::PostalCode);
        match self {
            LookupVerdict::Confirmed { result, .. } => {
                let corrections = ADDRESS_FIELDS
                    .iter()
                    .filter(|field| mapping.is_mapped(**field))
                    .filter_map(|&field| {
                        let suggested = result.value_for(field)?;
                        let entered = record.get(field);
                        if suggested.is_empty() || same_text(entered, suggested) {
                            return None;
                        }
                        Some(Correction {
                            row_index: row,
                            field,
                            original_value: entered.to_string(),
                            suggested_value: suggested.to_string(),
                            source: CorrectionSource::LookupProvider(result.provider_id.clone()),
                        })
                    })
                    .collect();
                (Vec::new(), corrections)
            }
            LookupVerdict::Ambiguous { primary, secondary } => {
                let message = format!(
                    "Providers disagree for postal code {}: {} says {}/{}, {} says {}/{}",
                    postal_code,
                    primary.provider_id,
                    primary.city,
                    primary.state,
                    secondary.provider_id,
                    secondary.city,
                    secondary.state
                );
                let finding = Finding::warning(
                    row,
                    CanonicalField::PostalCode,
                    FindingCode::AddressAmbiguous,
                    message,
                );
                (vec![finding], Vec::new())
            }
            LookupVerdict::Unverified { reason } => {
                let message = match reason {
                    UnverifiedReason::AllProvidersFailed => {
                        format!("Address for postal code {} could not be verified", postal_code)
                    }
                    UnverifiedReason::BudgetExhausted => format!(
                        "Address for postal code {} was not verified: lookup time budget exhausted",
                        postal_code
                    ),
                };
                let finding = Finding::warning(
                    row,
                    CanonicalField::PostalCode,
                    FindingCode::AddressUnverified,
                    message,
                );
                (vec![finding], Vec::new())
            }
        }
    }
}

/// Ordered providers plus the batching policy.
pub struct PostalLookup {
    providers: Vec<Arc<dyn PostalProvider>>,
    providers_per_batch: usize,
    events: EventSink,
}

impl PostalLookup {
    pub fn new(
        providers: Vec<Arc<dyn PostalProvider>>,
        providers_per_batch: usize,
        events: EventSink,
    ) -> Self {
        Self {
            providers,
            providers_per_batch: providers_per_batch.max(1),
            events,
        }
    }

    /// HTTP providers from configuration, sharing one client.
    pub fn from_config(config: &LookupConfig, events: EventSink) -> ConfigResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?;

        let providers = config
            .providers
            .iter()
            .map(|p| {
                Arc::new(HttpProvider::new(p.clone(), client.clone(), config.provider_timeout()))
                    as Arc<dyn PostalProvider>
            })
            .collect();

        Ok(Self::new(providers, config.providers_per_batch, events))
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    async fn query(provider: &Arc<dyn PostalProvider>, postal_code: &str) -> Result<LookupResult, LookupError> {
        match tokio::time::timeout(provider.timeout(), provider.lookup(postal_code)).await {
            Ok(result) => result,
            Err(_) => Err(LookupError::Timeout),
        }
    }

    /// Ask providers batch by batch until two have answered.
    pub async fn lookup(&self, postal_code: &str) -> LookupVerdict {
        let mut answers = Vec::with_capacity(WANTED_ANSWERS);

        for batch in self.providers.chunks(self.providers_per_batch) {
            let results = join_all(batch.iter().map(|p| Self::query(p, postal_code))).await;

            for (provider, result) in batch.iter().zip(results) {
                match result {
                    Ok(answer) => answers.push(answer),
                    Err(err) => self.events.emit(RunEvent::ProviderFailed {
                        provider: provider.id().to_string(),
                        postal_code: postal_code.to_string(),
                        reason: err.to_string(),
                    }),
                }
            }

            if answers.len() >= WANTED_ANSWERS {
                break;
            }
        }

        reconcile(answers)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted providers shared by unit tests.

    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub struct FakeProvider {
        pub id: String,
        pub answer: Result<(String, String, String, String), LookupError>,
        pub delay: Duration,
        pub calls: AtomicUsize,
    }

    impl FakeProvider {
        pub fn answering(id: &str, street: &str, neighborhood: &str, city: &str, state: &str) -> Self {
            Self {
                id: id.to_string(),
                answer: Ok((street.into(), neighborhood.into(), city.into(), state.into())),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(id: &str, err: LookupError) -> Self {
            Self {
                id: id.to_string(),
                answer: Err(err),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PostalProvider for FakeProvider {
        fn id(&self) -> &str {
            &self.id
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(200)
        }

        async fn lookup(&self, postal_code: &str) -> Result<LookupResult, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let (street, neighborhood, city, state) = self.answer.clone()?;
            Ok(LookupResult::new(&self.id, postal_code, street, neighborhood, city, state))
        }
    }
}
