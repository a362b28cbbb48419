//! Validation orchestrator.
//!
//! Runs the format rules over every row, then (in full mode) resolves each
//! distinct postal code through the [`PostalLookup`] on a bounded window of
//! concurrent lookups. Rows are merged into the [`Report`] strictly in input
//! order: a row waits in the reorder buffer until its own lookup and every
//! earlier row are done.
//!
//! ```text
//!  rows ──▶ check_record ──▶ buffer ──(in order)──▶ Report
//!                              ▲
//!  distinct CEPs ──▶ [window of N lookups] ──▶ verdicts
//! ```
//!
//! The coordinator waits on three things at once: cancellation, the lookup
//! budget deadline and the next finished lookup. When the budget runs out
//! every unresolved code becomes "unverified" and in-flight requests are
//! dropped.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::record::{check_record, RowCheck};
use crate::config::EngineConfig;
use crate::error::{ConfigResult, RunError};
use crate::events::{EventSink, RunEvent};
use crate::lookup::{LookupVerdict, PostalLookup, UnverifiedReason};
use crate::mapping::ColumnMapping;
use crate::models::{RawRecord, Report, ValidationMode};

/// Progress is reported every this many merged rows.
const PROGRESS_EVERY: usize = 100;

async fn lookup_task(lookup: Arc<PostalLookup>, index: usize, code: String) -> (usize, LookupVerdict) {
    let verdict = lookup.lookup(&code).await;
    (index, verdict)
}

/// Runs validation jobs. One validator can serve many runs; cancelling its
/// token stops whichever run is in progress and every later one.
pub struct Validator {
    config: EngineConfig,
    lookup: Option<Arc<PostalLookup>>,
    events: EventSink,
    cancel: CancellationToken,
}

impl Validator {
    /// Format rules only until a lookup is attached.
    pub fn new(config: EngineConfig, events: EventSink) -> Self {
        Self {
            config,
            lookup: None,
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Validator with HTTP providers from `config.lookup`.
    pub fn from_config(config: EngineConfig, events: EventSink) -> ConfigResult<Self> {
        let lookup = PostalLookup::from_config(&config.lookup, events.clone())?;
        Ok(Self::new(config, events).with_lookup(Arc::new(lookup)))
    }

    pub fn with_lookup(mut self, lookup: Arc<PostalLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Validate rows that were read with `mapping`.
    ///
    /// Returns `RunError::Cancelled` (and no report) if cancelled.
    pub async fn validate(
        &self,
        rows: &[RawRecord],
        mapping: &ColumnMapping,
        mode: ValidationMode,
    ) -> Result<Report, RunError> {
        let mut run = Run::new(self, rows.len(), mapping, mode);
        self.events.emit(RunEvent::RunStarted {
            run_id: run.report.run_id,
            total_rows: run.total,
            mode,
        });

        let mut checks = Vec::with_capacity(rows.len());
        for raw in rows {
            if self.cancel.is_cancelled() {
                return Err(run.cancelled(0));
            }
            checks.push(check_record(raw, mapping, &self.config.mapping.required));
        }

        let lookup = match (mode, &self.lookup) {
            (ValidationMode::Full, Some(lookup)) => Some(Arc::clone(lookup)),
            (ValidationMode::Full, None) => {
                tracing::warn!("full validation requested without providers, checking format only");
                None
            }
            (ValidationMode::Quick, _) => None,
        };

        match lookup {
            Some(lookup) => self.merge_with_lookups(&mut run, checks, lookup).await?,
            None => {
                let keys = vec![None; checks.len()];
                run.merge_ready(checks.into_iter().zip(keys), &[])?;
            }
        }

        Ok(run.finish())
    }

    async fn merge_with_lookups(
        &self,
        run: &mut Run<'_>,
        checks: Vec<RowCheck>,
        lookup: Arc<PostalLookup>,
    ) -> Result<(), RunError> {
        // Distinct codes in first-appearance order; each row points at one.
        let mut codes: Vec<String> = Vec::new();
        let mut code_index: HashMap<String, usize> = HashMap::new();
        let keys: Vec<Option<usize>> = checks
            .iter()
            .map(|check| {
                check.lookup_key().map(|code| {
                    *code_index.entry(code.to_string()).or_insert_with(|| {
                        codes.push(code.to_string());
                        codes.len() - 1
                    })
                })
            })
            .collect();

        let mut verdicts: Vec<Option<LookupVerdict>> = vec![None; codes.len()];
        let mut buffer = checks.into_iter().zip(keys).peekable();

        let window = self.config.lookup.max_concurrent_lookups.max(1);
        let deadline = Instant::now() + self.config.lookup.lookup_budget();
        let mut queued = codes.iter().cloned().enumerate();
        let mut in_flight = FuturesUnordered::new();

        for (index, code) in queued.by_ref().take(window) {
            in_flight.push(lookup_task(Arc::clone(&lookup), index, code));
        }

        loop {
            run.merge_ready(
                std::iter::from_fn(|| {
                    let ready = match buffer.peek() {
                        Some((_, Some(index))) => verdicts[*index].is_some(),
                        Some((_, None)) => true,
                        None => false,
                    };
                    if ready {
                        buffer.next()
                    } else {
                        None
                    }
                }),
                &verdicts,
            )?;

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    return Err(run.cancelled(run.processed));
                }
                _ = tokio::time::sleep_until(deadline) => {
                    let mut unresolved = 0;
                    for verdict in verdicts.iter_mut().filter(|v| v.is_none()) {
                        *verdict = Some(LookupVerdict::Unverified {
                            reason: UnverifiedReason::BudgetExhausted,
                        });
                        unresolved += 1;
                    }
                    self.events.emit(RunEvent::LookupBudgetExhausted {
                        run_id: run.report.run_id,
                        unresolved,
                    });
                    break;
                }
                Some((index, verdict)) = in_flight.next() => {
                    verdicts[index] = Some(verdict);
                    if let Some((index, code)) = queued.next() {
                        in_flight.push(lookup_task(Arc::clone(&lookup), index, code));
                    }
                }
            }
        }

        // In-flight lookups are dropped here; every verdict is now known.
        drop(in_flight);
        run.merge_ready(buffer, &verdicts)
    }
}

/// State of one run: the report being built and the merge cursor.
struct Run<'a> {
    validator: &'a Validator,
    mapping: &'a ColumnMapping,
    report: Report,
    total: usize,
    processed: usize,
}

impl<'a> Run<'a> {
    fn new(validator: &'a Validator, total: usize, mapping: &'a ColumnMapping, mode: ValidationMode) -> Self {
        let now = Utc::now();
        Self {
            validator,
            mapping,
            report: Report {
                run_id: Uuid::new_v4(),
                mode,
                mapping: mapping.clone(),
                findings: Vec::new(),
                corrections: Vec::new(),
                total_rows: total,
                rows_with_errors: 0,
                started_at: now,
                finished_at: now,
            },
            total,
            processed: 0,
        }
    }

    /// Append rows to the report in the order given.
    fn merge_ready<I>(&mut self, rows: I, verdicts: &[Option<LookupVerdict>]) -> Result<(), RunError>
    where
        I: IntoIterator<Item = (RowCheck, Option<usize>)>,
    {
        for (mut check, key) in rows {
            if self.validator.cancel.is_cancelled() {
                return Err(self.cancelled(self.processed));
            }

            if let Some(verdict) = key.and_then(|i| verdicts.get(i)).and_then(Option::as_ref) {
                let (findings, corrections) = verdict.row_outcome(&check.record, self.mapping);
                check.findings.extend(findings);
                check.corrections.extend(corrections);
            }

            if check.has_error() {
                self.report.rows_with_errors += 1;
            }
            self.report.findings.append(&mut check.findings);
            self.report.corrections.append(&mut check.corrections);
            self.processed += 1;

            if self.processed % PROGRESS_EVERY == 0 {
                self.validator.events.emit(RunEvent::Progress {
                    run_id: self.report.run_id,
                    processed: self.processed,
                    total: self.total,
                });
            }
        }
        Ok(())
    }

    fn cancelled(&self, processed: usize) -> RunError {
        self.validator.events.emit(RunEvent::RunCancelled {
            run_id: self.report.run_id,
            processed,
        });
        RunError::Cancelled {
            processed,
            total: self.total,
        }
    }

    fn finish(self) -> Report {
        let mut report = self.report;
        report.finished_at = Utc::now();
        self.validator.events.emit(RunEvent::Progress {
            run_id: report.run_id,
            processed: self.processed,
            total: self.total,
        });
        self.validator.events.emit(RunEvent::RunFinished {
            run_id: report.run_id,
            total_rows: report.total_rows,
            rows_with_errors: report.rows_with_errors,
            findings: report.findings.len(),
            corrections: report.corrections.len(),
        });
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LookupError;
    use crate::lookup::testing::FakeProvider;
    use crate::lookup::PostalProvider;
    use crate::mapping::resolve_mapping;
    use crate::models::{CanonicalField, FindingCode};
    use std::time::Duration;

    const HEADER: [&str; 7] = ["NOME", "CEP", "ENDERECO", "NUMERO", "BAIRRO", "CIDADE", "UF"];

    fn rows(ceps: &[&str]) -> (Vec<RawRecord>, ColumnMapping) {
        let header: Vec<String> = HEADER.iter().map(|s| s.to_string()).collect();
        let mapping = resolve_mapping(&header, None).unwrap();
        let header = Arc::new(header);
        let records = ceps
            .iter()
            .enumerate()
            .map(|(i, cep)| {
                let values = ["Ana", cep, "Avenida Paulista", "10", "Bela Vista", "São Paulo", "SP"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                RawRecord::new(i + 2, Arc::clone(&header), values)
            })
            .collect();
        (records, mapping)
    }

    fn validator_with(providers: Vec<Arc<FakeProvider>>, config: EngineConfig) -> Validator {
        let events = EventSink::default();
        let providers = providers
            .into_iter()
            .map(|p| p as Arc<dyn PostalProvider>)
            .collect();
        let lookup = PostalLookup::new(providers, config.lookup.providers_per_batch, events.clone());
        Validator::new(config, events).with_lookup(Arc::new(lookup))
    }

    #[tokio::test]
    async fn test_quick_mode_skips_lookups() {
        let provider = Arc::new(FakeProvider::answering("a", "X", "Y", "Campinas", "SP"));
        let validator = validator_with(vec![provider.clone()], EngineConfig::default());
        let (records, mapping) = rows(&["01310100"]);

        let report = validator
            .validate(&records, &mapping, ValidationMode::Quick)
            .await
            .unwrap();
        assert_eq!(provider.calls(), 0);
        assert_eq!(report.total_rows, 1);
        assert_eq!(report.corrections.len(), 1);
        assert_eq!(report.corrections[0].suggested_value, "01310-100");
    }

    #[tokio::test]
    async fn test_each_code_looked_up_once() {
        let provider = Arc::new(FakeProvider::answering(
            "a", "Avenida Paulista", "Bela Vista", "São Paulo", "SP",
        ));
        let validator = validator_with(vec![provider.clone()], EngineConfig::default());
        let (records, mapping) = rows(&["01310-100", "01310100", "01310-100", "123"]);

        let report = validator
            .validate(&records, &mapping, ValidationMode::Full)
            .await
            .unwrap();
        assert_eq!(provider.calls(), 1);
        assert_eq!(report.rows_with_errors, 1);
        // the bad code is never looked up, so no unverified warning for it
        assert!(report
            .findings
            .iter()
            .all(|f| f.code != FindingCode::AddressUnverified));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_marks_unverified() {
        let slow = Arc::new(
            FakeProvider::answering("slow", "R", "B", "Recife", "PE").delayed(Duration::from_millis(150)),
        );
        let mut config = EngineConfig::default();
        config.lookup.lookup_budget_ms = 20;
        let validator = validator_with(vec![slow], config);
        let mut events = validator.events().subscribe();
        let (records, mapping) = rows(&["50050-000", "50060-000"]);

        let report = validator
            .validate(&records, &mapping, ValidationMode::Full)
            .await
            .unwrap();
        let unverified: Vec<_> = report
            .findings
            .iter()
            .filter(|f| f.code == FindingCode::AddressUnverified)
            .collect();
        assert_eq!(unverified.len(), 2);
        assert_eq!(unverified[0].row_index, 2);
        assert_eq!(unverified[0].field, CanonicalField::PostalCode);

        let mut exhausted = false;
        while let Ok(event) = events.try_recv() {
            if let RunEvent::LookupBudgetExhausted { unresolved, .. } = event {
                assert_eq!(unresolved, 2);
                exhausted = true;
            }
        }
        assert!(exhausted);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let provider = Arc::new(FakeProvider::failing("a", LookupError::NotFound));
        let validator = validator_with(vec![provider], EngineConfig::default());
        validator.cancellation_token().cancel();
        let (records, mapping) = rows(&["01310-100", "20040-020"]);

        let err = validator
            .validate(&records, &mapping, ValidationMode::Full)
            .await
            .unwrap_err();
        assert_eq!(err, RunError::Cancelled { processed: 0, total: 2 });
    }

    #[tokio::test]
    async fn test_cancel_during_lookups() {
        let slow = Arc::new(
            FakeProvider::answering("slow", "R", "B", "Recife", "PE").delayed(Duration::from_millis(150)),
        );
        let validator = validator_with(vec![slow], EngineConfig::default());
        let token = validator.cancellation_token();
        let (records, mapping) = rows(&["50050-000", "50060-000"]);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let result = validator
            .validate(&records, &mapping, ValidationMode::Full)
            .await;
        assert!(matches!(result, Err(RunError::Cancelled { total: 2, .. })));
    }

    #[tokio::test]
    async fn test_without_lookup_full_mode_is_format_only() {
        let validator = Validator::new(EngineConfig::default(), EventSink::default());
        let (records, mapping) = rows(&["01310-100"]);
        let report = validator
            .validate(&records, &mapping, ValidationMode::Full)
            .await
            .unwrap();
        assert!(report.findings.is_empty());
        assert_eq!(report.mode, ValidationMode::Full);
    }
}
