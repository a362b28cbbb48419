//! Run diagnostics.
//!
//! The engine reports what it is doing through an injected [`EventSink`].
//! Every event is logged through `tracing` and broadcast to any subscriber
//! (the API streams them to the browser over SSE). The sink is write-only:
//! nothing in the engine ever reads an event back.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::ValidationMode;

/// Default broadcast buffer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// A diagnostic event emitted during a validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: Uuid,
        total_rows: usize,
        mode: ValidationMode,
    },
    Progress {
        run_id: Uuid,
        processed: usize,
        total: usize,
    },
    ProviderFailed {
        provider: String,
        postal_code: String,
        reason: String,
    },
    LookupBudgetExhausted {
        run_id: Uuid,
        unresolved: usize,
    },
    RunFinished {
        run_id: Uuid,
        total_rows: usize,
        rows_with_errors: usize,
        findings: usize,
        corrections: usize,
    },
    RunCancelled {
        run_id: Uuid,
        processed: usize,
    },
}

impl RunEvent {
    fn log(&self) {
        match self {
            RunEvent::RunStarted { run_id, total_rows, mode } => {
                tracing::info!(%run_id, total_rows, ?mode, "validation started");
            }
            RunEvent::Progress { run_id, processed, total } => {
                tracing::debug!(%run_id, processed, total, "progress");
            }
            RunEvent::ProviderFailed { provider, postal_code, reason } => {
                tracing::warn!(provider = %provider, postal_code = %postal_code, reason = %reason, "provider failed");
            }
            RunEvent::LookupBudgetExhausted { run_id, unresolved } => {
                tracing::warn!(%run_id, unresolved, "lookup budget exhausted");
            }
            RunEvent::RunFinished {
                run_id,
                total_rows,
                rows_with_errors,
                findings,
                corrections,
            } => {
                tracing::info!(
                    %run_id,
                    total_rows,
                    rows_with_errors,
                    findings,
                    corrections,
                    "validation finished"
                );
            }
            RunEvent::RunCancelled { run_id, processed } => {
                tracing::warn!(%run_id, processed, "validation cancelled");
            }
        }
    }
}

/// Broadcasts run events to all subscribers.
///
/// Cloning is cheap; clones share the same channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: broadcast::Sender<RunEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Log and broadcast an event.
    pub fn emit(&self, event: RunEvent) {
        event.log();
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Get a receiver for streaming.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let sink = EventSink::new(8);
        let mut rx = sink.subscribe();
        let run_id = Uuid::new_v4();

        sink.emit(RunEvent::Progress {
            run_id,
            processed: 1,
            total: 2,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            RunEvent::Progress {
                run_id,
                processed: 1,
                total: 2
            }
        );
    }

    #[test]
    fn test_emit_without_subscribers() {
        let sink = EventSink::default();
        sink.emit(RunEvent::RunCancelled {
            run_id: Uuid::new_v4(),
            processed: 0,
        });
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = RunEvent::ProviderFailed {
            provider: "viacep".into(),
            postal_code: "01310-100".into(),
            reason: "Timed out".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "provider_failed");
        assert_eq!(json["provider"], "viacep");
    }
}
