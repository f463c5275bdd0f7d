// Event sinks: how pipeline progress reaches a consumer

use crate::error::Result;
use crate::storage::HostRecord;
use async_trait::async_trait;
use serde::Serialize;

/// One step of an enrichment run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum EnrichEvent {
    /// Work on a token has started
    Processing { ip: String },
    /// The token failed; the run continues with the next one
    Error { ip: String, error: String },
    /// The token was looked up and persisted
    Enriched { record: HostRecord },
    /// Every token has been handled
    Complete { enriched: usize, failed: usize },
}

impl EnrichEvent {
    /// Event name used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            EnrichEvent::Processing { .. } => "processing",
            EnrichEvent::Error { .. } => "error",
            EnrichEvent::Enriched { .. } => "enriched",
            EnrichEvent::Complete { .. } => "complete",
        }
    }
}

/// Receives pipeline events in order.
///
/// Returning `IpScopeError::StreamClosed` stops the run; records already
/// committed stay committed.
#[async_trait]
pub trait EventSink: Send {
    async fn emit(&mut self, event: EnrichEvent) -> Result<()>;
}

/// Whether a finished batch had any per-item failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Every token was enriched
    Complete,
    /// At least one token failed
    Partial,
}

/// Result of a buffered run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub enriched_ips: Vec<HostRecord>,
    pub errors: Vec<String>,
}

impl BatchOutcome {
    pub fn status(&self) -> BatchStatus {
        if self.errors.is_empty() {
            BatchStatus::Complete
        } else {
            BatchStatus::Partial
        }
    }
}

/// Sink for buffered delivery: keeps successes and errors until the run ends
#[derive(Debug, Default)]
pub struct BatchCollector {
    outcome: BatchOutcome,
}

impl BatchCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_outcome(self) -> BatchOutcome {
        self.outcome
    }
}

#[async_trait]
impl EventSink for BatchCollector {
    async fn emit(&mut self, event: EnrichEvent) -> Result<()> {
        match event {
            EnrichEvent::Enriched { record } => self.outcome.enriched_ips.push(record),
            EnrichEvent::Error { error, .. } => self.outcome.errors.push(error),
            EnrichEvent::Processing { .. } | EnrichEvent::Complete { .. } => {}
        }
        Ok(())
    }
}
