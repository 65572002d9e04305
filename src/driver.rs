//! Sync driver state machine
//!
//! Drives one batch at a time through staging and loading:
//! `Idle → Discovering → Filtering → per batch {Staging → Loading} → Idle`.
//! Failures are isolated per batch; one bad batch never aborts the run.
//! The driver trusts no in-memory state across restarts — work remaining
//! is always re-derived from the sync ledger, so a crash mid-batch just
//! means that batch is reattempted from scratch, which the loader's
//! transactional delete-then-insert makes idempotent.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::WarehouseConfig;
use crate::source::{ExportBatch, ExportSource, SourceError};
use crate::staging::{StagedFile, StagingGateway, render_rows};
use crate::warehouse::{LoadOutcome, Warehouse, WarehouseError};

/// Base delay for the first retry
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Ceiling for any single backoff delay
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Error type for whole-run failures.
///
/// Per-batch failures never surface here; they land in the summary.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Batch discovery against the export source failed
    #[error("discovery failed: {0}")]
    Source(#[from] SourceError),

    /// Ledger bookkeeping against the warehouse failed
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// Terminal state of one batch within a run
#[derive(Debug, Clone, PartialEq)]
pub enum BatchStatus {
    /// Batch committed; carries the row count the warehouse reported
    Loaded {
        /// Rows the bulk ingest reported
        rows: u64,
    },
    /// Batch failed; carries the failure for manual replay
    Failed {
        /// What went wrong, batch id included
        error: String,
    },
}

/// Result of one batch within a run
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// Batch the outcome belongs to
    pub batch_id: String,
    /// Rows the source claimed for the batch
    pub row_count: usize,
    /// How the batch ended
    pub status: BatchStatus,
}

/// Result of one full driver cycle
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    /// Candidate batches the source listed
    pub batches_discovered: usize,
    /// Batches filtered out as already committed
    pub batches_skipped: usize,
    /// Batches committed this cycle
    pub batches_loaded: usize,
    /// Total rows committed this cycle
    pub rows_loaded: u64,
    /// Per-batch outcomes, in processing order
    pub outcomes: Vec<BatchOutcome>,
    /// Failures, batch ids included
    pub errors: Vec<String>,
    /// Duration of the cycle in milliseconds
    pub duration_ms: u64,
}

impl SyncSummary {
    /// Check if the cycle completed without batch failures
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Exponential backoff as a pure function of the attempt count.
///
/// Attempt 1 waits the base delay, each further attempt doubles it,
/// capped at [`BACKOFF_CAP`].
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let delay = BACKOFF_BASE.saturating_mul(1u32 << exp);
    delay.min(BACKOFF_CAP)
}

/// The sync driver: polls for batches and drives each one through
/// conversion, staging, and loading.
pub struct SyncDriver<S, G, W> {
    source: S,
    staging: G,
    warehouse: W,
    config: WarehouseConfig,
    cursor: Option<DateTime<Utc>>,
}

impl<S, G, W> SyncDriver<S, G, W>
where
    S: ExportSource,
    G: StagingGateway,
    W: Warehouse,
{
    /// Create a driver over validated configuration
    pub fn new(source: S, staging: G, warehouse: W, config: WarehouseConfig) -> Self {
        Self {
            source,
            staging,
            warehouse,
            config,
            cursor: None,
        }
    }

    /// Access the warehouse backend
    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    /// Run one full cycle: discover, filter, process each eligible batch.
    ///
    /// Batches are processed sequentially; at most one load is in flight
    /// per schema at any time.
    pub async fn run_once(&mut self) -> Result<SyncSummary, SyncError> {
        let start = Instant::now();
        let mut summary = SyncSummary::default();

        // Discovering
        let batches = self.source.list_batches_since(self.cursor).await?;
        summary.batches_discovered = batches.len();

        // Filtering: the ledger, not memory, decides what remains
        let loaded = self.warehouse.loaded_batch_ids().await?;

        tracing::info!(
            source = self.source.name(),
            discovered = batches.len(),
            committed = loaded.len(),
            "starting sync cycle"
        );

        let mut newest_produced_at = self.cursor;

        for batch in &batches {
            if loaded.contains(&batch.id) {
                tracing::debug!(batch_id = %batch.id, "already committed, skipping");
                summary.batches_skipped += 1;
                continue;
            }

            let outcome = self.process_batch(batch).await;
            match &outcome.status {
                BatchStatus::Loaded { rows } => {
                    summary.batches_loaded += 1;
                    summary.rows_loaded += rows;
                }
                BatchStatus::Failed { error } => {
                    summary.errors.push(error.clone());
                }
            }
            summary.outcomes.push(outcome);

            if newest_produced_at.is_none_or(|ts| batch.produced_at > ts) {
                newest_produced_at = Some(batch.produced_at);
            }
        }

        // Advance the cursor only on a clean cycle, so failed batches
        // are rediscovered next time. The ledger filter keeps this
        // correct either way; the cursor is purely advisory.
        if summary.errors.is_empty() {
            self.cursor = newest_produced_at;
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            loaded = summary.batches_loaded,
            skipped = summary.batches_skipped,
            failed = summary.errors.len(),
            rows = summary.rows_loaded,
            duration_ms = summary.duration_ms,
            "sync cycle finished"
        );

        Ok(summary)
    }

    /// Run cycles until the stop flag is raised
    pub async fn run(&mut self, stop: Arc<AtomicBool>) -> Result<(), SyncError> {
        let interval = self.config.poll_interval();

        while !stop.load(Ordering::Relaxed) {
            match self.run_once().await {
                Ok(summary) if !summary.is_success() => {
                    tracing::warn!(
                        failed = summary.errors.len(),
                        "cycle finished with failed batches"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    // whole-run failures are worth retrying next cycle too
                    tracing::error!("sync cycle failed: {e}");
                }
            }

            tokio::time::sleep(interval).await;
        }

        tracing::info!("sync driver stopped");
        Ok(())
    }

    /// Drive one batch through Staging and Loading
    async fn process_batch(&self, batch: &ExportBatch) -> BatchOutcome {
        tracing::info!(
            batch_id = %batch.id,
            rows = batch.row_count,
            "processing batch"
        );

        let staged = match self.stage_batch(batch).await {
            Ok(staged) => staged,
            Err(error) => {
                tracing::error!(batch_id = %batch.id, "staging failed: {error}");
                return BatchOutcome {
                    batch_id: batch.id.clone(),
                    row_count: batch.row_count,
                    status: BatchStatus::Failed { error },
                };
            }
        };

        let status = self.load_staged(&staged, batch).await;

        // staged files are ephemeral: drop them after commit or abandonment
        if let Err(e) = self.staging.delete(&staged).await {
            tracing::warn!(batch_id = %batch.id, "staged file cleanup failed: {e}");
        }

        if let BatchStatus::Failed { error } = &status {
            tracing::error!(batch_id = %batch.id, "batch failed: {error}");
        }

        BatchOutcome {
            batch_id: batch.id.clone(),
            row_count: batch.row_count,
            status,
        }
    }

    /// Staging phase: fetch, convert, park in the staging store.
    ///
    /// Fetch and store failures retry with backoff; an encoding failure
    /// is deterministic and fails the batch immediately.
    async fn stage_batch(&self, batch: &ExportBatch) -> Result<StagedFile, String> {
        let retry_limit = self.config.sync.retry_limit;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.try_stage(batch).await {
                Ok(staged) => return Ok(staged),
                Err(StageAttemptError::Encode(message)) => return Err(message),
                Err(StageAttemptError::Retryable(message)) => {
                    if attempt > retry_limit {
                        return Err(format!(
                            "staging failed for batch {} after {} attempts: {}",
                            batch.id, attempt, message
                        ));
                    }
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        batch_id = %batch.id,
                        attempt,
                        "staging attempt failed, retrying in {:?}: {message}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn try_stage(&self, batch: &ExportBatch) -> Result<StagedFile, StageAttemptError> {
        let rows = self
            .source
            .fetch_rows(batch)
            .await
            .map_err(|e| StageAttemptError::Retryable(e.to_string()))?;

        let bytes = render_rows(&rows, &batch.id, self.config.warehouse.varchar_max)
            .map_err(|e| StageAttemptError::Encode(format!("batch {}: {}", batch.id, e)))?;

        self.staging
            .put(&batch.id, &bytes, rows.len())
            .await
            .map_err(|e| StageAttemptError::Retryable(e.to_string()))
    }

    /// Loading phase: bulk-ingest with retry on transient failures
    async fn load_staged(&self, staged: &StagedFile, batch: &ExportBatch) -> BatchStatus {
        let retry_limit = self.config.sync.retry_limit;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let outcome = LoadOutcome::from(self.warehouse.load_batch(staged, batch).await);

            match outcome {
                LoadOutcome::Loaded(rows) => {
                    tracing::info!(batch_id = %batch.id, rows, "batch committed");
                    return BatchStatus::Loaded { rows };
                }
                LoadOutcome::Retryable(e) => {
                    if attempt > retry_limit {
                        return BatchStatus::Failed {
                            error: format!("retries exhausted after {attempt} attempts: {e}"),
                        };
                    }
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        batch_id = %batch.id,
                        attempt,
                        "load attempt failed, retrying in {:?}: {e}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                LoadOutcome::Fatal(e) => {
                    return BatchStatus::Failed {
                        error: e.to_string(),
                    };
                }
            }
        }
    }
}

/// Outcome of one staging attempt
enum StageAttemptError {
    /// Deterministic conversion failure, not worth retrying
    Encode(String),
    /// Fetch or store failure, retry with backoff
    Retryable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_base() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(2));
        assert_eq!(backoff_delay(4), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff_delay(10), BACKOFF_CAP);
        assert_eq!(backoff_delay(u32::MAX), BACKOFF_CAP);
    }

    #[test]
    fn test_summary_success() {
        let mut summary = SyncSummary::default();
        assert!(summary.is_success());
        summary.errors.push("batch b1 failed".to_string());
        assert!(!summary.is_success());
    }
}
