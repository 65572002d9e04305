//! Warehouse collaborator boundary
//!
//! The warehouse is a transactional bulk-ingest capable store: it
//! exposes a bulk text-load operation against the export table and
//! ordinary transactional DML against the sync ledger. The one hard
//! rule of this module: a batch's rows and its sync record become
//! visible in the same atomic unit, or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::source::ExportBatch;
use crate::staging::StagedFile;

pub mod ledger;
pub mod postgres;

pub use ledger::{SyncLedger, SyncRecord};
pub use postgres::PostgresWarehouse;

/// Error type for warehouse bookkeeping operations
#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    /// Failed to connect to the warehouse
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("migration failed: {0}")]
    MigrationFailed(String),
}

/// Result type for warehouse bookkeeping operations
pub type WarehouseResult<T> = Result<T, WarehouseError>;

/// A bulk-load failure, split by whether retrying can help
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Retryable infrastructure failure: connection drop, serialization
    /// conflict, resource limit
    #[error("transient load failure for batch {batch_id}: {message}")]
    Transient {
        /// Batch whose load failed
        batch_id: String,
        /// Underlying failure
        message: String,
    },

    /// Non-retryable failure: malformed data the warehouse rejects,
    /// schema mismatch
    #[error("permanent load failure for batch {batch_id}: {message}")]
    Permanent {
        /// Batch whose load failed
        batch_id: String,
        /// Underlying failure
        message: String,
    },
}

impl LoadError {
    /// Whether a retry with backoff is worth attempting
    pub fn is_transient(&self) -> bool {
        matches!(self, LoadError::Transient { .. })
    }

    /// Batch id the failure belongs to
    pub fn batch_id(&self) -> &str {
        match self {
            LoadError::Transient { batch_id, .. } | LoadError::Permanent { batch_id, .. } => {
                batch_id
            }
        }
    }
}

/// Outcome of one load attempt, consumed by the driver's retry loop
#[derive(Debug)]
pub enum LoadOutcome {
    /// Load committed; carries the row count the warehouse reported
    Loaded(u64),
    /// Transient failure, retry with backoff
    Retryable(LoadError),
    /// Permanent failure, surface to the operator
    Fatal(LoadError),
}

impl From<Result<u64, LoadError>> for LoadOutcome {
    fn from(result: Result<u64, LoadError>) -> Self {
        match result {
            Ok(rows) => LoadOutcome::Loaded(rows),
            Err(e) if e.is_transient() => LoadOutcome::Retryable(e),
            Err(e) => LoadOutcome::Fatal(e),
        }
    }
}

/// Warehouse backend trait
///
/// `load_batch` is the bulk loader: it ingests a staged file and writes
/// the batch's sync record inside one transaction, first deleting any
/// rows a failed prior attempt left behind for the same batch id. On
/// any failure the transaction rolls back in full; neither rows nor the
/// sync record may be partially visible.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Create the export and sync tables if absent
    async fn initialize(&self) -> WarehouseResult<()>;

    /// Every batch id currently recorded as committed.
    ///
    /// Reads are consistent: a batch committed by `load_batch` is
    /// visible here before the load reports success.
    async fn loaded_batch_ids(&self) -> WarehouseResult<HashSet<String>>;

    /// Commit watermark: the latest sync record timestamp, if any
    async fn last_committed_at(&self) -> WarehouseResult<Option<DateTime<Utc>>>;

    /// Bulk-ingest a staged file and record the commit atomically
    async fn load_batch(&self, staged: &StagedFile, batch: &ExportBatch)
    -> Result<u64, LoadError>;

    /// Drop sync records committed before the given point.
    ///
    /// Operator tool for re-syncing a time range; returns the number of
    /// ledger rows removed.
    async fn trim_committed_before(&self, cutoff: DateTime<Utc>) -> WarehouseResult<u64>;

    /// Check the warehouse is reachable
    async fn health_check(&self) -> WarehouseResult<bool>;

    /// Backend type name for logging
    fn backend_type(&self) -> &'static str;

    /// Close the warehouse connection
    async fn close(&self) -> WarehouseResult<()>;
}
