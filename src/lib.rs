//! Warehouse Sync - batch sync engine for exported event data
//!
//! Moves discrete batches of exported event data from an upstream export
//! source into a columnar analytics warehouse, guaranteeing each batch is
//! ingested at most once across process restarts, network failures, and
//! partial warehouse-side failures.
//!
//! The load path: the driver discovers candidate batches, filters those
//! the sync ledger already records as committed, converts the rest into
//! the warehouse text-load format, parks them in staging, and bulk-loads
//! each one inside a single warehouse transaction that also writes the
//! ledger record. A crash at any point leaves either everything or
//! nothing, so restarts simply reattempt from the ledger.

pub mod config;
pub mod driver;
pub mod encode;
pub mod source;
pub mod staging;
pub mod warehouse;

// Re-export commonly used types
pub use config::{ConfigError, WarehouseConfig, sample_config};
pub use driver::{BatchOutcome, BatchStatus, SyncDriver, SyncError, SyncSummary, backoff_delay};
pub use encode::{EncodeError, WarehouseValue, encode};
pub use source::{
    ExportBatch, ExportField, ExportRow, ExportSource, FieldSpec, SourceError, parse_jsonl_rows,
};
pub use staging::{FsStaging, StagedFile, StagingError, StagingGateway, render_rows};
pub use warehouse::{
    LoadError, LoadOutcome, PostgresWarehouse, SyncLedger, SyncRecord, Warehouse, WarehouseError,
    WarehouseResult,
};
