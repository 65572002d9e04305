//! Sync ledger — the durable record of committed batches
//!
//! One row per committed batch, stored inside the warehouse itself so
//! the record and the rows it vouches for live under the same
//! transactional roof. The ledger is the single source of truth for
//! "already loaded": a sync record for an id exists if and only if that
//! batch's rows are durably present in the export table.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use super::{WarehouseError, WarehouseResult};
use crate::config::WarehouseConfig;

/// One committed batch, as recorded in the sync table
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord {
    /// Batch id the record vouches for
    pub batch_id: String,
    /// When the commit happened
    pub committed_at: DateTime<Utc>,
    /// Rows the bulk ingest reported
    pub row_count: i64,
}

/// SQL surface of the sync table.
///
/// `record_commit` takes an open transaction rather than a client:
/// ledger writes only ever happen inside the same atomic unit as the
/// bulk ingest, and the signature keeps it that way.
pub struct SyncLedger {
    qualified_table: String,
}

impl SyncLedger {
    /// Build the ledger over the configured sync table
    pub fn new(config: &WarehouseConfig) -> Self {
        Self {
            qualified_table: config.qualified_sync_table(),
        }
    }

    /// DDL creating the sync table if absent
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             batch_id varchar(256) PRIMARY KEY, \
             committed_at timestamptz NOT NULL, \
             row_count bigint NOT NULL)",
            self.qualified_table
        )
    }

    /// Query returning every committed batch id
    pub fn select_ids_sql(&self) -> String {
        format!("SELECT batch_id FROM {}", self.qualified_table)
    }

    /// Query returning the latest commit timestamp
    pub fn last_committed_sql(&self) -> String {
        format!("SELECT max(committed_at) FROM {}", self.qualified_table)
    }

    /// Parameterized insert of one sync record
    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (batch_id, committed_at, row_count) VALUES ($1, $2, $3)",
            self.qualified_table
        )
    }

    /// Parameterized delete of records committed before a cutoff
    pub fn trim_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE committed_at < $1",
            self.qualified_table
        )
    }

    /// Read every committed batch id
    pub async fn loaded_ids(
        &self,
        client: &tokio_postgres::Client,
    ) -> WarehouseResult<HashSet<String>> {
        let rows = client
            .query(self.select_ids_sql().as_str(), &[])
            .await
            .map_err(|e| WarehouseError::QueryFailed(e.to_string()))?;

        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    /// Read the latest commit timestamp
    pub async fn last_committed_at(
        &self,
        client: &tokio_postgres::Client,
    ) -> WarehouseResult<Option<DateTime<Utc>>> {
        let row = client
            .query_one(self.last_committed_sql().as_str(), &[])
            .await
            .map_err(|e| WarehouseError::QueryFailed(e.to_string()))?;

        Ok(row.get::<_, Option<DateTime<Utc>>>(0))
    }

    /// Write one sync record on an open load transaction
    pub async fn record_commit(
        &self,
        tx: &tokio_postgres::Transaction<'_>,
        record: &SyncRecord,
    ) -> Result<(), tokio_postgres::Error> {
        tx.execute(
            self.insert_sql().as_str(),
            &[&record.batch_id, &record.committed_at, &record.row_count],
        )
        .await?;
        Ok(())
    }

    /// Delete sync records committed before the cutoff
    pub async fn trim_committed_before(
        &self,
        client: &tokio_postgres::Client,
        cutoff: DateTime<Utc>,
    ) -> WarehouseResult<u64> {
        client
            .execute(self.trim_sql().as_str(), &[&cutoff])
            .await
            .map_err(|e| WarehouseError::QueryFailed(e.to_string()))
    }
}
