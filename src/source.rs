//! Export source collaborator contract
//!
//! The engine consumes the upstream export purely as an ordered sequence
//! of candidate batches plus typed row data; transport, pagination, and
//! decompression belong to the implementation behind [`ExportSource`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::encode::WarehouseValue;

/// Error type for export source operations
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Listing candidate batches failed
    #[error("batch listing failed: {0}")]
    List(String),

    /// Fetching a batch payload failed
    #[error("payload fetch failed for batch {batch_id}: {message}")]
    Fetch {
        /// Batch whose payload could not be fetched
        batch_id: String,
        /// Underlying failure
        message: String,
    },

    /// A payload record could not be parsed
    #[error("record {record} in batch {batch_id} is not valid JSON: {message}")]
    Parse {
        /// Batch the record belongs to
        batch_id: String,
        /// Record index within the payload (0-based)
        record: usize,
        /// Underlying parse error
        message: String,
    },
}

/// One discrete unit of exported data, the unit of at-most-once loading.
///
/// Identity is the `id`: two batches with the same id are the same
/// logical unit of work and must never be double-committed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportBatch {
    /// Opaque stable identifier from the export source
    pub id: String,
    /// When the source produced the batch
    pub produced_at: DateTime<Utc>,
    /// Number of rows the source claims the batch carries
    pub row_count: usize,
    /// Reference to the raw payload in the source's own terms
    pub payload_ref: String,
}

/// One field of an export row: a typed value plus its time hint
#[derive(Debug, Clone, PartialEq)]
pub struct ExportField {
    /// The typed value
    pub value: WarehouseValue,
    /// Whether the value must be re-rendered as a canonical timestamp
    pub is_time: bool,
}

/// One typed row of exported data
pub type ExportRow = Vec<ExportField>;

/// Shape of one export column: name plus time hint.
///
/// Drives payload parsing, staged-file field order, and the warehouse
/// export table column list — all three must agree.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Column name in the export table
    pub name: String,
    /// Whether values in this column are timestamps
    pub is_time: bool,
}

impl FieldSpec {
    /// Create a plain (non-time) field
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_time: false,
        }
    }

    /// Create a time field
    pub fn time(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_time: true,
        }
    }
}

/// Upstream export source boundary
#[async_trait]
pub trait ExportSource: Send + Sync {
    /// List candidate batches newer than the cursor, oldest first.
    ///
    /// A `None` cursor lists everything the source still retains.
    async fn list_batches_since(
        &self,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Vec<ExportBatch>, SourceError>;

    /// Fetch and parse the rows of one batch
    async fn fetch_rows(&self, batch: &ExportBatch) -> Result<Vec<ExportRow>, SourceError>;

    /// Source name for logging
    fn name(&self) -> &str;
}

/// Parse a JSONL payload into typed rows following the field specs.
///
/// Each non-empty line is one JSON object; fields missing from an object
/// become NULL, as do JSON nulls. Numbers become integers when they fit,
/// floats otherwise; nested arrays and objects are carried as their
/// compact JSON text.
pub fn parse_jsonl_rows(
    raw: &[u8],
    fields: &[FieldSpec],
    batch_id: &str,
) -> Result<Vec<ExportRow>, SourceError> {
    let text = String::from_utf8_lossy(raw);
    let mut rows = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let object: serde_json::Value =
            serde_json::from_str(trimmed).map_err(|e| SourceError::Parse {
                batch_id: batch_id.to_string(),
                record: index,
                message: e.to_string(),
            })?;

        let row = fields
            .iter()
            .map(|field| ExportField {
                value: json_to_value(object.get(&field.name)),
                is_time: field.is_time,
            })
            .collect();

        rows.push(row);
    }

    Ok(rows)
}

fn json_to_value(json: Option<&serde_json::Value>) -> WarehouseValue {
    match json {
        None | Some(serde_json::Value::Null) => WarehouseValue::Null,
        Some(serde_json::Value::Bool(b)) => WarehouseValue::Bool(*b),
        Some(serde_json::Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                WarehouseValue::Int(i)
            } else {
                WarehouseValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Some(serde_json::Value::String(s)) => WarehouseValue::String(s.clone()),
        // nested structures travel as their JSON text
        Some(other) => WarehouseValue::String(other.to_string()),
    }
}
