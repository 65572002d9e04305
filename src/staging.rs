//! Staging gateway and text-load rendering
//!
//! Converted batches are rendered into the warehouse text-load format
//! and parked in a durable staging location until the bulk ingest
//! commits or abandons them. The staging store is treated as a
//! write-once blob holder; staged files are ephemeral.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::encode::{EncodeError, encode};
use crate::source::ExportRow;

/// Error type for staging operations
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    /// Filesystem or transport failure in the staging store
    #[error("staging I/O failed: {0}")]
    Io(String),

    /// A field value could not be encoded
    #[error("row {row} failed to encode: {source}")]
    Encode {
        /// Row index within the batch (0-based)
        row: usize,
        /// Underlying encoding error
        #[source]
        source: EncodeError,
    },
}

/// A converted batch file parked in the staging store.
///
/// Ephemeral: deleted once the corresponding load commits or is
/// abandoned.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedFile {
    /// Batch the file was converted from
    pub batch_id: String,
    /// Location of the file in the staging store
    pub uri: String,
    /// Number of rows in the file
    pub row_count: usize,
    /// SHA256 hex digest of the file content
    pub checksum: String,
}

/// Durable staging store boundary
#[async_trait]
pub trait StagingGateway: Send + Sync {
    /// Park a converted batch file and return its reference
    async fn put(
        &self,
        batch_id: &str,
        bytes: &[u8],
        row_count: usize,
    ) -> Result<StagedFile, StagingError>;

    /// Remove a staged file after commit or abandonment
    async fn delete(&self, file: &StagedFile) -> Result<(), StagingError>;
}

/// Compute SHA256 hash of staged content
pub fn compute_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Render typed rows into the warehouse text-load format.
///
/// One line per row, tab-separated fields, `\N` for NULL, backslash and
/// tab escaped. The batch id is appended as the final field of every
/// row; it lands in the export table's load-tag column, which is what
/// makes retried loads idempotent.
pub fn render_rows(
    rows: &[ExportRow],
    batch_id: &str,
    varchar_max: usize,
) -> Result<Vec<u8>, StagingError> {
    let mut out = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        let mut fields = Vec::with_capacity(row.len() + 1);
        for field in row {
            if field.value.is_null() {
                fields.push("\\N".to_string());
                continue;
            }
            let encoded = encode(&field.value, field.is_time, varchar_max)
                .map_err(|e| StagingError::Encode { row: index, source: e })?;
            fields.push(escape_field(&encoded));
        }
        fields.push(escape_field(batch_id));

        out.extend_from_slice(fields.join("\t").as_bytes());
        out.push(b'\n');
    }

    Ok(out)
}

/// Escape a field for the text-load format.
///
/// The encoder already removed NUL bytes and newlines; only backslashes
/// and embedded tabs remain to escape.
fn escape_field(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\t', "\\t")
}

/// Filesystem staging store
///
/// Writes staged files under a spool directory. The uri of a staged
/// file is its local path, which the warehouse backend streams from
/// during ingest.
pub struct FsStaging {
    spool_dir: PathBuf,
}

impl FsStaging {
    /// Create a staging store over the given spool directory
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
        }
    }

    fn file_path(&self, batch_id: &str) -> PathBuf {
        // batch ids are opaque; keep filenames safe
        let safe: String = batch_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        self.spool_dir.join(format!("{safe}.tsv"))
    }
}

#[async_trait]
impl StagingGateway for FsStaging {
    async fn put(
        &self,
        batch_id: &str,
        bytes: &[u8],
        row_count: usize,
    ) -> Result<StagedFile, StagingError> {
        tokio::fs::create_dir_all(&self.spool_dir)
            .await
            .map_err(|e| StagingError::Io(format!("{}: {}", self.spool_dir.display(), e)))?;

        let path = self.file_path(batch_id);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StagingError::Io(format!("{}: {}", path.display(), e)))?;

        Ok(StagedFile {
            batch_id: batch_id.to_string(),
            uri: path.display().to_string(),
            row_count,
            checksum: compute_checksum(bytes),
        })
    }

    async fn delete(&self, file: &StagedFile) -> Result<(), StagingError> {
        match tokio::fs::remove_file(Path::new(&file.uri)).await {
            Ok(()) => Ok(()),
            // already gone counts as deleted
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StagingError::Io(format!("{}: {}", file.uri, e))),
        }
    }
}
