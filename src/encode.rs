//! Canonical value encoding for the warehouse bulk text-load format.
//!
//! Every field value is reduced to a single-line string before it is
//! written to a staged file. String values are cleaned of characters the
//! load format cannot carry (NUL bytes, newlines) and truncated to the
//! configured varchar ceiling; timestamps are re-rendered in one fixed
//! zoned format so the warehouse never sees mixed representations.

use chrono::{DateTime, Utc};

/// Render format for canonical timestamps: `2009-11-10 23:00:00 +0000 UTC`.
const CANONICAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S +0000 UTC";

/// Error type for value encoding
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// Value was flagged as a timestamp but is not a parsable ISO-8601 string
    #[error("unparsable timestamp {value:?}: {source}")]
    BadTimestamp {
        /// The raw value that failed to parse
        value: String,
        /// Underlying parse error
        #[source]
        source: chrono::ParseError,
    },
}

/// A typed field value destined for the warehouse.
///
/// Values carry no identity of their own; only the encoded output matters.
#[derive(Debug, Clone, PartialEq)]
pub enum WarehouseValue {
    /// SQL NULL (rendered by the staging layer, not by `encode`)
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
}

impl WarehouseValue {
    /// Check if the value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, WarehouseValue::Null)
    }
}

/// Encode a single field value into its canonical load-format string.
///
/// String values are cleaned in order: NUL bytes dropped, each newline
/// collapsed to one space, then truncated at a char boundary once the
/// length reaches `varchar_max`. Non-string scalars render in their
/// canonical base-10 form. Time-flagged values are parsed as ISO-8601
/// and re-rendered as `YYYY-MM-DD HH:MM:SS +0000 UTC`; a value that
/// does not parse is an [`EncodeError`], never a silent empty string.
///
/// Encoding is idempotent: re-encoding an output changes nothing except
/// further truncation under a smaller `varchar_max`.
pub fn encode(
    value: &WarehouseValue,
    is_time: bool,
    varchar_max: usize,
) -> Result<String, EncodeError> {
    let raw = match value {
        WarehouseValue::Null => String::new(),
        WarehouseValue::Bool(b) => b.to_string(),
        WarehouseValue::Int(i) => i.to_string(),
        WarehouseValue::Float(f) => f.to_string(),
        WarehouseValue::String(s) => s.clone(),
    };

    if is_time {
        let parsed =
            DateTime::parse_from_rfc3339(&raw).map_err(|e| EncodeError::BadTimestamp {
                value: raw.clone(),
                source: e,
            })?;
        return Ok(parsed
            .with_timezone(&Utc)
            .format(CANONICAL_TIME_FORMAT)
            .to_string());
    }

    let cleaned: String = raw
        .chars()
        .filter(|&c| c != '\0')
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();

    Ok(truncate_chars(cleaned, varchar_max))
}

/// Truncate to the varchar ceiling, counting chars rather than bytes.
///
/// A value whose char count reaches `varchar_max` keeps the first
/// `varchar_max - 1` chars, leaving the warehouse column one char of
/// headroom for its own terminator handling.
fn truncate_chars(s: String, varchar_max: usize) -> String {
    if varchar_max == 0 {
        return s;
    }
    if s.chars().count() >= varchar_max {
        s.chars().take(varchar_max - 1).collect()
    } else {
        s
    }
}
