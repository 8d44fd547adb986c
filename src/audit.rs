//! Dispatch audit trail.
//!
//! One record per terminal dispatch outcome, never per retry. The sink is
//! pluggable; the default writes structured JSON, one object per line, to an
//! append-only file. Account identifiers arrive already masked; the auth
//! token never reaches this module at all.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;

/// A single dispatch audit record.
///
/// Serialized as one JSON line:
/// `{"ts": ..., "account": ..., "to": ..., "channel": ..., "outcome": ...,
/// "detail": ..., "attempts": ..., "latency_ms": ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// ISO 8601 timestamp of the terminal outcome.
    pub ts: String,
    /// Masked account identifier.
    pub account: String,
    /// Normalized recipient, or the raw contact when normalization never ran.
    pub to: String,
    /// Channel used, or the requested hint when none was resolved.
    pub channel: String,
    /// Outcome tag: `sent`, `skipped`, `rejected` or `transient`.
    pub outcome: String,
    /// Provider message SID for sends, the failure kind otherwise.
    pub detail: String,
    /// Upstream attempts made (0 for skips, 1 for input rejections).
    pub attempts: u32,
    /// Wall-clock latency of the dispatch call in milliseconds.
    pub latency_ms: u64,
}

impl AuditRecord {
    /// Current UTC time in the record's timestamp format.
    pub fn now_ts() -> String {
        Utc::now().to_rfc3339()
    }
}

/// Append-only sink for audit records.
///
/// A failing sink never alters the dispatch outcome already produced; the
/// dispatcher reports sink errors through the logger instead.
pub trait AuditSink: Send + Sync {
    /// Append one record.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; record-level atomicity is expected
    /// (a record is fully visible or absent).
    fn append(&self, record: &AuditRecord) -> std::io::Result<()>;
}

/// Audit sink writing JSON lines to an append-only writer.
pub struct JsonlAuditSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonlAuditSink {
    /// Create a sink that appends to the given file path.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened for append.
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            writer: Mutex::new(Box::new(file)),
        })
    }

    /// Create a sink from an arbitrary writer (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, record: &AuditRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| std::io::Error::other(format!("audit lock poisoned: {e}")))?;
        // Single write + flush keeps records line-atomic on append-only files.
        writeln!(writer, "{line}")?;
        writer.flush()
    }
}

/// Sink that discards every record, for hosts that opt out of auditing.
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn append(&self, _record: &AuditRecord) -> std::io::Result<()> {
        Ok(())
    }
}
