//! Error types for the transactional core
//!
//! A single unified error type, hand-rolled rather than derived, so that the
//! programmatically-actionable variants (`WriteConflict`, `PageConflict`, ...)
//! carry structured fields a caller can match on instead of a formatted string.

use std::fmt;
use std::io;

use crate::engine::types::TxId;

/// Unified error type for core operations.
#[derive(Debug)]
pub enum StratumError {
    /// MVCC-level conflict: another transaction's write to the same document
    /// committed after our snapshot was taken.
    WriteConflict {
        collection: String,
        doc_id: u64,
        conflicting_tx_id: TxId,
    },
    /// Optimistic page-structure conflict detected at commit time.
    PageConflict {
        page_id: i32,
        base: u64,
        current: u64,
    },
    /// An operation was attempted against a transaction in the wrong state
    /// (e.g. a write on a read-only transaction, or any op on a committed one).
    StateViolation {
        current_state: String,
        attempted_op: String,
    },
    /// Update or delete of a document that does not exist. Non-fatal: callers
    /// that can tolerate it get `Ok(false)` instead, this variant is for paths
    /// that must surface it as an error.
    NotFound { collection: String, doc_id: u64 },
    /// The WAL header or a frame failed validation in a way that is not
    /// explained by torn-write salts/CRC alone (magic mismatch, page-size
    /// mismatch on open).
    CorruptWal { reason: String },
    /// Underlying I/O failure.
    Io(io::Error),
    /// JSON codec failure at the document boundary.
    Json(String),
    /// Anything else, typically a programming-bug-adjacent invariant failure
    /// surfaced as a recoverable error rather than a panic.
    Internal(String),
}

impl fmt::Display for StratumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StratumError::WriteConflict {
                collection,
                doc_id,
                conflicting_tx_id,
            } => write!(
                f,
                "write conflict on {}/{}: concurrently committed by tx {}",
                collection, doc_id, conflicting_tx_id
            ),
            StratumError::PageConflict {
                page_id,
                base,
                current,
            } => write!(
                f,
                "page conflict on page {}: observed frame {} but latest committed frame is {}",
                page_id, base, current
            ),
            StratumError::StateViolation {
                current_state,
                attempted_op,
            } => write!(
                f,
                "cannot {} while transaction is {}",
                attempted_op, current_state
            ),
            StratumError::NotFound { collection, doc_id } => {
                write!(f, "document {}/{} not found", collection, doc_id)
            }
            StratumError::CorruptWal { reason } => write!(f, "corrupt WAL: {}", reason),
            StratumError::Io(e) => write!(f, "{}", e),
            StratumError::Json(msg) => write!(f, "{}", msg),
            StratumError::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for StratumError {}

impl From<io::Error> for StratumError {
    fn from(e: io::Error) -> Self {
        StratumError::Io(e)
    }
}

impl From<serde_json::Error> for StratumError {
    fn from(e: serde_json::Error) -> Self {
        StratumError::Json(e.to_string())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, StratumError>;
