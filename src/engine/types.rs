//! Core data model: transaction/version identifiers, document versions, and
//! write-set entries (§3 of the spec).

use serde::{Deserialize, Serialize};

/// Opaque monotonically increasing transaction identifier. `0` is reserved
/// for "none" / auto-commit metadata writes issued outside any transaction.
///
/// Per the design note in §9: `TxId` is retained only as an allocation and
/// diagnostic handle. No visibility, ordering, or garbage-collection decision
/// is ever made by comparing `TxId` values — only [`Csn`] is authoritative
/// for that. Grep for `TxId` comparisons outside `==` (equality checks in
/// conflict diagnostics) before adding one.
pub type TxId = u64;

/// Commit Sequence Number. Monotonic, strictly increasing across committed
/// transactions, assigned under the commit serialization lock. The sole
/// authoritative ordering key for MVCC visibility.
pub type Csn = u64;

/// `(page_id, slot_index)` addressing a document payload inside a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub page_id: i32,
    pub slot_index: u32,
}

/// Transaction lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committing,
    Committed,
    Aborted,
}

impl TxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::Active => "active",
            TxState::Committing => "committing",
            TxState::Committed => "committed",
            TxState::Aborted => "aborted",
        }
    }
}

/// One entry in a document's version chain.
///
/// Versions are immutable once created; a new write produces a new version
/// rather than mutating an existing one. `deleted_csn` distinguishes a live
/// document version from a tombstone recording a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentVersion {
    pub doc_id: u64,
    pub created_by_csn: Csn,
    pub deleted_csn: Option<Csn>,
    pub location: Location,
    /// Transaction that created this version. Retained only as a conflict
    /// diagnostic (`WriteConflict::conflicting_tx_id`, §8) — never compared
    /// for visibility or ordering; CSN alone decides those (§9).
    pub tx_id: TxId,
}

/// The kind of mutation a write-set entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Insert,
    Update,
    Delete,
}

/// One pending mutation staged in a transaction's write set. At most one
/// entry exists per `(collection, doc_id)` within a transaction; a later
/// write to the same key replaces the earlier entry (§3).
#[derive(Debug, Clone)]
pub struct WriteSetEntry {
    pub op: WriteOp,
    pub collection: String,
    pub doc_id: u64,
    pub serialized_bytes: Option<Vec<u8>>,
    pub previous_location: Option<Location>,
}
