//! Transaction (§4.3): a single unit of work against the document store,
//! ending in an 8-step commit protocol or a rollback.
//!
//! Grounded on the teacher's `manager.rs` `commit`/`commit_durable` sequence
//! and `handler.rs`'s `GraniteHandler::commit_transaction` — the shape of
//! "validate, allocate, durably write, then publish" carries over, rebuilt
//! around document version chains instead of row-level undo records.
//!
//! The `IndexStore` trait is the "Index Collaborator" capability interface
//! from §6: `Transaction` depends on it, never on a concrete `Db`/engine
//! struct, so the commit path has no cycle back through the owner that
//! constructed this transaction (§9 design note).

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, StratumError};

use super::manager::TransactionManager;
use super::page_io::{TransactionContext, WalPageIo};
use super::types::{Csn, DocumentVersion, Location, TxId, TxState, WriteOp, WriteSetEntry};
use super::version_index::VersionIndex;

/// Capability a transaction needs from its owning collection store: where a
/// document's page lives, and how to turn a page's bytes back into a value.
/// Implemented by `storage::CollectionStore` (§6).
pub trait IndexStore: Send + Sync {
    /// Deterministic page for `(collection, doc_id)` — one document per page
    /// (§1 Non-goals: no shared-page slotting, no B-tree index pages).
    fn page_id_for(&self, collection: &str, doc_id: u64) -> i32;

    fn encode(&self, value: &Value) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<Value>;

    /// Every doc_id a full collection scan should consider, in stable order.
    /// A linear list, not an index: secondary indexing is out of scope (§1).
    fn known_doc_ids(&self, collection: &str) -> Vec<u64>;

    /// Record that `doc_id` now exists in `collection`, for future scans.
    fn register_doc_id(&self, collection: &str, doc_id: u64);

    /// Reserve and return the next auto-assigned id for `collection`,
    /// seeded from that collection's `next_id` counter (§3, §6) and
    /// advancing it so the next caller gets a fresh one. Used by `insert`
    /// when no explicit id is supplied (§4.3).
    fn next_id(&self, collection: &str) -> u64;
}

pub struct Transaction {
    tx_id: TxId,
    snapshot_csn: Csn,
    state: TxState,
    ctx: TransactionContext,
    write_set: HashMap<(String, u64), WriteSetEntry>,

    version_index: Arc<VersionIndex>,
    page_io: Arc<WalPageIo>,
    tx_manager: Arc<TransactionManager>,
    index_store: Arc<dyn IndexStore>,
}

impl Transaction {
    pub fn begin(
        version_index: Arc<VersionIndex>,
        page_io: Arc<WalPageIo>,
        tx_manager: Arc<TransactionManager>,
        index_store: Arc<dyn IndexStore>,
    ) -> Self {
        let (tx_id, snapshot_csn) = tx_manager.begin();
        log::debug!("tx {} begin at snapshot {}", tx_id, snapshot_csn);
        Self {
            tx_id,
            snapshot_csn,
            state: TxState::Active,
            ctx: TransactionContext::new(tx_id),
            write_set: HashMap::new(),
            version_index,
            page_io,
            tx_manager,
            index_store,
        }
    }

    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    pub fn snapshot_csn(&self) -> Csn {
        self.snapshot_csn
    }

    fn require_active(&self, op: &str) -> Result<()> {
        if self.state != TxState::Active {
            return Err(StratumError::StateViolation {
                current_state: self.state.as_str().to_string(),
                attempted_op: op.to_string(),
            });
        }
        Ok(())
    }

    /// Read a document as of this transaction's snapshot. Checks the write
    /// set first so a transaction sees its own uncommitted writes (§4.3).
    pub fn get_by_id(&self, collection: &str, doc_id: u64) -> Result<Option<Value>> {
        self.require_active("get_by_id")?;

        if let Some(entry) = self.write_set.get(&(collection.to_string(), doc_id)) {
            return match entry.op {
                WriteOp::Delete => Ok(None),
                _ => {
                    let bytes = entry
                        .serialized_bytes
                        .as_ref()
                        .expect("insert/update write-set entry always carries bytes");
                    Ok(Some(self.index_store.decode(bytes)?))
                }
            };
        }

        match self
            .version_index
            .get_visible_version(collection, doc_id, self.snapshot_csn)
        {
            Some(_) => {
                let page_id = self.index_store.page_id_for(collection, doc_id);
                let bytes = self.page_io.read_page(Some(&self.ctx), page_id)?;
                Ok(Some(self.index_store.decode(&bytes)?))
            }
            None => Ok(None),
        }
    }

    /// Full collection scan as of this transaction's snapshot (§6). Linear
    /// over every known doc_id; no secondary index accelerates this.
    pub fn query(&self, collection: &str) -> Result<Vec<Value>> {
        self.require_active("query")?;
        let mut results = Vec::new();
        for doc_id in self.index_store.known_doc_ids(collection) {
            if let Some(v) = self.get_by_id(collection, doc_id)? {
                results.push(v);
            }
        }
        Ok(results)
    }

    /// Inserts `value` into `collection`, under `id` if supplied or an
    /// id auto-assigned from the collection's `next_id` counter otherwise,
    /// returning the id actually used (§4.3). A supplied `id` that already
    /// has a live tip in the Version Index is a `WriteConflict` against the
    /// transaction that created it, not a state error — the caller raced
    /// another committed writer, it did not misuse this transaction.
    pub fn insert<T: Serialize>(
        &mut self,
        collection: &str,
        value: &T,
        id: Option<u64>,
    ) -> Result<u64> {
        self.require_active("insert")?;
        let doc_id = match id {
            Some(id) => {
                if let Some(existing) =
                    self.version_index
                        .get_visible_version(collection, id, self.snapshot_csn)
                {
                    return Err(StratumError::WriteConflict {
                        collection: collection.to_string(),
                        doc_id: id,
                        conflicting_tx_id: existing.tx_id,
                    });
                }
                id
            }
            None => self.index_store.next_id(collection),
        };
        self.stage(collection, doc_id, WriteOp::Insert, Some(serde_json::to_value(value)?))?;
        Ok(doc_id)
    }

    /// Updates `doc_id` if it currently exists (in this transaction's write
    /// set or in the Version Index as of its snapshot), returning `false`
    /// without staging anything otherwise. Per §7: a missing document on
    /// update is non-fatal and reported as `false`, not a `NotFound` error.
    pub fn update<T: Serialize>(&mut self, collection: &str, doc_id: u64, value: &T) -> Result<bool> {
        self.require_active("update")?;
        if !self.document_exists(collection, doc_id) {
            return Ok(false);
        }
        self.stage(collection, doc_id, WriteOp::Update, Some(serde_json::to_value(value)?))?;
        Ok(true)
    }

    /// Deletes `doc_id` if it currently exists, returning `false` without
    /// staging anything otherwise (§7, same non-fatal policy as `update`).
    pub fn delete(&mut self, collection: &str, doc_id: u64) -> Result<bool> {
        self.require_active("delete")?;
        if !self.document_exists(collection, doc_id) {
            return Ok(false);
        }
        self.stage(collection, doc_id, WriteOp::Delete, None)?;
        Ok(true)
    }

    fn document_exists(&self, collection: &str, doc_id: u64) -> bool {
        if let Some(entry) = self
            .write_set
            .get(&(collection.to_string(), doc_id))
        {
            return !matches!(entry.op, WriteOp::Delete);
        }
        self.version_index
            .get_visible_version(collection, doc_id, self.snapshot_csn)
            .is_some()
    }

    fn stage(
        &mut self,
        collection: &str,
        doc_id: u64,
        op: WriteOp,
        value: Option<Value>,
    ) -> Result<()> {
        let serialized_bytes = match &value {
            Some(v) => Some(self.index_store.encode(v)?),
            None => None,
        };
        let previous_location = self
            .version_index
            .get_latest_version(collection, doc_id)
            .map(|v| v.location);

        let page_id = self.index_store.page_id_for(collection, doc_id);
        if let Some(bytes) = &serialized_bytes {
            let page_size = self.page_io.page_size() as usize;
            let mut page = vec![0u8; page_size];
            let n = bytes.len().min(page_size);
            page[..n].copy_from_slice(&bytes[..n]);
            self.page_io.write_page(&mut self.ctx, page_id, &page)?;
        }

        self.write_set.insert(
            (collection.to_string(), doc_id),
            WriteSetEntry {
                op,
                collection: collection.to_string(),
                doc_id,
                serialized_bytes,
                previous_location,
            },
        );
        Ok(())
    }

    /// The 8-step commit protocol (§4.3):
    /// 1. transition state to Committing
    /// 2. acquire the commit serialization lock (delegated to `WalPageIo::commit_txn`)
    /// 3. revalidate the write set against the Version Index (write-write conflicts)
    /// 4. allocate a CSN
    /// 5. durably write the buffered page frames (`WalPageIo::commit_txn`)
    /// 6. publish new Document Versions into the Version Index
    /// 7. mark the transaction committed in the Transaction Manager
    /// 8. opportunistic checkpoint
    pub fn commit(mut self) -> Result<Csn> {
        self.require_active("commit")?;
        self.state = TxState::Committing;

        if self.write_set.is_empty() {
            self.tx_manager.mark_committed(self.tx_id);
            self.state = TxState::Committed;
            return Ok(self.snapshot_csn);
        }

        // Step 3: write-write conflict check. A document this transaction
        // touched must not have a version created after our snapshot.
        for ((collection, doc_id), _) in &self.write_set {
            if let Some(latest) = self.version_index.get_latest_version(collection, *doc_id) {
                if latest.created_by_csn > self.snapshot_csn {
                    self.page_io.abort_txn(self.ctx);
                    self.tx_manager.mark_aborted(self.tx_id);
                    self.state = TxState::Aborted;
                    return Err(StratumError::WriteConflict {
                        collection: collection.clone(),
                        doc_id: *doc_id,
                        conflicting_tx_id: latest.tx_id,
                    });
                }
            }
        }

        // Step 4: allocate the commit CSN.
        let csn = self.tx_manager.next_commit_csn();

        // Step 5: durable page write (page-level conflict check + fsync'd batch).
        if let Err(e) = self.page_io.commit_txn(self.ctx) {
            self.tx_manager.mark_aborted(self.tx_id);
            self.state = TxState::Aborted;
            return Err(e);
        }

        // Step 6: publish new versions.
        for ((collection, doc_id), entry) in self.write_set.drain() {
            let page_id = self.index_store.page_id_for(&collection, doc_id);
            match entry.op {
                WriteOp::Delete => {
                    self.version_index.mark_deleted(&collection, doc_id, csn);
                }
                WriteOp::Insert | WriteOp::Update => {
                    self.index_store.register_doc_id(&collection, doc_id);
                    self.version_index.add_version(
                        &collection,
                        doc_id,
                        DocumentVersion {
                            doc_id,
                            created_by_csn: csn,
                            deleted_csn: None,
                            location: Location {
                                page_id,
                                slot_index: 0,
                            },
                            tx_id: self.tx_id,
                        },
                    );
                }
            }
        }

        // Step 7.
        self.tx_manager.mark_committed(self.tx_id);
        self.state = TxState::Committed;
        log::info!("tx {} committed at csn {}", self.tx_id, csn);

        // Step 8: opportunistic checkpoint, best-effort.
        if let Err(e) = self.page_io.checkpoint() {
            log::warn!("opportunistic checkpoint after tx {} failed: {}", self.tx_id, e);
        }

        Ok(csn)
    }

    pub fn rollback(mut self) {
        if self.state == TxState::Active || self.state == TxState::Committing {
            self.page_io.abort_txn(self.ctx);
            self.tx_manager.mark_aborted(self.tx_id);
            self.state = TxState::Aborted;
            log::debug!("tx {} rolled back", self.tx_id);
        }
    }
}

#[cfg(test)]
mod tests;
