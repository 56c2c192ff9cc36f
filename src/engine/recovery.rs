//! Recovery Driver (§4.6): the open-time sequence that rebuilds in-memory
//! state from the WAL after an unclean shutdown.
//!
//! Grounded on the teacher's `engines/granite/recovery.rs` `RecoveryManager`
//! — the overall shape (open log, classify records, replay, rebuild
//! counters) carries over. What changes is the unit of replay: the teacher
//! redoes/undoes logical row operations; this driver replays physical page
//! frames through `WalPageIo::apply_wal_frames`, which already enforces
//! "discard anything after the last commit-flagged frame" (§4.4). This
//! driver's own job is rebuilding the layers above that: the Version Index
//! and the Transaction Manager's counters, from the Document metadata pages
//! a fresh-from-frames `WalPageIo` now serves.

use std::sync::Arc;

use crate::error::Result;

use super::manager::TransactionManager;
use super::page_io::WalPageIo;
use super::transaction::IndexStore;
use super::types::{DocumentVersion, Location};
use super::version_index::VersionIndex;

/// One document recovered from a page during the metadata rebuild pass.
/// Produced by whatever owns document layout (`storage::CollectionStore`);
/// the driver only needs `(collection, doc_id, csn, deleted)` to rebuild
/// the chain, not the payload itself.
pub struct RecoveredDocument {
    pub collection: String,
    pub doc_id: u64,
    pub page_id: i32,
    pub created_by_csn: u64,
    pub deleted_csn: Option<u64>,
}

pub struct RecoveryDriver {
    page_io: Arc<WalPageIo>,
    version_index: Arc<VersionIndex>,
    tx_manager: Arc<TransactionManager>,
    index_store: Arc<dyn IndexStore>,
}

impl RecoveryDriver {
    pub fn new(
        page_io: Arc<WalPageIo>,
        version_index: Arc<VersionIndex>,
        tx_manager: Arc<TransactionManager>,
        index_store: Arc<dyn IndexStore>,
    ) -> Self {
        Self {
            page_io,
            version_index,
            tx_manager,
            index_store,
        }
    }

    /// Run the full recovery sequence:
    /// 1. scan the WAL, stopping at the first torn/corrupt frame (`WalFile::read_all_frames`)
    /// 2. replay valid frames through `WalPageIo::apply_wal_frames`, which
    ///    itself discards anything past the last commit-flagged frame
    /// 3. rebuild the Version Index from the recovered document metadata
    /// 4. restore the Transaction Manager's id/CSN counters
    pub fn recover(&self, wal: &super::wal_file::WalFile, docs: Vec<RecoveredDocument>) -> Result<()> {
        let frames = wal.read_all_frames()?;
        log::info!("recovery: {} valid frames found in WAL", frames.len());
        self.page_io.apply_wal_frames(&frames);

        let mut max_csn = 0u64;
        for doc in docs {
            max_csn = max_csn.max(doc.created_by_csn);
            if let Some(deleted) = doc.deleted_csn {
                max_csn = max_csn.max(deleted);
            }
            self.index_store.register_doc_id(&doc.collection, doc.doc_id);
            self.version_index.add_version(
                &doc.collection,
                doc.doc_id,
                DocumentVersion {
                    doc_id: doc.doc_id,
                    created_by_csn: doc.created_by_csn,
                    deleted_csn: doc.deleted_csn,
                    location: Location {
                        page_id: doc.page_id,
                        slot_index: 0,
                    },
                    // The original creating transaction is not tracked across
                    // a restart; `0` is the reserved "none" handle (§3).
                    tx_id: 0,
                },
            );
        }

        self.tx_manager.set_commit_sequence(max_csn);
        self.tx_manager.set_last_committed(max_csn);
        log::info!("recovery complete: csn counter restored to {}", max_csn);
        Ok(())
    }
}
