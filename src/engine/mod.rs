//! The document-store engine core (§4): wires together WAL Page I/O, the
//! Version Index, the Transaction Manager, and the Recovery Driver behind a
//! single `Engine` entry point.

pub mod manager;
pub mod page_io;
pub mod recovery;
pub mod transaction;
pub mod types;
pub mod version_index;
pub mod wal_file;
pub mod wal_format;

use std::sync::Arc;

use crate::error::Result;

pub use manager::TransactionManager;
pub use page_io::{BasePageIo, FileBasePageIo, WalPageIo};
pub use recovery::{RecoveredDocument, RecoveryDriver};
pub use transaction::{IndexStore, Transaction};
pub use types::{Csn, DocumentVersion, Location, TxId, TxState, WriteOp, WriteSetEntry};
pub use version_index::VersionIndex;
pub use wal_file::{FsyncPolicy, WalFile};

/// Owns every collaborator described in §4 and is the one entry point
/// callers use to begin transactions and trigger maintenance. Analogous to
/// the teacher's `Server`, minus the TCP listener — the document-store core
/// has no network surface (§1 Non-goals).
pub struct Engine {
    version_index: Arc<VersionIndex>,
    page_io: Arc<WalPageIo>,
    tx_manager: Arc<TransactionManager>,
    index_store: Arc<dyn IndexStore>,
}

impl Engine {
    /// Open (or create) an engine rooted at `data_dir`, running recovery if
    /// a WAL already exists from a previous, possibly unclean, shutdown.
    pub fn open(
        data_dir: &std::path::Path,
        page_size: u32,
        index_store: Arc<dyn IndexStore>,
        recovered_docs: Vec<RecoveredDocument>,
        fsync_policy: FsyncPolicy,
        checkpoint_threshold_frames: u64,
    ) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let base_path = data_dir.join("base.db");
        let wal_path = data_dir.join("wal.log");

        let base = FileBasePageIo::open(&base_path, page_size)?;
        let fresh_wal = !wal_path.exists();
        let wal = if fresh_wal {
            WalFile::create(&wal_path, page_size, fsync_policy.clone())?
        } else {
            WalFile::open(&wal_path, fsync_policy.clone())?
        };

        let page_io = Arc::new(WalPageIo::new(Box::new(base), wal, checkpoint_threshold_frames));
        let version_index = Arc::new(VersionIndex::new());
        let tx_manager = Arc::new(TransactionManager::new());

        if !fresh_wal {
            let wal_for_recovery = WalFile::open(&wal_path, fsync_policy.clone())?;
            let driver = RecoveryDriver::new(
                page_io.clone(),
                version_index.clone(),
                tx_manager.clone(),
                index_store.clone(),
            );
            driver.recover(&wal_for_recovery, recovered_docs)?;
            log::info!("engine opened at {:?} after running recovery", data_dir);
        } else {
            log::info!("engine opened at {:?} with a fresh WAL", data_dir);
        }

        Ok(Self {
            version_index,
            page_io,
            tx_manager,
            index_store,
        })
    }

    pub fn begin(&self) -> Transaction {
        Transaction::begin(
            self.version_index.clone(),
            self.page_io.clone(),
            self.tx_manager.clone(),
            self.index_store.clone(),
        )
    }

    /// Try to checkpoint now; never blocks on a concurrent checkpoint (§4.5).
    pub fn checkpoint(&self) -> Result<bool> {
        self.page_io.checkpoint()
    }

    /// Reclaim document versions no active transaction can still see (§4.2).
    pub fn garbage_collect(&self) -> usize {
        let oldest = self.tx_manager.oldest_active_snapshot_csn();
        self.version_index.garbage_collect(oldest)
    }

    pub fn active_transaction_count(&self) -> usize {
        self.tx_manager.active_count()
    }
}
