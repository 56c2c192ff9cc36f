use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::time;

pub mod engine;
pub mod error;
pub mod storage;

use crate::engine::{Engine, RecoveredDocument};
use crate::storage::CollectionStore;

/// How aggressively the engine fsyncs the WAL (§10.3). Lives in
/// `engine::wal_file`, the WAL durability layer that actually acts on it;
/// re-exported here so `Config` callers don't need to reach into `engine`.
pub use crate::engine::FsyncPolicy;

/// Engine configuration.
#[derive(Clone)]
pub struct Config {
    /// Directory for the base file, WAL, and catalog.
    pub data_dir: PathBuf,
    /// Fixed page size in bytes.
    pub page_size: u32,
    /// Run a checkpoint after this many frames have accumulated since the
    /// last one, in addition to the opportunistic post-commit attempt.
    pub checkpoint_threshold_frames: u64,
    pub wal_fsync: FsyncPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            page_size: 4096,
            checkpoint_threshold_frames: 1000,
            wal_fsync: FsyncPolicy::default(),
        }
    }
}

/// Owns the engine and the background checkpoint/GC ticker. The embedded
/// document-store core has no network surface (§1 Non-goals) — there is no
/// `run`/listener loop here, unlike the teacher's `Server`.
pub struct Db {
    config: Config,
    engine: Arc<Engine>,
    store: Arc<CollectionStore>,
}

impl Db {
    /// Open (or create) a database at `config.data_dir`, running crash
    /// recovery if a WAL from a previous session is present.
    pub async fn open(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        std::fs::create_dir_all(&config.data_dir)?;

        let store = Arc::new(CollectionStore::open(&config.data_dir, 1 << 20)?);
        let recovered_docs = Self::scan_recoverable_docs(&store);

        let engine = Arc::new(Engine::open(
            &config.data_dir,
            config.page_size,
            store.clone(),
            recovered_docs,
            config.wal_fsync.clone(),
            config.checkpoint_threshold_frames,
        )?);

        info!(
            "database opened at {:?} (page_size={})",
            config.data_dir, config.page_size
        );

        Ok(Self {
            config,
            engine,
            store,
        })
    }

    /// Recovery needs `(collection, doc_id, csn, deleted)` for every
    /// document known to the catalog; the CSN itself is not tracked in the
    /// catalog (only in the page payload + version chain that existed
    /// before the crash), so a from-scratch open conservatively treats
    /// every known doc_id as visible as of csn 0 and lets the WAL replay in
    /// `Engine::open` re-establish the true versions through ordinary
    /// commits once the application resumes writing.
    fn scan_recoverable_docs(store: &CollectionStore) -> Vec<RecoveredDocument> {
        store
            .all_known()
            .into_iter()
            .map(|(collection, doc_id)| {
                let page_id = store.page_id_for(&collection, doc_id);
                RecoveredDocument {
                    collection,
                    doc_id,
                    page_id,
                    created_by_csn: 0,
                    deleted_csn: None,
                }
            })
            .collect()
    }

    pub fn begin(&self) -> engine::Transaction {
        self.engine.begin()
    }

    /// Spawn the background checkpoint/GC ticker. Runs until the returned
    /// handle is dropped or aborted.
    pub fn spawn_maintenance_ticker(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            loop {
                ticker.tick().await;
                match engine.checkpoint() {
                    Ok(true) => info!("background checkpoint ran"),
                    Ok(false) => {}
                    Err(e) => log::error!("background checkpoint failed: {}", e),
                }
                let reclaimed = engine.garbage_collect();
                if reclaimed > 0 {
                    info!("background GC reclaimed {} document versions", reclaimed);
                }
            }
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
