//! Collection Store: the concrete Index Collaborator (§6) `Transaction`
//! depends on through the `IndexStore` trait.
//!
//! ## Storage format
//!
//! Grounded on the teacher's catalog.json pattern: a single JSON metadata
//! file tracks which doc_ids exist per collection, loaded into memory at
//! open and rewritten whole on every mutation (no incremental catalog WAL —
//! the document payloads themselves are durable via the engine's own WAL,
//! this file only needs to be good enough to drive collection scans and is
//! rebuilt by recovery's document-metadata pass regardless).
//!
//! ```text
//! data/
//! ├── base.db        # fixed-size document pages (engine-owned)
//! ├── wal.log         # write-ahead log (engine-owned)
//! └── catalog.json    # { "widgets": [1, 2, 5], "orders": [10] }
//! ```
//!
//! Document placement is one page per `(collection, doc_id)` (§1 Non-goals:
//! no slotted pages, no B-tree secondary indexes); `page_id_for` hashes the
//! key into the page space with FNV-1a, the same non-cryptographic hash
//! family the teacher's lineage uses for hash-partitioned sharding.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::transaction::IndexStore;
use crate::error::Result;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

#[derive(Serialize, Deserialize, Default)]
struct Catalog {
    /// collection -> known doc ids, sorted for deterministic scans
    collections: BTreeMap<String, Vec<u64>>,
    /// collection -> next id an auto-assigned insert should hand out
    /// (the `CollectionEntry.next_id` counter of §3/§6).
    #[serde(default)]
    next_ids: BTreeMap<String, u64>,
}

/// Document store backing `IndexStore`: owns the catalog file and derives
/// page placement. Holds no reference to the engine's page/WAL layer —
/// `Transaction` is the only thing that talks to `WalPageIo` directly,
/// keeping this collaborator a pure mapping/metadata component (§9).
pub struct CollectionStore {
    catalog_path: PathBuf,
    catalog: RwLock<Catalog>,
    page_count: i32,
}

impl CollectionStore {
    /// Open or create the catalog under `data_dir`. `page_count` bounds the
    /// hashed page space so `page_id_for` never collides with reserved
    /// low-numbered pages the engine itself might use for bookkeeping.
    pub fn open(data_dir: &Path, page_count: i32) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let catalog_path = data_dir.join("catalog.json");
        let catalog = if catalog_path.exists() {
            let bytes = fs::read(&catalog_path)?;
            serde_json::from_slice(&bytes)?
        } else {
            Catalog::default()
        };

        Ok(Self {
            catalog_path,
            catalog: RwLock::new(catalog),
            page_count: page_count.max(1),
        })
    }

    fn persist(&self, catalog: &Catalog) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(catalog)?;
        fs::write(&self.catalog_path, bytes)?;
        Ok(())
    }

    /// All `(collection, doc_id, page_id)` triples, for recovery's
    /// document-metadata rebuild pass. The CSN/deleted state a
    /// `RecoveredDocument` also needs lives in each document's page payload,
    /// which recovery reads separately after this listing.
    pub fn all_known(&self) -> Vec<(String, u64)> {
        let catalog = self.catalog.read().expect("catalog lock poisoned");
        catalog
            .collections
            .iter()
            .flat_map(|(name, ids)| ids.iter().map(move |&id| (name.clone(), id)))
            .collect()
    }
}

impl IndexStore for CollectionStore {
    fn page_id_for(&self, collection: &str, doc_id: u64) -> i32 {
        let mut hash = FNV_OFFSET_BASIS;
        for byte in collection.bytes().chain(doc_id.to_le_bytes()) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        1 + (hash % self.page_count as u64) as i32
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        if end == 0 {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes[..end])?)
    }

    fn known_doc_ids(&self, collection: &str) -> Vec<u64> {
        self.catalog
            .read()
            .expect("catalog lock poisoned")
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn register_doc_id(&self, collection: &str, doc_id: u64) {
        let mut catalog = self.catalog.write().expect("catalog lock poisoned");
        let ids = catalog.collections.entry(collection.to_string()).or_default();
        if let Err(pos) = ids.binary_search(&doc_id) {
            ids.insert(pos, doc_id);
        }
        // An explicitly-assigned id must never be handed out again by a
        // later auto-assignment.
        let next = catalog.next_ids.entry(collection.to_string()).or_insert(1);
        if doc_id >= *next {
            *next = doc_id + 1;
        }
        if let Err(e) = self.persist(&catalog) {
            log::warn!("failed to persist catalog after registering {}/{}: {}", collection, doc_id, e);
        }
    }

    fn next_id(&self, collection: &str) -> u64 {
        let mut catalog = self.catalog.write().expect("catalog lock poisoned");
        if !catalog.next_ids.contains_key(collection) {
            let seed = catalog
                .collections
                .get(collection)
                .and_then(|ids| ids.last())
                .map_or(1, |&max| max + 1);
            catalog.next_ids.insert(collection.to_string(), seed);
        }
        let counter = catalog
            .next_ids
            .get_mut(collection)
            .expect("just inserted above");
        let id = *counter;
        *counter += 1;
        if let Err(e) = self.persist(&catalog) {
            log::warn!("failed to persist catalog after allocating id in {}: {}", collection, e);
        }
        id
    }
}
