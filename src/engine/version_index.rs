//! Version Index (§4.2): the in-memory map from a document identity to its
//! version chain, and the sole place MVCC visibility is resolved.
//!
//! No direct teacher counterpart — the teacher's engine rolls back via an
//! undo log instead of keeping multiple versions live, so this structure is
//! built fresh from the spec. It follows the same locking discipline as the
//! rest of the engine layer: a short critical section just to clone out the
//! handles a caller needs, with comparisons and filtering done after the
//! lock is released.

use std::collections::HashMap;
use std::sync::RwLock;

use super::types::{Csn, DocumentVersion};

#[derive(Default)]
struct Chain {
    /// Versions ordered newest-first by `created_by_csn`.
    versions: Vec<DocumentVersion>,
}

/// Select the version a snapshot at `snapshot_csn` would see: the newest
/// version with `created_by_csn <= snapshot_csn`, then `None` if *that*
/// version's own `deleted_csn` is at or before the snapshot. The scan stops
/// at the first candidate — it never continues past it into an older,
/// shadowed version just because the candidate turned out to be a tombstone.
fn select_visible(chain: &Chain, snapshot_csn: Csn) -> Option<&DocumentVersion> {
    let candidate = chain.versions.iter().find(|v| v.created_by_csn <= snapshot_csn)?;
    if candidate.deleted_csn.map_or(false, |d| d <= snapshot_csn) {
        None
    } else {
        Some(candidate)
    }
}

/// Maps `(collection, doc_id)` to its version chain (§4.2).
pub struct VersionIndex {
    collections: RwLock<HashMap<String, HashMap<u64, Chain>>>,
}

impl VersionIndex {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Append a new version to the head of the chain for `(collection,
    /// doc_id)`. Called by `Transaction::commit` after a successful CSN
    /// allocation (§4.3 step 6).
    pub fn add_version(&self, collection: &str, doc_id: u64, version: DocumentVersion) {
        let mut collections = self.collections.write().expect("version index lock poisoned");
        let chain = collections
            .entry(collection.to_string())
            .or_default()
            .entry(doc_id)
            .or_default();
        chain.versions.insert(0, version);
    }

    /// Stamp the current head version of the chain as deleted at `csn`.
    /// Does not remove it — deletion is itself a new visibility boundary,
    /// not a structural removal (§3, §4.2).
    pub fn mark_deleted(&self, collection: &str, doc_id: u64, csn: Csn) {
        let mut collections = self.collections.write().expect("version index lock poisoned");
        if let Some(chain) = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(&doc_id))
        {
            if let Some(head) = chain.versions.first_mut() {
                head.deleted_csn = Some(csn);
            }
        }
    }

    /// The version visible to a reader holding `snapshot_csn`: the newest
    /// version with `created_by_csn <= snapshot_csn`, or `None` if no such
    /// version exists or that version is itself a tombstone as of
    /// `snapshot_csn` (§4.2). This never falls back to an older, stale
    /// predecessor once the selected version is found to be deleted — a
    /// tombstone hides the document, it does not uncover an earlier one.
    pub fn get_visible_version(
        &self,
        collection: &str,
        doc_id: u64,
        snapshot_csn: Csn,
    ) -> Option<DocumentVersion> {
        let collections = self.collections.read().expect("version index lock poisoned");
        let chain = collections.get(collection)?.get(&doc_id)?;
        select_visible(chain, snapshot_csn).cloned()
    }

    /// The newest version regardless of visibility, used by the commit
    /// protocol's write-write conflict check (§4.3 step 3).
    pub fn get_latest_version(&self, collection: &str, doc_id: u64) -> Option<DocumentVersion> {
        let collections = self.collections.read().expect("version index lock poisoned");
        collections
            .get(collection)?
            .get(&doc_id)?
            .versions
            .first()
            .cloned()
    }

    /// All documents in `collection` visible at `snapshot_csn`, one version
    /// per doc_id. Used for collection scans (§6).
    pub fn get_all_visible(&self, collection: &str, snapshot_csn: Csn) -> Vec<DocumentVersion> {
        let collections = self.collections.read().expect("version index lock poisoned");
        let Some(docs) = collections.get(collection) else {
            return Vec::new();
        };
        docs.values()
            .filter_map(|chain| select_visible(chain, snapshot_csn))
            .cloned()
            .collect()
    }

    /// Drop any version from every chain that cannot be visible to any
    /// transaction with snapshot CSN >= `oldest_active_csn`: a version is
    /// safe to reclaim once a strictly newer version of the same document
    /// is itself visible to the oldest active reader (§4.2, "GC safety").
    ///
    /// Returns the number of versions reclaimed.
    pub fn garbage_collect(&self, oldest_active_csn: Csn) -> usize {
        let mut collections = self.collections.write().expect("version index lock poisoned");
        let mut reclaimed = 0;
        for docs in collections.values_mut() {
            for chain in docs.values_mut() {
                let keep_from = chain
                    .versions
                    .iter()
                    .position(|v| v.created_by_csn < oldest_active_csn)
                    .map(|idx| {
                        // Keep one version at or before the boundary — it may
                        // still be the visible version for the oldest reader
                        // — plus everything newer than it.
                        idx + 1
                    })
                    .unwrap_or(chain.versions.len());
                if keep_from < chain.versions.len() {
                    reclaimed += chain.versions.len() - keep_from;
                    chain.versions.truncate(keep_from);
                }
            }
        }
        reclaimed
    }
}

impl Default for VersionIndex {
    fn default() -> Self {
        Self::new()
    }
}
