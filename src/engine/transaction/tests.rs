use super::*;
use crate::engine::page_io::FileBasePageIo;
use crate::engine::wal_file::WalFile;
use std::sync::Mutex as StdMutex;
use tempfile::tempdir;

/// Test double for the Index Collaborator: one page per doc_id, derived by
/// a small deterministic hash, with a flat Vec tracking known ids per
/// collection (a real index is out of scope, per §1).
struct FakeIndexStore {
    known: StdMutex<HashMap<String, Vec<u64>>>,
    next_ids: StdMutex<HashMap<String, u64>>,
}

impl FakeIndexStore {
    fn new() -> Self {
        Self {
            known: StdMutex::new(HashMap::new()),
            next_ids: StdMutex::new(HashMap::new()),
        }
    }
}

impl IndexStore for FakeIndexStore {
    fn page_id_for(&self, collection: &str, doc_id: u64) -> i32 {
        let mut hash: u64 = 1469598103934665603;
        for byte in collection.bytes().chain(doc_id.to_le_bytes()) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        (hash % 1_000_000) as i32
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(serde_json::from_slice(&bytes[..end])?)
    }

    fn known_doc_ids(&self, collection: &str) -> Vec<u64> {
        self.known
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn register_doc_id(&self, collection: &str, doc_id: u64) {
        let mut known = self.known.lock().unwrap();
        let ids = known.entry(collection.to_string()).or_default();
        if !ids.contains(&doc_id) {
            ids.push(doc_id);
        }
    }

    fn next_id(&self, collection: &str) -> u64 {
        let mut next_ids = self.next_ids.lock().unwrap();
        let counter = next_ids.entry(collection.to_string()).or_insert(1);
        let id = *counter;
        *counter += 1;
        id
    }
}

struct Harness {
    version_index: Arc<VersionIndex>,
    page_io: Arc<WalPageIo>,
    tx_manager: Arc<TransactionManager>,
    index_store: Arc<dyn IndexStore>,
}

impl Harness {
    fn new(dir: &std::path::Path) -> Self {
        let base = FileBasePageIo::open(&dir.join("base.db"), 64).unwrap();
        let wal = WalFile::create(&dir.join("wal.log"), 64, crate::FsyncPolicy::Always).unwrap();
        Self {
            version_index: Arc::new(VersionIndex::new()),
            page_io: Arc::new(WalPageIo::new(Box::new(base), wal, u64::MAX)),
            tx_manager: Arc::new(TransactionManager::new()),
            index_store: Arc::new(FakeIndexStore::new()),
        }
    }

    fn begin(&self) -> Transaction {
        Transaction::begin(
            self.version_index.clone(),
            self.page_io.clone(),
            self.tx_manager.clone(),
            self.index_store.clone(),
        )
    }
}

#[derive(Serialize, serde::Deserialize, Debug, PartialEq)]
struct Doc {
    name: String,
    count: u32,
}

#[test]
fn insert_then_get_within_same_transaction() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let mut tx = h.begin();

    tx.insert("widgets", &Doc { name: "a".into(), count: 1 }, Some(1)).unwrap();
    let v = tx.get_by_id("widgets", 1).unwrap().unwrap();
    assert_eq!(v["name"], "a");
}

#[test]
fn commit_makes_document_visible_to_new_transactions() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());

    let mut tx = h.begin();
    tx.insert("widgets", &Doc { name: "a".into(), count: 1 }, Some(1)).unwrap();
    let csn = tx.commit().unwrap();
    assert!(csn > 0);

    let tx2 = h.begin();
    let v = tx2.get_by_id("widgets", 1).unwrap().unwrap();
    assert_eq!(v["count"], 1);
}

#[test]
fn snapshot_isolation_hides_later_commits() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());

    let mut setup = h.begin();
    setup.insert("widgets", &Doc { name: "a".into(), count: 1 }, Some(1)).unwrap();
    setup.commit().unwrap();

    let reader = h.begin();

    let mut writer = h.begin();
    writer.update("widgets", 1, &Doc { name: "a".into(), count: 2 }).unwrap();
    writer.commit().unwrap();

    let v = reader.get_by_id("widgets", 1).unwrap().unwrap();
    assert_eq!(v["count"], 1, "reader's snapshot predates the writer's commit");
}

#[test]
fn write_conflict_aborts_second_committer() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());

    let mut setup = h.begin();
    setup.insert("widgets", &Doc { name: "a".into(), count: 1 }, Some(1)).unwrap();
    setup.commit().unwrap();

    let mut tx_a = h.begin();
    let mut tx_b = h.begin();
    tx_a.update("widgets", 1, &Doc { name: "a".into(), count: 2 }).unwrap();
    tx_b.update("widgets", 1, &Doc { name: "a".into(), count: 3 }).unwrap();

    tx_a.commit().unwrap();
    let err = tx_b.commit().unwrap_err();
    match err {
        StratumError::WriteConflict { doc_id, .. } => assert_eq!(doc_id, 1),
        other => panic!("expected WriteConflict, got {:?}", other),
    }
}

#[test]
fn insert_without_id_auto_assigns_from_next_id() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let mut tx = h.begin();

    let first = tx.insert("widgets", &Doc { name: "a".into(), count: 1 }, None).unwrap();
    let second = tx.insert("widgets", &Doc { name: "b".into(), count: 2 }, None).unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 2);
}

#[test]
fn insert_with_colliding_explicit_id_is_a_write_conflict() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());

    let mut setup = h.begin();
    setup.insert("widgets", &Doc { name: "a".into(), count: 1 }, Some(1)).unwrap();
    setup.commit().unwrap();

    let mut tx = h.begin();
    let err = tx
        .insert("widgets", &Doc { name: "b".into(), count: 2 }, Some(1))
        .unwrap_err();
    match err {
        StratumError::WriteConflict { collection, doc_id, .. } => {
            assert_eq!(collection, "widgets");
            assert_eq!(doc_id, 1);
        }
        other => panic!("expected WriteConflict, got {:?}", other),
    }
}

#[test]
fn update_of_missing_document_returns_false_not_error() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let mut tx = h.begin();
    let updated = tx.update("widgets", 999, &Doc { name: "a".into(), count: 1 }).unwrap();
    assert!(!updated);
}

#[test]
fn delete_of_missing_document_returns_false_not_error() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    let mut tx = h.begin();
    let deleted = tx.delete("widgets", 999).unwrap();
    assert!(!deleted);
}

#[test]
fn delete_then_get_returns_none() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());

    let mut tx = h.begin();
    tx.insert("widgets", &Doc { name: "a".into(), count: 1 }, Some(1)).unwrap();
    tx.commit().unwrap();

    let mut tx2 = h.begin();
    tx2.delete("widgets", 1).unwrap();
    tx2.commit().unwrap();

    let tx3 = h.begin();
    assert!(tx3.get_by_id("widgets", 1).unwrap().is_none());
}

#[test]
fn rollback_discards_buffered_writes() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());

    let mut tx = h.begin();
    tx.insert("widgets", &Doc { name: "a".into(), count: 1 }, Some(1)).unwrap();
    tx.rollback();

    let tx2 = h.begin();
    assert!(tx2.get_by_id("widgets", 1).unwrap().is_none());
}

#[test]
fn query_returns_all_visible_documents() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());

    let mut tx = h.begin();
    tx.insert("widgets", &Doc { name: "a".into(), count: 1 }, Some(1)).unwrap();
    tx.insert("widgets", &Doc { name: "b".into(), count: 2 }, Some(2)).unwrap();
    tx.commit().unwrap();

    let reader = h.begin();
    let docs = reader.query("widgets").unwrap();
    assert_eq!(docs.len(), 2);
}
