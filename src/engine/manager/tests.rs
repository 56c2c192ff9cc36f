use super::*;

#[test]
fn begin_allocates_distinct_ids_and_captures_snapshot() {
    let mgr = TransactionManager::new();
    let (tx1, snap1) = mgr.begin();
    assert_eq!(snap1, 0);
    mgr.set_commit_sequence(mgr.next_commit_csn());
    let (tx2, snap2) = mgr.begin();
    assert_ne!(tx1, tx2);
    assert!(snap2 >= snap1);
}

#[test]
fn next_commit_csn_is_monotonic() {
    let mgr = TransactionManager::new();
    let a = mgr.next_commit_csn();
    let b = mgr.next_commit_csn();
    assert!(b > a);
}

#[test]
fn mark_committed_removes_from_active_set() {
    let mgr = TransactionManager::new();
    let (tx, _) = mgr.begin();
    assert_eq!(mgr.active_count(), 1);
    mgr.mark_committed(tx);
    assert_eq!(mgr.active_count(), 0);
}

#[test]
fn oldest_active_snapshot_csn_tracks_minimum() {
    let mgr = TransactionManager::new();
    let (_tx1, snap1) = mgr.begin();
    mgr.set_commit_sequence(5);
    let (tx2, snap2) = mgr.begin();
    assert_eq!(mgr.oldest_active_snapshot_csn(), snap1.min(snap2));
    mgr.mark_committed(tx2);
    assert_eq!(mgr.oldest_active_snapshot_csn(), snap1);
}

#[test]
fn oldest_active_snapshot_csn_is_max_when_idle() {
    let mgr = TransactionManager::new();
    assert_eq!(mgr.oldest_active_snapshot_csn(), u64::MAX);
}

#[test]
fn replay_hooks_restore_counters() {
    let mgr = TransactionManager::new();
    mgr.set_commit_sequence(100);
    mgr.set_last_committed(42);
    assert_eq!(mgr.highest_committed_csn(), 100);
    let (tx, snap) = mgr.begin();
    assert_eq!(snap, 100);
    assert!(tx > 42);
}
