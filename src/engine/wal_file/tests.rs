use super::*;
use tempfile::tempdir;

#[test]
fn create_and_open_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    {
        let wal = WalFile::create(&path, 64, FsyncPolicy::Always).unwrap();
        assert_eq!(wal.page_size(), 64);
    }
    let wal = WalFile::open(&path, FsyncPolicy::Always).unwrap();
    assert_eq!(wal.page_size(), 64);
}

#[test]
fn single_frame_write_and_read_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    let wal = WalFile::create(&path, 32, FsyncPolicy::Always).unwrap();

    let frame_no = wal
        .write_frame(1, 7, 0, b"hello world", FLAG_COMMIT)
        .unwrap();
    assert_eq!(frame_no, 0);

    let (header, payload) = wal.read_frame_data(0).unwrap().unwrap();
    assert_eq!(header.page_id, 7);
    assert!(header.is_commit());
    assert_eq!(&payload[..11], b"hello world");
}

#[test]
fn batch_write_only_last_frame_commits() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    let wal = WalFile::create(&path, 16, FsyncPolicy::Always).unwrap();

    let entries = vec![
        PendingFrame {
            tx_id: 5,
            page_id: 1,
            page_type: 0,
            flags: 0,
            payload: b"aaaa".to_vec(),
        },
        PendingFrame {
            tx_id: 5,
            page_id: 2,
            page_type: 0,
            flags: FLAG_COMMIT,
            payload: b"bbbb".to_vec(),
        },
    ];
    let first = wal.write_frame_batch(&entries).unwrap();
    assert_eq!(first, 0);

    let (h0, _) = wal.read_frame_data(0).unwrap().unwrap();
    let (h1, _) = wal.read_frame_data(1).unwrap().unwrap();
    assert!(!h0.is_commit());
    assert!(h1.is_commit());
}

#[test]
fn read_past_eof_returns_none() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    let wal = WalFile::create(&path, 16, FsyncPolicy::Always).unwrap();
    assert!(wal.read_frame_data(0).unwrap().is_none());
}

#[test]
fn truncate_advances_salt_and_invalidates_tail() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    let wal = WalFile::create(&path, 16, FsyncPolicy::Always).unwrap();
    wal.write_frame(1, 1, 0, b"x", FLAG_COMMIT).unwrap();
    let (old_salt1, _) = wal.salts();

    wal.truncate().unwrap();
    let (new_salt1, _) = wal.salts();
    assert_eq!(new_salt1, old_salt1 + 1);
    assert!(wal.read_frame_data(0).unwrap().is_none());
}

#[test]
fn never_policy_does_not_fsync_but_still_persists_to_the_page_cache() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    let wal = WalFile::create(&path, 16, FsyncPolicy::Never).unwrap();

    wal.write_frame(1, 0, 0, b"ok", FLAG_COMMIT).unwrap();
    let (header, payload) = wal.read_frame_data(0).unwrap().unwrap();
    assert!(header.is_commit());
    assert_eq!(&payload[..2], b"ok");
}

#[test]
fn batched_policy_defers_fsync_until_byte_threshold_crossed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    let wal = WalFile::create(
        &path,
        16,
        FsyncPolicy::Batched {
            max_unfsynced_bytes: 1,
            max_delay_ms: u64::MAX,
        },
    )
    .unwrap();

    // max_unfsynced_bytes is crossed by the very first frame, so this
    // still fsyncs every time; the assertion is just that writes keep
    // working end to end under the batched policy.
    wal.write_frame(1, 0, 0, b"ok", FLAG_COMMIT).unwrap();
    let (header, _) = wal.read_frame_data(0).unwrap().unwrap();
    assert!(header.is_commit());
}

#[test]
fn read_all_frames_stops_at_corrupted_tail() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    let wal = WalFile::create(&path, 16, FsyncPolicy::Always).unwrap();

    for i in 0..3u64 {
        wal.write_frame(i + 1, i as i32, 0, b"ok", FLAG_COMMIT)
            .unwrap();
    }
    assert_eq!(wal.read_all_frames().unwrap().len(), 3);

    // Hand-corrupt the 4th frame's CRC by writing a frame and flipping a byte.
    wal.write_frame(4, 3, 0, b"ok", FLAG_COMMIT).unwrap();
    drop(wal);

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap();
    let frame_size = FRAME_HEADER_SIZE as u64 + 16;
    let fourth_offset = HEADER_SIZE as u64 + 3 * frame_size;
    file.seek(SeekFrom::Start(fourth_offset)).unwrap();
    file.write_all(&[0xFFu8]).unwrap();
    drop(file);

    let wal = WalFile::open(&path, FsyncPolicy::Always).unwrap();
    let frames = wal.read_all_frames().unwrap();
    assert_eq!(frames.len(), 3, "scan must stop at the corrupted frame");
}
