//! Base Page I/O (§6, external) and WAL Page I/O (§4.5).
//!
//! WAL Page I/O has no direct counterpart in the teacher: the teacher engine
//! is a row store with no page layer at all. Its locking discipline —
//! a commit lock serializing WAL appends, a short-held cache lock, a
//! try-only checkpoint mutex — is lifted from `manager.rs`/`wal.rs` and
//! applied to the page-granular model the spec requires.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock, TryLockError};

use crate::error::{Result, StratumError};
use super::types::TxId;
use super::wal_file::{PendingFrame, WalFile};
use super::wal_format::FLAG_COMMIT;

/// Fixed-size page read/write against an underlying byte store. No
/// awareness of transactions (§6).
pub trait BasePageIo: Send + Sync {
    fn read_page(&self, page_id: i32, dst: &mut [u8]) -> Result<()>;
    fn write_page(&self, page_id: i32, src: &[u8]) -> Result<()>;
    fn flush(&self) -> Result<()>;
    fn page_size(&self) -> u32;
}

/// Minimal file-backed implementation of [`BasePageIo`].
pub struct FileBasePageIo {
    file: Mutex<File>,
    page_size: u32,
}

impl FileBasePageIo {
    pub fn open(path: &Path, page_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            page_size,
        })
    }

    fn offset(&self, page_id: i32) -> u64 {
        page_id as u64 * self.page_size as u64
    }
}

impl BasePageIo for FileBasePageIo {
    fn read_page(&self, page_id: i32, dst: &mut [u8]) -> Result<()> {
        let mut file = self.file.lock().expect("base file mutex poisoned");
        let offset = self.offset(page_id);
        if file.metadata()?.len() <= offset {
            dst.fill(0);
            return Ok(());
        }
        file.seek(SeekFrom::Start(offset))?;
        let n = file.read(dst)?;
        if n < dst.len() {
            dst[n..].fill(0);
        }
        Ok(())
    }

    fn write_page(&self, page_id: i32, src: &[u8]) -> Result<()> {
        let mut file = self.file.lock().expect("base file mutex poisoned");
        file.seek(SeekFrom::Start(self.offset(page_id)))?;
        file.write_all(src)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let file = self.file.lock().expect("base file mutex poisoned");
        file.sync_data()?;
        Ok(())
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }
}

/// Explicit per-transaction state threaded through WAL Page I/O calls,
/// replacing the thread-local "current transaction id" the teacher's source
/// lineage used — see the design note in §9.
pub struct TransactionContext {
    pub tx_id: TxId,
    /// page_id -> (this transaction's buffered frame_number, base_frame
    /// observed at first write to this page)
    pub page_writes: HashMap<i32, (u64, u64)>,
}

impl TransactionContext {
    pub fn new(tx_id: TxId) -> Self {
        Self {
            tx_id,
            page_writes: HashMap::new(),
        }
    }
}

struct CacheState {
    /// page_id -> most recent committed frame number for that page
    page_latest_frame: HashMap<i32, u64>,
    /// frame_number -> (page_id, page_type, buffer) for all in-flight transactions
    wal_frames: HashMap<u64, (i32, u8, Vec<u8>)>,
}

/// Decorates [`BasePageIo`]; buffers per-transaction uncommitted page
/// writes, commits them as a salted frame batch, serves reads from
/// (tx buffer -> committed WAL frame -> base file), and checkpoints frames
/// back to the base store (§4.5).
pub struct WalPageIo {
    base: Box<dyn BasePageIo>,
    wal: WalFile,
    cache: Mutex<CacheState>,
    commit_lock: Mutex<()>,
    checkpoint_mutex: Mutex<()>,
    base_rw_lock: RwLock<()>,
    mx_frame: AtomicU64,
    n_backfill: AtomicU64,
    write_frame_number: AtomicU64,
    /// Force a checkpoint attempt once the frame backlog since the last one
    /// reaches this many frames (§10.3), independent of the opportunistic
    /// post-commit attempt `Transaction::commit` always makes.
    checkpoint_threshold_frames: u64,
}

impl WalPageIo {
    pub fn new(base: Box<dyn BasePageIo>, wal: WalFile, checkpoint_threshold_frames: u64) -> Self {
        Self {
            base,
            wal,
            cache: Mutex::new(CacheState {
                page_latest_frame: HashMap::new(),
                wal_frames: HashMap::new(),
            }),
            commit_lock: Mutex::new(()),
            checkpoint_mutex: Mutex::new(()),
            base_rw_lock: RwLock::new(()),
            mx_frame: AtomicU64::new(0),
            n_backfill: AtomicU64::new(0),
            write_frame_number: AtomicU64::new(0),
            checkpoint_threshold_frames,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.base.page_size()
    }

    pub fn mx_frame(&self) -> u64 {
        self.mx_frame.load(Ordering::Acquire)
    }

    pub fn n_backfill(&self) -> u64 {
        self.n_backfill.load(Ordering::Acquire)
    }

    /// Read path (§4.5): tx buffer, then committed-but-not-backfilled WAL
    /// frame, then base file.
    pub fn read_page(&self, ctx: Option<&TransactionContext>, page_id: i32) -> Result<Vec<u8>> {
        let page_size = self.page_size() as usize;

        if let Some(ctx) = ctx {
            if let Some(&(frame_no, _base)) = ctx.page_writes.get(&page_id) {
                let cache = self.cache.lock().expect("cache lock poisoned");
                if let Some((_, _, buf)) = cache.wal_frames.get(&frame_no) {
                    return Ok(buf.clone());
                }
            }
        }

        let committed_frame = {
            let cache = self.cache.lock().expect("cache lock poisoned");
            cache.page_latest_frame.get(&page_id).copied()
        };
        if let Some(frame_no) = committed_frame {
            if frame_no > self.n_backfill() {
                if let Some((_, payload)) = self.wal.read_frame_data(frame_no)? {
                    return Ok(payload);
                }
            }
        }

        let _guard = self.base_rw_lock.read().expect("base_rw_lock poisoned");
        let mut buf = vec![0u8; page_size];
        self.base.read_page(page_id, &mut buf)?;
        Ok(buf)
    }

    /// Write path inside a transaction: buffer the write, do not touch disk.
    pub fn write_page(&self, ctx: &mut TransactionContext, page_id: i32, data: &[u8]) -> Result<()> {
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        if let Some(&(old_frame, base)) = ctx.page_writes.get(&page_id) {
            cache.wal_frames.remove(&old_frame);
            let frame_no = self.write_frame_number.fetch_add(1, Ordering::AcqRel);
            cache
                .wal_frames
                .insert(frame_no, (page_id, 0, data.to_vec()));
            ctx.page_writes.insert(page_id, (frame_no, base));
        } else {
            let base = cache.page_latest_frame.get(&page_id).copied().unwrap_or(0);
            let frame_no = self.write_frame_number.fetch_add(1, Ordering::AcqRel);
            cache
                .wal_frames
                .insert(frame_no, (page_id, 0, data.to_vec()));
            ctx.page_writes.insert(page_id, (frame_no, base));
        }
        Ok(())
    }

    /// Autocommit write outside any transaction (recovery, metadata writes):
    /// a single frame with the commit flag, written and installed immediately.
    pub fn write_page_autocommit(&self, page_id: i32, data: &[u8]) -> Result<()> {
        let _commit_guard = self.commit_lock.lock().expect("commit lock poisoned");
        let frame_no = self.wal.write_frame(0, page_id, 0, data, FLAG_COMMIT)?;
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        cache.page_latest_frame.insert(page_id, frame_no);
        self.write_frame_number.store(frame_no + 1, Ordering::Release);
        self.mx_frame.store(frame_no, Ordering::Release);
        Ok(())
    }

    /// Commit protocol (§4.5): page-conflict check, batch write + fsync,
    /// publish `page_latest_frame`.
    pub fn commit_txn(&self, ctx: TransactionContext) -> Result<()> {
        let _commit_guard = self.commit_lock.lock().expect("commit lock poisoned");

        let mut entries = Vec::with_capacity(ctx.page_writes.len());
        {
            let mut cache = self.cache.lock().expect("cache lock poisoned");
            // Step 1: page-level conflict check.
            for (&page_id, &(_frame_no, base)) in &ctx.page_writes {
                let current = cache.page_latest_frame.get(&page_id).copied().unwrap_or(0);
                if current != base {
                    // Roll back the buffered frames for this aborted transaction.
                    for &(frame_no, _) in ctx.page_writes.values() {
                        cache.wal_frames.remove(&frame_no);
                    }
                    return Err(StratumError::PageConflict {
                        page_id,
                        base,
                        current,
                    });
                }
            }

            // Step 2: collect frames in a deterministic (page_id) order.
            let mut ordered: Vec<(i32, u64)> = ctx
                .page_writes
                .iter()
                .map(|(&pid, &(frame_no, _))| (pid, frame_no))
                .collect();
            ordered.sort_by_key(|&(pid, _)| pid);

            let n = ordered.len();
            for (i, (page_id, frame_no)) in ordered.iter().enumerate() {
                let (_, _, buf) = cache
                    .wal_frames
                    .remove(frame_no)
                    .expect("buffered frame vanished before commit");
                let flags = if i + 1 == n { FLAG_COMMIT } else { 0 };
                entries.push(PendingFrame {
                    tx_id: ctx.tx_id,
                    page_id: *page_id,
                    page_type: 0,
                    flags,
                    payload: buf,
                });
            }
        }

        if entries.is_empty() {
            return Ok(());
        }

        // Step 3: write the batch and fsync.
        let wal_start_frame = self.wal.write_frame_batch(&entries)?;

        // Step 4/5: publish page_latest_frame for each written page.
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        for (i, entry) in entries.iter().enumerate() {
            cache
                .page_latest_frame
                .insert(entry.page_id, wal_start_frame + i as u64);
        }
        let last_frame = wal_start_frame + entries.len() as u64 - 1;
        self.write_frame_number
            .store(last_frame + 1, Ordering::Release);
        self.mx_frame.store(last_frame, Ordering::Release);

        if let Err(e) = self.checkpoint_if_due() {
            log::warn!("threshold-triggered checkpoint failed: {}", e);
        }

        Ok(())
    }

    /// Force a checkpoint now if the backlog has crossed
    /// `checkpoint_threshold_frames`; a no-op otherwise.
    fn checkpoint_if_due(&self) -> Result<bool> {
        if self.mx_frame().saturating_sub(self.n_backfill()) >= self.checkpoint_threshold_frames {
            self.checkpoint()
        } else {
            Ok(false)
        }
    }

    /// Discard a transaction's buffered frames without writing them.
    pub fn abort_txn(&self, ctx: TransactionContext) {
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        for &(frame_no, _) in ctx.page_writes.values() {
            cache.wal_frames.remove(&frame_no);
        }
    }

    /// Checkpoint (§4.5): try-acquire only, never blocks readers/writers.
    /// Returns `Ok(false)` if a checkpoint was already in progress or there
    /// was nothing to do.
    pub fn checkpoint(&self) -> Result<bool> {
        let _cp_guard = match self.checkpoint_mutex.try_lock() {
            Ok(g) => g,
            Err(TryLockError::WouldBlock) => {
                log::warn!("checkpoint skipped: one already in progress");
                return Ok(false);
            }
            Err(TryLockError::Poisoned(_)) => {
                return Err(StratumError::Internal("checkpoint mutex poisoned".to_string()))
            }
        };

        let mx_frame = self.mx_frame();
        let n_backfill = self.n_backfill();
        if mx_frame <= n_backfill {
            return Ok(false);
        }

        let pairs: Vec<(i32, u64)> = {
            let cache = self.cache.lock().expect("cache lock poisoned");
            cache
                .page_latest_frame
                .iter()
                .filter(|&(_, &frame_no)| frame_no > n_backfill && frame_no <= mx_frame)
                .map(|(&pid, &frame_no)| (pid, frame_no))
                .collect()
        };

        {
            let _guard = self.base_rw_lock.write().expect("base_rw_lock poisoned");
            for &(page_id, frame_no) in &pairs {
                if let Some((_, payload)) = self.wal.read_frame_data(frame_no)? {
                    self.base.write_page(page_id, &payload)?;
                }
            }
            self.base.flush()?;
        }

        self.n_backfill.store(mx_frame, Ordering::Release);
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        for &(page_id, frame_no) in &pairs {
            if cache.page_latest_frame.get(&page_id) == Some(&frame_no) {
                cache.page_latest_frame.remove(&page_id);
            }
        }
        let backfill_complete = cache.page_latest_frame.is_empty() && cache.wal_frames.is_empty();
        drop(cache);

        log::info!(
            "checkpoint complete: backfilled through frame {}, {} pages",
            mx_frame,
            pairs.len()
        );

        if backfill_complete {
            self.wal.truncate()?;
        }

        Ok(true)
    }

    /// Recovery (§4.5): replay previously-validated frames, rebuilding
    /// `page_latest_frame` and the write cursor. Frames after the last
    /// commit-flagged frame belong to a transaction that never finished
    /// committing and must not be applied.
    pub fn apply_wal_frames(&self, frames: &[(super::wal_format::FrameHeader, Vec<u8>)]) {
        let last_commit_frame = frames
            .iter()
            .filter(|(h, _)| h.is_commit())
            .map(|(h, _)| h.frame_number)
            .max()
            .unwrap_or(0);

        let mut cache = self.cache.lock().expect("cache lock poisoned");
        for (header, _payload) in frames {
            // Frames past the last commit belong to a transaction that
            // crashed before finishing its commit batch; ignore them.
            if header.frame_number > last_commit_frame {
                continue;
            }
            if header.page_id >= 0 {
                cache
                    .page_latest_frame
                    .insert(header.page_id, header.frame_number);
            }
        }
        drop(cache);

        self.mx_frame.store(last_commit_frame, Ordering::Release);
        self.write_frame_number
            .store(last_commit_frame, Ordering::Release);
        self.n_backfill.store(0, Ordering::Release);
    }
}
