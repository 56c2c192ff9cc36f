//! WAL File (§4.4): an append-only log of salted, checksummed page frames.
//!
//! Grounded on the teacher's `engines/granite/wal.rs`, which serializes the
//! durability mechanics (a single internal lock serializing writes and
//! truncations, `file.sync_data()` for fsync) this module keeps. What it
//! does not keep is the bincode/length-prefixed record format and the
//! dedicated worker thread + commit-latch indirection: the spec's commit
//! protocol (§4.3 step 5) calls `write_frame_batch` and fsyncs synchronously
//! on the commit path, so there is no group-commit queue to build here.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use rand::Rng;

use crate::error::{Result, StratumError};
use super::wal_format::{FrameHeader, WalHeader, FLAG_COMMIT, FRAME_HEADER_SIZE, HEADER_SIZE};

/// How aggressively the WAL fsyncs after appending frames, mirroring this
/// lineage's always/batched/never durability presets (§10.3).
#[derive(Clone, Debug)]
pub enum FsyncPolicy {
    /// fsync on every frame batch (the default).
    Always,
    /// fsync once at least `max_unfsynced_bytes` are buffered or
    /// `max_delay_ms` have elapsed since the last fsync, whichever first.
    Batched {
        max_unfsynced_bytes: u64,
        max_delay_ms: u64,
    },
    /// Never fsync explicitly; rely on the OS to flush eventually. Only
    /// appropriate for throwaway/test data directories.
    Never,
}

impl Default for FsyncPolicy {
    fn default() -> Self {
        FsyncPolicy::Always
    }
}

/// One frame to be appended, as requested by a caller (WAL Page I/O).
pub struct PendingFrame {
    pub tx_id: u64,
    pub page_id: i32,
    pub page_type: u8,
    pub flags: u8,
    pub payload: Vec<u8>,
}

pub struct WalFile {
    path: PathBuf,
    page_size: u32,
    salt1: AtomicU32,
    salt2: AtomicU32,
    /// Frame number that will be assigned to the next appended frame.
    next_frame_number: AtomicU64,
    file: Mutex<File>,
    fsync_policy: FsyncPolicy,
    unsynced_bytes: AtomicU64,
    last_fsync: Mutex<Instant>,
}

impl WalFile {
    /// Create a fresh WAL file at `path`, writing the header with
    /// `salt1 = 1` and a random `salt2` (§4.4).
    pub fn create(path: &Path, page_size: u32, fsync_policy: FsyncPolicy) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)?;

        let salt2: u32 = rand::thread_rng().gen();
        let mut header = WalHeader::new(page_size);
        header.checkpoint_tx_id = 0;
        // salt1/salt2 are not part of WalHeader in §6's wire layout (they
        // live per-frame); WalFile tracks the *current generation's*
        // expected salts in memory and validates frames against them.
        file.write_all(&header.to_bytes())?;
        file.sync_all()?;

        log::info!("created WAL file at {:?} (page_size={})", path, page_size);

        Ok(Self {
            path: path.to_path_buf(),
            page_size,
            salt1: AtomicU32::new(1),
            salt2: AtomicU32::new(salt2),
            next_frame_number: AtomicU64::new(0),
            file: Mutex::new(file),
            fsync_policy,
            unsynced_bytes: AtomicU64::new(0),
            last_fsync: Mutex::new(Instant::now()),
        })
    }

    /// Open an existing WAL file, validating its header and inferring the
    /// current frame count from file length. The salts used to validate
    /// frames are recovered by scanning: the first valid frame's salts are
    /// taken as the current generation (a freshly-created file with no
    /// frames yet has no established salt pair until the first write, so
    /// `salt1`/`salt2` start at `(1, 0)` and are only meaningful once a
    /// frame exists).
    pub fn open(path: &Path, fsync_policy: FsyncPolicy) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut header_buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        let header = WalHeader::from_bytes(&header_buf)?;

        let file_len = file.metadata()?.len();
        let frame_size = (FRAME_HEADER_SIZE as u64) + header.page_size as u64;
        let frame_count = (file_len.saturating_sub(HEADER_SIZE as u64)) / frame_size;

        let (salt1, salt2) = if frame_count > 0 {
            let mut buf = vec![0u8; FRAME_HEADER_SIZE];
            file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
            file.read_exact(&mut buf)?;
            let s1 = u32::from_le_bytes(buf[28..32].try_into().unwrap());
            let s2 = u32::from_le_bytes(buf[32..36].try_into().unwrap());
            (s1, s2)
        } else {
            (1, 0)
        };

        Ok(Self {
            path: path.to_path_buf(),
            page_size: header.page_size,
            salt1: AtomicU32::new(salt1),
            salt2: AtomicU32::new(salt2),
            next_frame_number: AtomicU64::new(frame_count),
            file: Mutex::new(file),
            fsync_policy,
            unsynced_bytes: AtomicU64::new(0),
            last_fsync: Mutex::new(Instant::now()),
        })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn salts(&self) -> (u32, u32) {
        (
            self.salt1.load(Ordering::Acquire),
            self.salt2.load(Ordering::Acquire),
        )
    }

    fn frame_offset(&self, frame_number: u64) -> u64 {
        HEADER_SIZE as u64 + frame_number * (FRAME_HEADER_SIZE as u64 + self.page_size as u64)
    }

    /// Append a single frame, used for autocommit writes. fsyncs before
    /// returning.
    pub fn write_frame(
        &self,
        tx_id: u64,
        page_id: i32,
        page_type: u8,
        payload: &[u8],
        flags: u8,
    ) -> Result<u64> {
        self.write_frame_batch(&[PendingFrame {
            tx_id,
            page_id,
            page_type,
            flags,
            payload: payload.to_vec(),
        }])
    }

    /// Append N contiguous frames in one I/O and fsync once. Returns the
    /// frame number of the first frame written. This is the atomicity
    /// primitive described in §4.4: callers are expected to set the commit
    /// flag only on the last entry.
    pub fn write_frame_batch(&self, entries: &[PendingFrame]) -> Result<u64> {
        if entries.is_empty() {
            return Err(StratumError::Internal(
                "write_frame_batch called with no entries".to_string(),
            ));
        }

        let (salt1, salt2) = self.salts();
        let page_size = self.page_size as usize;
        let mut file = self.file.lock().expect("WalFile mutex poisoned");

        let first_frame_number = self.next_frame_number.load(Ordering::Acquire);
        let mut buf = Vec::with_capacity(entries.len() * (FRAME_HEADER_SIZE + page_size));
        for (i, entry) in entries.iter().enumerate() {
            let mut header = FrameHeader {
                frame_number: first_frame_number + i as u64,
                tx_id: entry.tx_id,
                page_id: entry.page_id,
                page_type: entry.page_type,
                flags: entry.flags,
                data_length: entry.payload.len().min(page_size) as u32,
                salt1,
                salt2,
                frame_crc32: 0,
            };
            buf.extend_from_slice(&header.encode(&entry.payload, page_size));
        }

        file.seek(SeekFrom::Start(self.frame_offset(first_frame_number)))?;
        file.write_all(&buf)?;
        self.fsync_per_policy(&mut file, buf.len() as u64)?;

        self.next_frame_number
            .store(first_frame_number + entries.len() as u64, Ordering::Release);

        Ok(first_frame_number)
    }

    /// Apply `fsync_policy` after `bytes_written` bytes were just appended
    /// to `file` (§10.3): `Always` syncs unconditionally, `Never` never
    /// does, `Batched` defers until either threshold is crossed.
    fn fsync_per_policy(&self, file: &mut File, bytes_written: u64) -> Result<()> {
        match &self.fsync_policy {
            FsyncPolicy::Always => file.sync_data()?,
            FsyncPolicy::Never => {}
            FsyncPolicy::Batched {
                max_unfsynced_bytes,
                max_delay_ms,
            } => {
                let unsynced = self
                    .unsynced_bytes
                    .fetch_add(bytes_written, Ordering::AcqRel)
                    + bytes_written;
                let due = self
                    .last_fsync
                    .lock()
                    .expect("WalFile last_fsync mutex poisoned")
                    .elapsed()
                    .as_millis() as u64
                    >= *max_delay_ms;
                if unsynced >= *max_unfsynced_bytes || due {
                    file.sync_data()?;
                    self.unsynced_bytes.store(0, Ordering::Release);
                    *self
                        .last_fsync
                        .lock()
                        .expect("WalFile last_fsync mutex poisoned") = Instant::now();
                }
            }
        }
        Ok(())
    }

    /// Read and validate a single frame. Returns `Ok(None)` (not an error)
    /// if the frame is past EOF, has mismatched salts, or fails its CRC —
    /// all three mean "not a valid current-generation frame".
    pub fn read_frame_data(&self, frame_number: u64) -> Result<Option<(FrameHeader, Vec<u8>)>> {
        let (salt1, salt2) = self.salts();
        let page_size = self.page_size as usize;
        let mut file = self.file.lock().expect("WalFile mutex poisoned");

        let offset = self.frame_offset(frame_number);
        if file.seek(SeekFrom::Start(offset)).is_err() {
            return Ok(None);
        }
        let mut buf = vec![0u8; FRAME_HEADER_SIZE + page_size];
        match file.read_exact(&mut buf) {
            Ok(()) => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        Ok(FrameHeader::decode(&buf, page_size, salt1, salt2))
    }

    /// Reset the file to header-only and advance the salts so any
    /// surviving frames in the filesystem tail become foreign to future
    /// scanners (§4.4).
    pub fn truncate(&self) -> Result<()> {
        let new_salt1 = self.salt1.fetch_add(1, Ordering::AcqRel) + 1;
        let new_salt2: u32 = rand::thread_rng().gen();
        self.salt2.store(new_salt2, Ordering::Release);

        let mut file = self.file.lock().expect("WalFile mutex poisoned");
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        let header = WalHeader::new(self.page_size);
        file.write_all(&header.to_bytes())?;
        file.sync_all()?;
        drop(file);

        self.next_frame_number.store(0, Ordering::Release);
        log::info!(
            "WAL truncated at {:?}, salt advanced to ({}, {})",
            self.path,
            new_salt1,
            new_salt2
        );
        Ok(())
    }

    /// Scan from frame 0, stopping at EOF, salt mismatch, or bad CRC —
    /// never skip past a bad frame and keep scanning, a torn write or a
    /// crash mid-batch is supposed to be terminal for the scan (§4.4, §6).
    pub fn read_all_frames(&self) -> Result<Vec<(FrameHeader, Vec<u8>)>> {
        let mut frames = Vec::new();
        let mut n = 0u64;
        loop {
            match self.read_frame_data(n)? {
                Some(frame) => {
                    frames.push(frame);
                    n += 1;
                }
                None => break,
            }
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests;
