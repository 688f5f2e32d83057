// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Chunk Store
//!
//! Append-only storage of log records in size-bounded chunk files.
//!
//! # Guarantees
//! - Exactly one chunk is open for writing; all writers go through one lock
//! - A chunk's framed record bytes never exceed `chunk_size_bytes`, except a
//!   single oversized record which gets a chunk of its own
//! - Frames destined for one chunk land with a single append + fsync; a failed
//!   append is truncated away, a crash mid-append is truncated on `open`
//! - Listing reads the open chunk from memory, so it never reports a
//!   half-written append

use crate::chunk::{self, ChunkHeader, ChunkMeta, ChunkReader, SealTrailer};
use crate::error::{PersistenceError, Result};
use logpulse_kernel::{ChunkId, LogRecord, Timestamp, TimestampClock};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub root: PathBuf,
    pub chunk_size_bytes: u64,
    /// fsync after every append. Off only for throwaway stores.
    pub sync_writes: bool,
}

impl StoreOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            sync_writes: true,
        }
    }

    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size_bytes = bytes;
        self
    }

    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }
}

struct ActiveChunk {
    id: ChunkId,
    created_at: Timestamp,
    file: File,
    file_len: u64,
    data_bytes: u64,
    record_count: u64,
}

impl ActiveChunk {
    fn meta(&self) -> ChunkMeta {
        ChunkMeta {
            id: self.id,
            created_at: self.created_at,
            data_bytes: self.data_bytes,
            record_count: self.record_count,
            sealed: false,
            disk_bytes: self.file_len,
        }
    }
}

pub struct ChunkStore {
    options: StoreOptions,
    clock: TimestampClock,
    active: Mutex<ActiveChunk>,
    open_id: AtomicU64,
}

impl ChunkStore {
    /// Open (or create) the store rooted at `options.root`.
    ///
    /// Unsealed chunks are recovered: torn tails are truncated, every unsealed
    /// chunk but the newest is sealed, and the newest becomes the open chunk.
    pub fn open(options: StoreOptions) -> Result<Self> {
        if options.chunk_size_bytes == 0 {
            return Err(PersistenceError::InvalidFormat("chunk size must be positive".into()));
        }
        fs::create_dir_all(&options.root)?;
        remove_stale_temp_files(&options.root)?;

        let ids = list_chunk_ids(&options.root)?;
        let clock = TimestampClock::new();
        let mut resumed = None;

        for (i, id) in ids.iter().enumerate() {
            let path = chunk_path(&options.root, *id);
            let meta = chunk::read_meta(&path)?;
            if meta.id != *id {
                return Err(PersistenceError::InvalidFormat(format!(
                    "{:?} holds chunk {}",
                    path, meta.id
                )));
            }
            clock.observe(meta.created_at);
            if meta.sealed {
                continue;
            }

            if i + 1 == ids.len() {
                resumed = Some(chunk::recover(&path)?);
            } else {
                tracing::warn!("Sealing orphaned open chunk {}", id);
                chunk::seal_file(&path)?;
            }
        }

        let active = match resumed {
            Some(scan) => {
                let file = OpenOptions::new()
                    .append(true)
                    .open(chunk_path(&options.root, scan.header.chunk_id))?;
                tracing::info!(
                    "Resuming open chunk {} ({} records, {} bytes)",
                    scan.header.chunk_id,
                    scan.record_count,
                    scan.data_bytes
                );
                ActiveChunk {
                    id: scan.header.chunk_id,
                    created_at: scan.header.created_at,
                    file,
                    file_len: scan.valid_len,
                    data_bytes: scan.data_bytes,
                    record_count: scan.record_count,
                }
            }
            None => {
                let id = ids.last().map(ChunkId::next).unwrap_or_default();
                create_chunk(&options.root, id, clock.now())?
            }
        };

        Ok(Self {
            open_id: AtomicU64::new(active.id.0),
            active: Mutex::new(active),
            clock,
            options,
        })
    }

    pub fn root(&self) -> &Path {
        &self.options.root
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    fn lock_active(&self) -> MutexGuard<'_, ActiveChunk> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `records`, rolling over to new chunks as the size bound requires.
    ///
    /// Returns the id of the chunk that received the last record. A batch that
    /// spans a rollover is atomic per chunk, not as a whole.
    pub fn write(&self, records: &[LogRecord]) -> Result<ChunkId> {
        let mut active = self.lock_active();
        if records.is_empty() {
            return Ok(active.id);
        }

        let limit = self.options.chunk_size_bytes;
        let mut pending: Vec<u8> = Vec::new();
        let mut pending_count = 0u64;
        let mut last_written = active.id;

        for record in records {
            let frame = chunk::encode_frame(record)?;
            let len = frame.len() as u64;
            let used = active.data_bytes + pending.len() as u64;

            if used > 0 && used + len > limit {
                if pending_count > 0 {
                    self.append(&mut active, &pending, pending_count)?;
                    last_written = active.id;
                    pending.clear();
                    pending_count = 0;
                }
                self.roll(&mut active)?;
            }

            pending.extend_from_slice(&frame);
            pending_count += 1;

            if len > limit {
                tracing::debug!("Record of {} bytes exceeds chunk bound, writing alone", len);
                self.append(&mut active, &pending, pending_count)?;
                last_written = active.id;
                pending.clear();
                pending_count = 0;
                self.roll(&mut active)?;
            }
        }

        if pending_count > 0 {
            self.append(&mut active, &pending, pending_count)?;
            last_written = active.id;
        }

        Ok(last_written)
    }

    // Single append + fsync; truncated back on failure.
    fn append(&self, active: &mut ActiveChunk, bytes: &[u8], records: u64) -> Result<()> {
        let before = active.file_len;
        let res = active.file.write_all(bytes).and_then(|_| {
            if self.options.sync_writes {
                active.file.sync_data()
            } else {
                Ok(())
            }
        });

        if let Err(e) = res {
            if let Err(trunc) = active.file.set_len(before) {
                tracing::error!("Failed to roll back chunk {} after write error: {}", active.id, trunc);
            }
            return Err(e.into());
        }

        active.file_len += bytes.len() as u64;
        active.data_bytes += bytes.len() as u64;
        active.record_count += records;
        Ok(())
    }

    // Open the successor, then seal the current chunk. On any failure the
    // current chunk stays open and unsealed, so later writes remain readable.
    fn roll(&self, active: &mut ActiveChunk) -> Result<()> {
        let next = create_chunk(&self.options.root, active.id.next(), self.clock.now())?;

        let trailer = SealTrailer {
            record_count: active.record_count,
            data_bytes: active.data_bytes,
        };
        let before = active.file_len;
        if let Err(e) = active
            .file
            .write_all(&trailer.to_bytes())
            .and_then(|_| active.file.sync_all())
        {
            let _ = active.file.set_len(before);
            let next_path = chunk_path(&self.options.root, next.id);
            drop(next);
            if let Err(rm) = fs::remove_file(&next_path) {
                tracing::warn!("Failed to remove unused chunk {:?}: {}", next_path, rm);
            }
            return Err(e.into());
        }
        tracing::debug!(
            "Sealed chunk {} ({} records, {} bytes)",
            active.id,
            active.record_count,
            active.data_bytes
        );

        self.open_id.store(next.id.0, Ordering::Release);
        *active = next;
        Ok(())
    }

    /// Close a chunk to further writes. Idempotent.
    ///
    /// Sealing the open chunk opens a fresh one in its place.
    pub fn seal(&self, id: ChunkId) -> Result<()> {
        let mut active = self.lock_active();
        if id == active.id {
            return self.roll(&mut active);
        }
        if id > active.id {
            return Err(PersistenceError::NotFound(id));
        }

        let path = chunk_path(&self.options.root, id);
        match chunk::seal_file(&path) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Err(PersistenceError::NotFound(id)),
            Err(e) => Err(e),
        }
    }

    /// Lazily list chunks in creation order.
    ///
    /// Every call takes a fresh directory listing; no cursor survives it.
    pub fn list_chunks(&self) -> Result<ChunkIter> {
        let active = self.lock_active();
        let open = active.meta();
        let ids = list_chunk_ids(&self.options.root)?;
        drop(active);

        Ok(ChunkIter {
            root: self.options.root.clone(),
            ids: ids.into_iter(),
            open,
        })
    }

    /// Snapshot of the chunk currently accepting writes.
    pub fn open_chunk(&self) -> ChunkMeta {
        self.lock_active().meta()
    }

    pub fn open_chunk_id(&self) -> ChunkId {
        ChunkId(self.open_id.load(Ordering::Acquire))
    }

    /// Remove a sealed chunk.
    ///
    /// A second delete of the same id reports `NotFound`.
    pub fn delete(&self, id: ChunkId) -> Result<()> {
        if id == self.open_chunk_id() {
            return Err(PersistenceError::ChunkOpen(id));
        }

        let path = chunk_path(&self.options.root, id);
        let meta = match chunk::read_meta(&path) {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => return Err(PersistenceError::NotFound(id)),
            Err(e) => return Err(e),
        };
        if !meta.sealed {
            return Err(PersistenceError::NotSealed(id));
        }

        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PersistenceError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Decode every record of a chunk, in write order.
    pub fn read_chunk(&self, id: ChunkId) -> Result<Vec<LogRecord>> {
        // Hold the writer lock for the open chunk so no append is half visible.
        let _guard = if id == self.open_chunk_id() {
            Some(self.lock_active())
        } else {
            None
        };

        let path = chunk_path(&self.options.root, id);
        let reader = match ChunkReader::open(&path) {
            Ok(reader) => reader,
            Err(e) if e.is_not_found() => return Err(PersistenceError::NotFound(id)),
            Err(e) => return Err(e),
        };
        reader.collect()
    }
}

/// Lazy, finite sequence of chunk metadata in id (= creation) order.
pub struct ChunkIter {
    root: PathBuf,
    ids: std::vec::IntoIter<ChunkId>,
    open: ChunkMeta,
}

impl Iterator for ChunkIter {
    type Item = Result<ChunkMeta>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let id = self.ids.next()?;
            if id == self.open.id {
                return Some(Ok(self.open.clone()));
            }
            match chunk::read_meta(&chunk_path(&self.root, id)) {
                Ok(meta) => return Some(Ok(meta)),
                // Deleted since the listing was taken.
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

pub fn chunk_path(root: &Path, id: ChunkId) -> PathBuf {
    root.join(chunk::chunk_file_name(id))
}

fn list_chunk_ids(root: &Path) -> Result<Vec<ChunkId>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if let Some(id) = entry.file_name().to_str().and_then(chunk::parse_chunk_file_name) {
            ids.push(id);
        }
    }
    ids.sort();
    Ok(ids)
}

fn remove_stale_temp_files(root: &Path) -> Result<()> {
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
            tracing::debug!("Removing stale {:?}", path);
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

// Header goes to a temp file first so a chunk file never has a partial header.
fn create_chunk(root: &Path, id: ChunkId, created_at: Timestamp) -> Result<ActiveChunk> {
    let path = chunk_path(root, id);
    let tmp_path = path.with_extension("tmp");
    let header = ChunkHeader {
        chunk_id: id,
        created_at,
    };

    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&header.to_bytes())?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, &path)?;

    let file = OpenOptions::new().append(true).open(&path)?;
    Ok(ActiveChunk {
        id,
        created_at,
        file,
        file_len: ChunkHeader::SIZE as u64,
        data_bytes: 0,
        record_count: 0,
    })
}
