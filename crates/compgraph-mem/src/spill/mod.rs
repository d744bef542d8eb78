//! Spill manager for the external sort.
//!
//! Writes sorted row chunks to storage as checksummed segments and streams
//! them back one row at a time.

pub mod codec;
mod record;
pub mod segment;

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use compgraph_core::id::SpillId;
use compgraph_core::types::Row;

use crate::error::{Error, Result};

pub use codec::Codec;
pub use segment::{SegmentHeader, SegmentMeta, SegmentName, HEADER_LEN};

/// Abstract storage interface for spill segments.
///
/// Implemented by `compgraph-io::FsStorage` for the local filesystem and by
/// `compgraph-io::MemoryStorage` for tests.
pub trait Storage: Send + Sync {
    /// Write bytes to a path. Creates parent directories if needed.
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Open a path for sequential reading.
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Delete a path. Idempotent (no error if path doesn't exist).
    fn delete(&self, path: &str) -> Result<()>;
}

/// Central manager for spilled segments.
///
/// Shared between sort stages behind an `Arc`; all methods take `&self`.
pub struct SpillManager {
    storage: Box<dyn Storage>,
    codec: Codec,
    root_dir: String,
    next_run: AtomicU32,
    bytes_written: AtomicU64,
    segments: Mutex<HashMap<SegmentName, SegmentMeta>>,
}

impl SpillManager {
    pub fn new(storage: Box<dyn Storage>, codec: Codec, root_dir: impl Into<String>) -> Self {
        Self {
            storage,
            codec,
            root_dir: root_dir.into(),
            next_run: AtomicU32::new(0),
            bytes_written: AtomicU64::new(0),
            segments: Mutex::new(HashMap::new()),
        }
    }

    fn segments(&self) -> MutexGuard<'_, HashMap<SegmentName, SegmentMeta>> {
        self.segments.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write rows to storage, in order, and return the segment metadata.
    ///
    /// Steps:
    /// 1. Encode each row as one tagged JSON line
    /// 2. Compress the payload with the configured codec
    /// 3. Checksum header + uncompressed payload with BLAKE3
    /// 4. Write header + compressed payload to storage
    pub fn write_rows(&self, rows: &[Row], spill_id: SpillId, run_index: u32) -> Result<SegmentMeta> {
        let mut payload = Vec::new();
        for row in rows {
            record::encode_row(row, &mut payload)?;
        }
        let uncompressed_len = payload.len() as u64;

        let compressed = codec::compress(self.codec, &payload)?;
        let compressed_len = compressed.len() as u64;

        let header = SegmentHeader::new(self.codec, uncompressed_len, compressed_len);
        let header_bytes = header.to_bytes();

        let mut hasher = blake3::Hasher::new();
        hasher.update(&header_bytes);
        hasher.update(&payload);
        let checksum: [u8; 32] = hasher.finalize().into();
        drop(payload);

        let name = SegmentName::new(spill_id, run_index);
        let path = format!("{}/{}.seg", self.root_dir, name.0);

        let mut full_segment = Vec::with_capacity(header_bytes.len() + compressed.len());
        full_segment.extend_from_slice(&header_bytes);
        full_segment.extend_from_slice(&compressed);
        self.storage.write(&path, &full_segment)?;
        self.bytes_written
            .fetch_add(full_segment.len() as u64, Ordering::Relaxed);

        let meta = SegmentMeta {
            name: name.clone(),
            path,
            codec: self.codec,
            rows: rows.len() as u64,
            uncompressed_len,
            compressed_len,
            checksum,
        };
        tracing::debug!(
            segment = %meta.name.0,
            rows = meta.rows,
            bytes = full_segment.len(),
            codec = self.codec.name(),
            "spilled run"
        );

        self.segments().insert(name, meta.clone());
        Ok(meta)
    }

    /// Open a segment for streaming. The checksum and row count are verified
    /// once the last row has been read.
    pub fn read_rows(&self, meta: &SegmentMeta) -> Result<SegmentReader> {
        let mut raw = self.storage.open(&meta.path)?;

        let mut header_bytes = [0u8; HEADER_LEN];
        raw.read_exact(&mut header_bytes)
            .map_err(|e| Error::Storage(format!("read header of {}: {e}", meta.path)))?;
        let header = SegmentHeader::from_bytes(&header_bytes)?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(&header_bytes);

        let decoded = codec::decoder(header.codec, raw)?;
        Ok(SegmentReader {
            reader: BufReader::new(decoded),
            hasher,
            expected: meta.checksum,
            expected_rows: meta.rows,
            rows_read: 0,
            name: meta.name.0.clone(),
            line: String::new(),
            done: false,
        })
    }

    /// Generate a unique run index for this spill session.
    pub fn next_run_index(&self) -> u32 {
        self.next_run.fetch_add(1, Ordering::Relaxed)
    }

    /// Delete a segment from storage and remove its metadata.
    pub fn delete_segment(&self, name: &SegmentName) -> Result<()> {
        let removed = self.segments().remove(name);
        if let Some(meta) = removed {
            self.storage.delete(&meta.path)?;
        }
        Ok(())
    }

    /// Total bytes written to storage since creation.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn root_dir(&self) -> &str {
        &self.root_dir
    }
}

impl std::fmt::Debug for SpillManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpillManager")
            .field("codec", &self.codec)
            .field("root_dir", &self.root_dir)
            .field("segments", &self.segments().len())
            .finish()
    }
}

/// Owns one spilled segment; dropping the handle deletes it.
#[derive(Debug)]
pub struct SpillHandle {
    mgr: Arc<SpillManager>,
    meta: SegmentMeta,
}

impl SpillHandle {
    /// Spill `rows` as a new run of `spill_id`.
    pub fn create(mgr: &Arc<SpillManager>, rows: &[Row], spill_id: SpillId) -> Result<Self> {
        let run_index = mgr.next_run_index();
        let meta = mgr.write_rows(rows, spill_id, run_index)?;
        Ok(Self {
            mgr: Arc::clone(mgr),
            meta,
        })
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    pub fn open(&self) -> Result<SegmentReader> {
        self.mgr.read_rows(&self.meta)
    }
}

impl Drop for SpillHandle {
    fn drop(&mut self) {
        if let Err(e) = self.mgr.delete_segment(&self.meta.name) {
            tracing::warn!(segment = %self.meta.name.0, error = %e, "failed to delete spill segment");
        }
    }
}

/// Streams the rows of one segment back in write order.
pub struct SegmentReader {
    reader: BufReader<Box<dyn Read + Send>>,
    hasher: blake3::Hasher,
    expected: [u8; 32],
    expected_rows: u64,
    rows_read: u64,
    name: String,
    line: String,
    done: bool,
}

impl SegmentReader {
    fn finish(&mut self) -> Result<()> {
        let computed: [u8; 32] = self.hasher.finalize().into();
        if computed != self.expected || self.rows_read != self.expected_rows {
            return Err(Error::ChecksumMismatch(self.name.clone()));
        }
        Ok(())
    }
}

impl Iterator for SegmentReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.line.clear();
        match self.reader.read_line(&mut self.line) {
            Ok(0) => {
                self.done = true;
                self.finish().err().map(Err)
            }
            Ok(_) => {
                self.hasher.update(self.line.as_bytes());
                self.rows_read += 1;
                match record::decode_row(self.line.trim_end_matches('\n')) {
                    Ok(row) => Some(Ok(row)),
                    Err(e) => {
                        self.done = true;
                        Some(Err(Error::Codec(format!("json deserialize in {}: {e}", self.name))))
                    }
                }
            }
            Err(e) => {
                self.done = true;
                Some(Err(Error::Storage(format!("read {}: {e}", self.name))))
            }
        }
    }
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("segment", &self.name)
            .field("rows_read", &self.rows_read)
            .finish()
    }
}
