//! Run generation for the external sort.
//!
//! Accumulates rows in memory while the watchdog accepts them, then sorts the
//! chunk and writes it to spill storage as one run. A run may span several
//! consecutive segments when it is the output of an intermediate merge pass.

use std::collections::VecDeque;
use std::sync::Arc;

use compgraph_core::budget::{BudgetGuard, MemoryBudget};
use compgraph_core::id::SpillId;
use compgraph_core::types::{KeyTuple, Row};
use compgraph_mem::{MemoryWatchdog, SegmentReader, SpillHandle, SpillManager, WatchdogGuard};

use crate::traits::OpError;

/// A row with its extracted sort key.
pub(crate) type Keyed = (KeyTuple, Row);

/// Generator for sorted runs.
pub(crate) struct RunGenerator {
    spill_id: SpillId,
    keys: Vec<String>,
    spill: Option<Arc<SpillManager>>,
    max_rows: Option<usize>,
    chunk: Vec<Keyed>,
    guard: WatchdogGuard,
    runs: Vec<SpilledRun>,
    total_rows: u64,
}

impl RunGenerator {
    pub(crate) fn new(
        keys: Vec<String>,
        watchdog: &MemoryWatchdog,
        spill: Option<Arc<SpillManager>>,
        max_rows: Option<usize>,
    ) -> Result<Self, OpError> {
        // A zero-byte guard always succeeds; it grows row by row.
        let guard = watchdog
            .try_acquire(0, "sort_chunk")
            .ok_or_else(|| OpError::Exec("watchdog refused an empty guard".into()))?;
        Ok(Self {
            spill_id: SpillId::next(),
            keys,
            spill,
            max_rows,
            chunk: Vec::new(),
            guard,
            runs: Vec::new(),
            total_rows: 0,
        })
    }

    /// Add one row, spilling the current chunk first if the row does not fit.
    pub(crate) fn push(&mut self, row: Row) -> Result<(), OpError> {
        let key = row.key(&self.keys)?;
        let bytes = row.estimated_bytes();

        let full = self.max_rows.is_some_and(|max| self.chunk.len() >= max);
        let fits = !full && self.guard.try_resize(self.guard.bytes() + bytes);
        if !fits {
            if self.spill.is_some() && !self.chunk.is_empty() {
                self.flush_run()?;
            }
            if !self.guard.try_resize(self.guard.bytes() + bytes) {
                // Nothing left to spill: keep the row uncharged rather than lose it.
                tracing::trace!(bytes, chunk_rows = self.chunk.len(), "row exceeds memory ceiling");
            }
        }

        self.chunk.push((key, row));
        self.total_rows += 1;
        Ok(())
    }

    /// Sort the current chunk and write it out as one run.
    fn flush_run(&mut self) -> Result<(), OpError> {
        let Some(spill) = &self.spill else {
            return Ok(());
        };
        sort_chunk(&mut self.chunk);
        let rows: Vec<Row> = self.chunk.drain(..).map(|(_, row)| row).collect();
        let handle = SpillHandle::create(spill, &rows, self.spill_id)?;
        drop(rows);
        self.guard.try_resize(0);
        self.runs.push(SpilledRun::new(VecDeque::from([handle])));
        Ok(())
    }

    /// Finish accumulation. Returns the spilled runs (in input order) and the
    /// sorted in-memory remainder with the guard charged for it.
    pub(crate) fn finish(mut self) -> (Vec<SpilledRun>, Vec<Keyed>, WatchdogGuard) {
        sort_chunk(&mut self.chunk);
        tracing::debug!(
            spill_id = %self.spill_id,
            rows = self.total_rows,
            runs = self.runs.len(),
            in_memory_rows = self.chunk.len(),
            "sort input consumed"
        );
        (self.runs, self.chunk, self.guard)
    }
}

/// Stable sort by key.
pub(crate) fn sort_chunk(chunk: &mut [Keyed]) {
    chunk.sort_by(|a, b| a.0.cmp(&b.0));
}

/// A sorted run stored as consecutive segments, read front to back.
///
/// At most one segment is open at a time. Each segment is deleted as soon as
/// it has been read to the end; the rest go when the run is dropped.
pub(crate) struct SpilledRun {
    pending: VecDeque<SpillHandle>,
    // reader before handle: the segment is closed before it is deleted
    current: Option<(SegmentReader, SpillHandle)>,
}

impl SpilledRun {
    fn new(segments: VecDeque<SpillHandle>) -> Self {
        Self {
            pending: segments,
            current: None,
        }
    }

    pub(crate) fn next_row(&mut self) -> Option<Result<Row, OpError>> {
        loop {
            if let Some((reader, _)) = &mut self.current {
                match reader.next() {
                    Some(row) => return Some(row.map_err(OpError::from)),
                    None => self.current = None,
                }
            }
            let handle = self.pending.pop_front()?;
            match handle.open() {
                Ok(reader) => self.current = Some((reader, handle)),
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Writes an already sorted stream as one [`SpilledRun`].
///
/// Rows are buffered while the watchdog accepts them; each refusal (or the
/// row ceiling) closes the current segment and starts the next one.
pub(crate) struct RunWriter {
    spill: Arc<SpillManager>,
    spill_id: SpillId,
    max_rows: Option<usize>,
    buffer: Vec<Row>,
    guard: WatchdogGuard,
    segments: VecDeque<SpillHandle>,
}

impl RunWriter {
    pub(crate) fn new(
        spill: Arc<SpillManager>,
        spill_id: SpillId,
        watchdog: &MemoryWatchdog,
        max_rows: Option<usize>,
    ) -> Result<Self, OpError> {
        let guard = watchdog
            .try_acquire(0, "merge_pass")
            .ok_or_else(|| OpError::Exec("watchdog refused an empty guard".into()))?;
        Ok(Self {
            spill,
            spill_id,
            max_rows,
            buffer: Vec::new(),
            guard,
            segments: VecDeque::new(),
        })
    }

    pub(crate) fn push(&mut self, row: Row) -> Result<(), OpError> {
        let bytes = row.estimated_bytes();
        let full = self.max_rows.is_some_and(|max| self.buffer.len() >= max);
        if full || !self.guard.try_resize(self.guard.bytes() + bytes) {
            if !self.buffer.is_empty() {
                self.flush()?;
            }
            self.guard.try_resize(bytes);
        }
        self.buffer.push(row);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OpError> {
        let handle = SpillHandle::create(&self.spill, &self.buffer, self.spill_id)?;
        self.buffer.clear();
        self.guard.try_resize(0);
        self.segments.push_back(handle);
        Ok(())
    }

    pub(crate) fn finish(mut self) -> Result<SpilledRun, OpError> {
        if !self.buffer.is_empty() {
            self.flush()?;
        }
        Ok(SpilledRun::new(self.segments))
    }
}
