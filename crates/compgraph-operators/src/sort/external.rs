//! External sort operator with run generation and k-way merge.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use compgraph_core::budget::BudgetGuard;
use compgraph_core::id::SpillId;
use compgraph_core::types::{KeyTuple, Row};
use compgraph_mem::{MemoryWatchdog, SpillManager, WatchdogGuard};

use super::run::{Keyed, RunGenerator, RunWriter, SpilledRun};
use crate::traits::{OpError, RowStream};

/// Most runs read at once by one merge. More runs than this are first merged
/// in groups into longer runs.
pub const MAX_MERGE_FAN_IN: usize = 64;

/// External sort operator.
///
/// Consumes its whole input on the first pull. If the watchdog never refuses
/// a row, the result is a plain in-memory sort; otherwise sorted runs are
/// spilled and merged back with a min-heap. Equal keys keep input order.
///
/// Rows held in memory stay charged to the watchdog only until they are
/// yielded, so a downstream sort can reuse the room as this one drains.
#[derive(Debug, Clone)]
pub struct ExternalSort {
    keys: Vec<String>,
    watchdog: MemoryWatchdog,
    spill: Option<Arc<SpillManager>>,
    max_rows_per_run: Option<usize>,
}

impl ExternalSort {
    /// In-memory only until a spill manager is attached.
    pub fn new(keys: Vec<String>, watchdog: MemoryWatchdog) -> Self {
        Self {
            keys,
            watchdog,
            spill: None,
            max_rows_per_run: None,
        }
    }

    pub fn with_spill(mut self, spill: Arc<SpillManager>) -> Self {
        self.spill = Some(spill);
        self
    }

    pub fn with_max_rows_per_run(mut self, rows: Option<usize>) -> Self {
        self.max_rows_per_run = rows;
        self
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Wrap `input` in a lazily sorted stream.
    pub fn sort(self, input: RowStream) -> SortStream {
        SortStream {
            op: self,
            state: SortState::Pending(input),
        }
    }
}

enum SortState {
    Pending(RowStream),
    InMemory {
        rows: std::vec::IntoIter<Keyed>,
        guard: WatchdogGuard,
    },
    Merging(KWayMerge),
    Done,
}

/// Output of [`ExternalSort::sort`].
pub struct SortStream {
    op: ExternalSort,
    state: SortState,
}

impl SortStream {
    fn consume_input(&mut self, input: RowStream) -> Result<SortState, OpError> {
        let mut gen = RunGenerator::new(
            self.op.keys.clone(),
            &self.op.watchdog,
            self.op.spill.clone(),
            self.op.max_rows_per_run,
        )?;
        for row in input {
            gen.push(row?)?;
        }
        let (runs, chunk, guard) = gen.finish();

        if runs.is_empty() {
            tracing::debug!(keys = ?self.op.keys, rows = chunk.len(), "in-memory sort");
            return Ok(SortState::InMemory {
                rows: chunk.into_iter(),
                guard,
            });
        }

        let runs = self.reduce_fan_in(runs)?;
        tracing::debug!(
            keys = ?self.op.keys,
            spilled_runs = runs.len(),
            in_memory_rows = chunk.len(),
            "k-way merge"
        );
        Ok(SortState::Merging(KWayMerge::new(
            self.op.keys.clone(),
            runs,
            chunk,
            Some(guard),
        )))
    }

    /// Merge consecutive groups of runs until at most [`MAX_MERGE_FAN_IN`]
    /// remain. Groups keep their input order, so equal keys stay stable.
    fn reduce_fan_in(&self, mut runs: Vec<SpilledRun>) -> Result<Vec<SpilledRun>, OpError> {
        let Some(spill) = &self.op.spill else {
            return Ok(runs);
        };
        let spill_id = SpillId::next();
        let mut pass = 0;
        while runs.len() > MAX_MERGE_FAN_IN {
            pass += 1;
            let before = runs.len();
            let mut merged = Vec::with_capacity(before.div_ceil(MAX_MERGE_FAN_IN));
            let mut rest = runs.into_iter();
            loop {
                let group: Vec<SpilledRun> = rest.by_ref().take(MAX_MERGE_FAN_IN).collect();
                if group.len() <= 1 {
                    merged.extend(group);
                    break;
                }
                let mut writer = RunWriter::new(
                    Arc::clone(spill),
                    spill_id,
                    &self.op.watchdog,
                    self.op.max_rows_per_run,
                )?;
                for row in KWayMerge::new(self.op.keys.clone(), group, Vec::new(), None) {
                    writer.push(row?)?;
                }
                merged.push(writer.finish()?);
            }
            tracing::debug!(pass, runs_in = before, runs_out = merged.len(), "merge pass");
            runs = merged;
        }
        Ok(runs)
    }
}

/// Give a yielded row's bytes back to the watchdog.
fn release(guard: &mut WatchdogGuard, row: &Row) {
    guard.try_resize(guard.bytes().saturating_sub(row.estimated_bytes()));
}

impl Iterator for SortStream {
    type Item = Result<Row, OpError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.state {
                SortState::Pending(_) => {
                    let SortState::Pending(input) = std::mem::replace(&mut self.state, SortState::Done)
                    else {
                        return None;
                    };
                    match self.consume_input(input) {
                        Ok(state) => self.state = state,
                        Err(e) => return Some(Err(e)),
                    }
                }
                SortState::InMemory { rows, guard } => match rows.next() {
                    Some((_, row)) => {
                        release(guard, &row);
                        return Some(Ok(row));
                    }
                    None => self.state = SortState::Done,
                },
                SortState::Merging(merge) => match merge.next() {
                    Some(Ok(row)) => return Some(Ok(row)),
                    Some(Err(e)) => {
                        self.state = SortState::Done;
                        return Some(Err(e));
                    }
                    None => self.state = SortState::Done,
                },
                SortState::Done => return None,
            }
        }
    }
}

/// One sorted input of the merge.
enum MergeSource {
    Spilled(SpilledRun),
    Memory {
        rows: std::vec::IntoIter<Keyed>,
        guard: WatchdogGuard,
    },
}

impl MergeSource {
    fn next_keyed(&mut self, keys: &[String]) -> Option<Result<Keyed, OpError>> {
        match self {
            MergeSource::Spilled(run) => Some(run.next_row()?.and_then(|row| {
                let key = row.key(keys)?;
                Ok((key, row))
            })),
            MergeSource::Memory { rows, guard } => {
                let (key, row) = rows.next()?;
                release(guard, &row);
                Some(Ok((key, row)))
            }
        }
    }
}

/// Entry in the merge heap.
///
/// Ordered by key, then by run index so equal keys come out in input order.
/// Reversed so the std max-heap pops the smallest entry.
struct MergeEntry {
    key: KeyTuple,
    run_idx: usize,
    row: Row,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.run_idx.cmp(&self.run_idx))
    }
}

/// Streaming k-way merge over spilled runs plus the in-memory remainder.
///
/// Holds one row per run. Dropping it closes the readers and then deletes
/// the spilled segments.
struct KWayMerge {
    keys: Vec<String>,
    sources: Vec<MergeSource>,
    heap: BinaryHeap<MergeEntry>,
    primed: bool,
}

impl KWayMerge {
    fn new(
        keys: Vec<String>,
        runs: Vec<SpilledRun>,
        chunk: Vec<Keyed>,
        guard: Option<WatchdogGuard>,
    ) -> Self {
        let mut sources: Vec<MergeSource> = runs.into_iter().map(MergeSource::Spilled).collect();
        // The in-memory remainder holds the latest input rows, so it goes last.
        if let Some(guard) = guard {
            if !chunk.is_empty() {
                sources.push(MergeSource::Memory {
                    rows: chunk.into_iter(),
                    guard,
                });
            }
        }
        Self {
            keys,
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            primed: false,
        }
    }

    fn refill(&mut self, run_idx: usize) -> Result<(), OpError> {
        if let Some(next) = self.sources[run_idx].next_keyed(&self.keys) {
            let (key, row) = next?;
            self.heap.push(MergeEntry { key, run_idx, row });
        }
        Ok(())
    }
}

impl Iterator for KWayMerge {
    type Item = Result<Row, OpError>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.primed {
            self.primed = true;
            for run_idx in 0..self.sources.len() {
                if let Err(e) = self.refill(run_idx) {
                    return Some(Err(e));
                }
            }
        }
        let entry = self.heap.pop()?;
        if let Err(e) = self.refill(entry.run_idx) {
            return Some(Err(e));
        }
        Some(Ok(entry.row))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use compgraph_core::{row, Value};
    use compgraph_io::MemoryStorage;
    use compgraph_mem::{Codec, Storage};

    use super::*;

    /// Counts segment readers alive at the same time.
    #[derive(Clone, Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        open: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    struct CountedReader {
        inner: Box<dyn Read + Send>,
        open: Arc<AtomicUsize>,
    }

    impl Read for CountedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Drop for CountedReader {
        fn drop(&mut self) {
            self.open.fetch_sub(1, AtomicOrdering::SeqCst);
        }
    }

    impl Storage for CountingStorage {
        fn write(&self, path: &str, bytes: &[u8]) -> compgraph_mem::error::Result<()> {
            self.inner.write(path, bytes)
        }

        fn open(&self, path: &str) -> compgraph_mem::error::Result<Box<dyn Read + Send>> {
            let inner = self.inner.open(path)?;
            let now = self.open.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            self.peak.fetch_max(now, AtomicOrdering::SeqCst);
            Ok(Box::new(CountedReader {
                inner,
                open: Arc::clone(&self.open),
            }))
        }

        fn delete(&self, path: &str) -> compgraph_mem::error::Result<()> {
            self.inner.delete(path)
        }
    }

    fn stream(rows: Vec<Row>) -> RowStream {
        Box::new(rows.into_iter().map(Ok::<Row, OpError>))
    }

    fn input(n: i64) -> Vec<Row> {
        // Keys repeat so stability is observable through "seq".
        (0..n).map(|i| row! {"k" => (i * 7919) % 13, "seq" => i}).collect()
    }

    fn spill_mgr(storage: &MemoryStorage) -> Arc<SpillManager> {
        Arc::new(SpillManager::new(Box::new(storage.clone()), Codec::None, "mem://spill"))
    }

    fn expected(rows: Vec<Row>) -> Vec<Row> {
        let mut rows = rows;
        rows.sort_by(|a, b| {
            a.get("k")
                .unwrap()
                .total_cmp(b.get("k").unwrap())
        });
        rows
    }

    #[test]
    fn test_in_memory_sort_is_stable() {
        let wd = MemoryWatchdog::new(usize::MAX);
        let out: Vec<Row> = ExternalSort::new(vec!["k".into()], wd.clone())
            .sort(stream(input(200)))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(out, expected(input(200)));
        assert_eq!(wd.used_bytes(), 0);
    }

    #[test]
    fn test_spilled_sort_matches_in_memory() {
        let storage = MemoryStorage::new();
        let wd = MemoryWatchdog::new(4 * 1024);
        let mut sorted = ExternalSort::new(vec!["k".into()], wd.clone())
            .with_spill(spill_mgr(&storage))
            .sort(stream(input(500)));

        let first = sorted.next().unwrap().unwrap();
        assert!(!storage.is_empty(), "expected spilled runs");
        let mut out = vec![first];
        out.extend(sorted.by_ref().map(|r| r.unwrap()));
        assert_eq!(out, expected(input(500)));

        drop(sorted);
        assert!(storage.is_empty(), "segments must be deleted");
        assert_eq!(wd.used_bytes(), 0);
    }

    #[test]
    fn test_row_ceiling_forces_runs() {
        let storage = MemoryStorage::new();
        let sorted: Vec<Row> = ExternalSort::new(vec!["k".into()], MemoryWatchdog::new(usize::MAX))
            .with_spill(spill_mgr(&storage))
            .with_max_rows_per_run(Some(10))
            .sort(stream(input(95)))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(sorted, expected(input(95)));
    }

    #[test]
    fn test_abandoned_stream_releases_spill() {
        let storage = MemoryStorage::new();
        let mut sorted = ExternalSort::new(vec!["k".into()], MemoryWatchdog::new(usize::MAX))
            .with_spill(spill_mgr(&storage))
            .with_max_rows_per_run(Some(5))
            .sort(stream(input(50)));
        assert!(sorted.next().is_some());
        assert!(storage.len() >= 9);
        drop(sorted);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_multi_key_and_mixed_numbers() {
        let rows = vec![
            row! {"a" => 2, "b" => "x"},
            row! {"a" => 1.5, "b" => "z"},
            row! {"a" => 1, "b" => "y"},
            row! {"a" => 2.0, "b" => "a"},
        ];
        let out: Vec<Row> = ExternalSort::new(vec!["a".into(), "b".into()], MemoryWatchdog::new(1 << 20))
            .sort(stream(rows))
            .collect::<Result<_, _>>()
            .unwrap();
        let bs: Vec<&Value> = out.iter().map(|r| r.get("b").unwrap()).collect();
        assert_eq!(bs, vec![&Value::from("y"), &Value::from("z"), &Value::from("a"), &Value::from("x")]);
    }

    #[test]
    fn test_missing_sort_key() {
        let mut s = ExternalSort::new(vec!["k".into()], MemoryWatchdog::new(1 << 20))
            .sort(stream(vec![row! {"k" => 1}, row! {"j" => 2}]));
        assert!(matches!(s.next(), Some(Err(OpError::Row(_)))));
        assert!(s.next().is_none());
    }

    #[test]
    fn test_sorted_input_is_unchanged() {
        let rows = expected(input(120));
        let storage = MemoryStorage::new();
        let out: Vec<Row> = ExternalSort::new(vec!["k".into()], MemoryWatchdog::new(2048))
            .with_spill(spill_mgr(&storage))
            .sort(stream(rows.clone()))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(out, rows);
    }

    #[test]
    fn test_yielded_rows_release_their_bytes() {
        let wd = MemoryWatchdog::new(1 << 20);
        let mut sorted = ExternalSort::new(vec!["k".into()], wd.clone()).sort(stream(input(100)));

        sorted.next().unwrap().unwrap();
        let charged = wd.used_bytes();
        assert!(charged > 0);
        sorted.next().unwrap().unwrap();
        assert!(wd.used_bytes() < charged);

        assert_eq!(sorted.by_ref().count(), 98);
        assert_eq!(wd.used_bytes(), 0);
    }

    #[test]
    fn test_chained_sorts_share_a_tight_ceiling() {
        let rows = input(400);
        let total: usize = rows.iter().map(Row::estimated_bytes).sum();
        let storage = MemoryStorage::new();
        let spill = spill_mgr(&storage);
        let wd = MemoryWatchdog::new(total + 600);

        let by_k = ExternalSort::new(vec!["k".into()], wd.clone())
            .with_spill(Arc::clone(&spill))
            .sort(stream(rows.clone()));
        let out: Vec<Row> = ExternalSort::new(vec!["seq".into()], wd.clone())
            .with_spill(Arc::clone(&spill))
            .sort(Box::new(by_k))
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(out, rows);
        // the second sort fits in what the first gives back
        assert_eq!(spill.bytes_written(), 0);
        assert!(storage.is_empty());
        assert!(wd.peak_bytes() <= total + 600);
        assert_eq!(wd.used_bytes(), 0);
    }

    #[test]
    fn test_wide_merge_caps_open_readers() {
        let storage = CountingStorage::default();
        let spill = Arc::new(SpillManager::new(Box::new(storage.clone()), Codec::None, "mem://spill"));
        // 200 runs of 5 rows: one intermediate pass down to 4 runs
        let mut sorted = ExternalSort::new(vec!["k".into()], MemoryWatchdog::new(usize::MAX))
            .with_spill(spill)
            .with_max_rows_per_run(Some(5))
            .sort(stream(input(1_000)));

        let mut out = Vec::new();
        for row in sorted.by_ref() {
            out.push(row.unwrap());
        }
        assert_eq!(out, expected(input(1_000)));
        assert!(storage.peak.load(AtomicOrdering::SeqCst) <= MAX_MERGE_FAN_IN);
        assert_eq!(storage.open.load(AtomicOrdering::SeqCst), 0);

        drop(sorted);
        assert!(storage.inner.is_empty());
    }

    #[test]
    fn test_infinite_values_sort_the_same_after_spilling() {
        let rows: Vec<Row> = (0..10)
            .map(|i| {
                let x = match i % 3 {
                    0 => f64::INFINITY,
                    1 => f64::NEG_INFINITY,
                    _ => i as f64,
                };
                row! {"x" => x, "seq" => i}
            })
            .collect();
        let keys = vec!["x".to_string()];

        let in_memory: Vec<Row> = ExternalSort::new(keys.clone(), MemoryWatchdog::new(usize::MAX))
            .sort(stream(rows.clone()))
            .collect::<Result<_, _>>()
            .unwrap();
        let storage = MemoryStorage::new();
        let spilled: Vec<Row> = ExternalSort::new(keys, MemoryWatchdog::new(usize::MAX))
            .with_spill(spill_mgr(&storage))
            .with_max_rows_per_run(Some(3))
            .sort(stream(rows))
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(in_memory, spilled);
        assert_eq!(spilled[0].get_f64("x").unwrap(), f64::NEG_INFINITY);
        assert_eq!(spilled[9].get_f64("x").unwrap(), f64::INFINITY);
    }
}
