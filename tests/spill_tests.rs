//! Sorting under a tight memory ceiling with on-disk spill segments.

mod test_data_gen;

use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use compgraph::io::MemoryStorage;
use compgraph::mem::error::{Error as SpillError, Result as SpillResult};
use compgraph::mem::Storage;
use compgraph::prelude::*;
use test_data_gen::{generate_rows, keys_ascending, run_graph};

fn fs_engine(dir: &Path, cfg: EngineConfig) -> Engine {
    Engine::new(cfg.with_spill_dir(dir.to_string_lossy())).unwrap()
}

fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[test]
fn test_low_ceiling_spills_to_disk_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let engine = fs_engine(dir.path(), EngineConfig::default().with_mem_cap_bytes(16 * 1024));
    let bindings = Bindings::new().bind_rows("src", generate_rows(3_000, 100, 3));
    let graph = Graph::graph_from_iter("src").sort(["key", "seq"]);

    let out = run_graph(&engine, &graph, &bindings);
    assert_eq!(out.len(), 3_000);
    assert!(keys_ascending(&out, "key"));
    assert!(engine.spill_manager().bytes_written() > 0);
    assert!(engine.peak_bytes() <= 16 * 1024);
    assert_eq!(files_in(dir.path()), 0);
    assert_eq!(engine.watchdog().used_bytes(), 0);
}

#[test]
fn test_chained_sorts_under_a_ceiling_just_above_the_data() {
    let dir = tempfile::tempdir().unwrap();
    let input = generate_rows(4_000, 97, 5);
    let bytes: usize = input.iter().map(Row::estimated_bytes).sum();
    let engine = fs_engine(dir.path(), EngineConfig::default().with_mem_cap_bytes(bytes + 600));
    let bindings = Bindings::new().bind_rows("src", input.clone());

    let graph = Graph::graph_from_iter("src").sort(["key"]).sort(["seq"]);
    let out = run_graph(&engine, &graph, &bindings);

    assert_eq!(out, input);
    assert_eq!(engine.spill_manager().bytes_written(), 0);
    assert_eq!(files_in(dir.path()), 0);
    assert_eq!(engine.watchdog().used_bytes(), 0);
}

#[test]
fn test_many_runs_merge_in_passes() {
    let dir = tempfile::tempdir().unwrap();
    // 5,000 rows at 20 per run is far more runs than one merge reads at once
    let engine = fs_engine(dir.path(), EngineConfig::default().with_max_rows_per_run(20));
    let input = generate_rows(5_000, 40, 21);
    let bindings = Bindings::new().bind_rows("src", input.clone());
    let graph = Graph::graph_from_iter("src").sort(["key"]);

    let out = run_graph(&engine, &graph, &bindings);
    let mut expected = input;
    expected.sort_by(|a, b| a.get("key").unwrap().total_cmp(b.get("key").unwrap()));
    assert_eq!(out, expected);
    assert_eq!(files_in(dir.path()), 0);
}

/// Spill storage that fails writes after a quota, or every open.
#[derive(Clone, Default)]
struct FailingStorage {
    inner: MemoryStorage,
    writes_allowed: Arc<AtomicUsize>,
    fail_open: bool,
}

impl Storage for FailingStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> SpillResult<()> {
        let allowed = self
            .writes_allowed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if allowed.is_err() {
            return Err(SpillError::Storage(format!("no space left for {path}")));
        }
        self.inner.write(path, bytes)
    }

    fn open(&self, path: &str) -> SpillResult<Box<dyn Read + Send>> {
        if self.fail_open {
            return Err(SpillError::Storage(format!("cannot open {path}")));
        }
        self.inner.open(path)
    }

    fn delete(&self, path: &str) -> SpillResult<()> {
        self.inner.delete(path)
    }
}

fn run_with_storage(storage: &FailingStorage) -> Result<Vec<Row>, OpError> {
    let engine = Engine::with_storage(
        EngineConfig::default().with_max_rows_per_run(100),
        Box::new(storage.clone()),
    )
    .unwrap();
    let bindings = Bindings::new().bind_rows("src", generate_rows(1_000, 30, 13));
    let graph = Graph::graph_from_iter("src").sort(["key"]);
    engine.run(&graph, &bindings).unwrap().collect()
}

#[test]
fn test_failed_spill_write_ends_the_run_and_cleans_up() {
    let storage = FailingStorage {
        writes_allowed: Arc::new(AtomicUsize::new(3)),
        ..Default::default()
    };
    let result = run_with_storage(&storage);
    assert!(matches!(result, Err(OpError::Spill(SpillError::Storage(_)))));
    assert!(storage.inner.is_empty(), "runs written before the failure must be deleted");
}

#[test]
fn test_failed_spill_open_ends_the_run_and_cleans_up() {
    let storage = FailingStorage {
        writes_allowed: Arc::new(AtomicUsize::new(usize::MAX)),
        fail_open: true,
        ..Default::default()
    };
    let result = run_with_storage(&storage);
    assert!(matches!(result, Err(OpError::Spill(SpillError::Storage(_)))));
    assert!(storage.inner.is_empty());
}

#[test]
fn test_abandoned_stream_releases_segments() {
    let dir = tempfile::tempdir().unwrap();
    let engine = fs_engine(dir.path(), EngineConfig::default().with_max_rows_per_run(100));
    let bindings = Bindings::new().bind_rows("src", generate_rows(1_000, 30, 11));
    let graph = Graph::graph_from_iter("src").sort(["key"]);

    let mut stream = engine.run(&graph, &bindings).unwrap();
    let first = stream.next().unwrap().unwrap();
    assert_eq!(first.get_f64("key").unwrap(), 0.0);
    assert!(files_in(dir.path()) > 0);

    drop(stream);
    assert_eq!(files_in(dir.path()), 0);
}

#[test]
fn test_word_count_through_spilling_sorts() {
    let dir = tempfile::tempdir().unwrap();
    let text: Vec<Row> = (0..200)
        .map(|i| row! { "text" => format!("w{} w{} common", i % 13, i % 5) })
        .collect();
    let bindings = Bindings::new().bind_rows("docs", text);
    let graph = compgraph::pipelines::word_count("docs", &Default::default());

    let tight = fs_engine(dir.path(), EngineConfig::default().with_max_rows_per_run(32));
    let roomy = Engine::with_storage(
        EngineConfig::default(),
        Box::new(compgraph::io::MemoryStorage::new()),
    )
    .unwrap();

    let spilled = run_graph(&tight, &graph, &bindings);
    let in_memory = run_graph(&roomy, &graph, &bindings);
    assert_eq!(spilled, in_memory);
    assert_eq!(spilled.last().unwrap(), &row! { "text" => "common", "count" => 200 });
}

#[test]
fn test_unknown_codec_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = EngineConfig::default().with_spill_dir(dir.path().to_string_lossy());
    cfg.spill_codec = "snappy".into();
    assert!(matches!(Engine::new(cfg), Err(ExecError::Config(_))));
}

#[test]
fn test_unbound_source_reported_by_name() {
    let graph = compgraph::pipelines::mean_speed("times", "lengths", &Default::default());
    let bindings = Bindings::new().bind_rows("times", Vec::new());
    let engine = Engine::with_storage(
        EngineConfig::default(),
        Box::new(compgraph::io::MemoryStorage::new()),
    )
    .unwrap();
    match engine.run(&graph, &bindings) {
        Err(ExecError::UnboundSource(name)) => assert_eq!(name, "lengths"),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("run should fail without a 'lengths' binding"),
    }
}
