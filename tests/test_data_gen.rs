//! Shared helpers for integration tests.
#![allow(dead_code)]

use compgraph::prelude::*;
use compgraph::io::MemoryStorage;

/// Deterministic pseudo-random rows `{key, seq}` with `distinct` key values.
pub fn generate_rows(count: usize, distinct: i64, seed: u64) -> Vec<Row> {
    let mut state = seed;
    (0..count)
        .map(|seq| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let key = ((state >> 33) as i64) % distinct;
            row! { "key" => key, "seq" => seq, "label" => format!("row-{}", key % 7) }
        })
        .collect()
}

/// Engine spilling into an in-process store the test can inspect.
pub fn memory_engine(cfg: EngineConfig) -> (Engine, MemoryStorage) {
    let storage = MemoryStorage::new();
    let engine = Engine::with_storage(cfg, Box::new(storage.clone())).unwrap();
    (engine, storage)
}

pub fn run_graph(engine: &Engine, graph: &Graph, bindings: &Bindings) -> Vec<Row> {
    engine
        .run(graph, bindings)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

/// Multiset equality; field order inside a row does not matter.
pub fn assert_same_rows(actual: &[Row], expected: &[Row]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "row count differs: {actual:?} vs {expected:?}"
    );
    let mut remaining: Vec<&Row> = expected.iter().collect();
    for row in actual {
        match remaining.iter().position(|e| *e == row) {
            Some(i) => {
                remaining.swap_remove(i);
            }
            None => panic!("unexpected row {row:?}; expected {expected:?}"),
        }
    }
}

pub fn keys_ascending(rows: &[Row], field: &str) -> bool {
    rows.windows(2)
        .all(|w| w[0].get(field).unwrap().total_cmp(w[1].get(field).unwrap()).is_le())
}
