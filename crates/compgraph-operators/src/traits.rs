//! Operator traits and the shared stream/error types.
//!
//! Mappers and reducers are user-supplied row functions; the stream adapters
//! in this crate (`MapStream`, `ReduceStream`, `MergeJoin`, `ExternalSort`)
//! drive them.

use compgraph_core::types::Row;

use thiserror::Error;

/// A one-shot, lazily produced sequence of rows.
pub type RowStream = Box<dyn Iterator<Item = Result<Row, OpError>>>;

#[derive(Debug, Error)]
pub enum OpError {
    #[error(transparent)]
    Row(#[from] compgraph_core::Error),

    #[error("spill error: {0}")]
    Spill(#[from] compgraph_mem::error::Error),

    #[error("source error: {0}")]
    Io(#[from] compgraph_io::Error),

    #[error("input not sorted by {keys:?}: key {next} follows {prev}")]
    UnsortedInput {
        keys: Vec<String>,
        prev: String,
        next: String,
    },

    #[error("execution error: {0}")]
    Exec(String),
}

/// Per-row transform with fan-out: one input row yields zero or more rows.
///
/// Filtering is a mapper that returns an empty vector.
pub trait Mapper: Send + Sync + 'static {
    /// Human-readable name used in traces.
    fn name(&self) -> &'static str {
        "mapper"
    }

    fn apply(&self, row: Row) -> Result<Vec<Row>, OpError>;
}

/// Per-group aggregation.
///
/// `group` yields the rows of one key group in input order. A reducer may
/// stop pulling early; the caller drains whatever is left. Grouping key
/// fields are written onto every returned row afterwards, so reducers need
/// not re-emit them.
pub trait Reducer: Send + Sync + 'static {
    fn name(&self) -> &'static str {
        "reducer"
    }

    fn reduce(
        &self,
        keys: &[String],
        group: &mut dyn Iterator<Item = Result<Row, OpError>>,
    ) -> Result<Vec<Row>, OpError>;
}
