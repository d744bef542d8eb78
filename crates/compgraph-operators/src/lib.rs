#![forbid(unsafe_code)]
//! compgraph-operators: lazy row-stream operators.
//!
//! Design intent:
//! - Every operator is a pull-based iterator that owns its upstream.
//! - Errors travel in-band as `Err` items; the first one ends the stream.
//! - Sort is the only operator that buffers more than one group, and it
//!   charges everything it buffers to the memory watchdog.
//! - Reduce and Join never sort their input; they group adjacent rows.

pub mod traits;

pub mod filter;
pub mod geo;
pub mod group;
pub mod map;
pub mod reduce;
pub mod reducers;
pub mod stats;

pub mod join;
pub mod sort;

pub use filter::Filter;
pub use group::Grouper;
pub use join::{JoinType, Joiner, MergeJoin};
pub use map::MapStream;
pub use reduce::ReduceStream;
pub use sort::ExternalSort;
pub use traits::{Mapper, OpError, Reducer, RowStream};
