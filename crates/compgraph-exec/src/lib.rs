#![forbid(unsafe_code)]
//! compgraph-exec: the graph builder and the runtime that turns a graph into
//! a lazily pulled row stream.
//!
//! - `graph`: cheap, immutable node descriptors (`Graph`) built top-down.
//! - `runtime`: `Engine` (watchdog + spill manager + config) and `Bindings`.
//! - `metrics`: tracing helpers for run start/finish.

pub mod graph;
pub mod metrics;
pub mod runtime;

pub use graph::Graph;
pub use runtime::{Bindings, Engine, ExecError};
