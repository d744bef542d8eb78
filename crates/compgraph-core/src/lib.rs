#![forbid(unsafe_code)]
//! compgraph-core: row/value types, key tuples, engine configuration, errors,
//! and the memory budget traits shared by every other crate.
//!
//! No IO and no operators live here.

pub mod budget;
pub mod config;
pub mod error;
pub mod id;
pub mod prelude;
pub mod types;

pub use error::{Error, Result};
pub use types::{KeyTuple, Row, Value};
