#![forbid(unsafe_code)]
//! compgraph-io: storage backends for spill segments, line-oriented file
//! sources, and NDJSON writers.

pub mod error;
pub mod memory_storage;
pub mod readers;
pub mod storage;
pub mod writers;

pub use error::{Error, Result};
pub use memory_storage::MemoryStorage;
pub use readers::lines::{LineParser, LineReader};
pub use storage::FsStorage;
pub use writers::jsonl::JsonlWriter;
