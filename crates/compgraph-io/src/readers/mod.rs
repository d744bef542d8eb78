//! Line-oriented file sources.
//!
//! A file source is line-delimited; each line goes through a caller-supplied
//! parser. `jsonl` provides the stock JSON-object-per-line parser.

pub mod jsonl;
pub mod lines;
