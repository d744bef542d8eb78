//! JSON-object-per-line parsing.

use std::path::Path;
use std::sync::Arc;

use compgraph_core::types::Row;

use super::lines::{LineParser, LineReader};
use crate::error::Result;

/// Parse one line holding a flat JSON object into a row.
pub fn parse_json_row(line: &str) -> compgraph_core::Result<Row> {
    Ok(serde_json::from_str::<Row>(line)?)
}

/// `parse_json_row` as a shareable parser.
pub fn parser() -> LineParser {
    Arc::new(parse_json_row)
}

/// Open an NDJSON file as a row source.
pub fn open(path: impl AsRef<Path>) -> Result<LineReader> {
    LineReader::open(path, parser())
}
