//! Sorting with bounded memory.
//!
//! `run` cuts the input into sorted chunks, spilling each one the watchdog
//! refuses to keep; `external` merges the chunks back into one stream.

mod external;
mod run;

pub use external::{ExternalSort, SortStream, MAX_MERGE_FAN_IN};
