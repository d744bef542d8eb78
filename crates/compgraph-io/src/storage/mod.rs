//! Storage adapters implementing `compgraph_mem::spill::Storage`.
//!
//! - `fs`: local filesystem (used by the engine).
//! - `MemoryStorage` (crate root): in-process map, for tests.

mod fs;
pub use fs::FsStorage;

use compgraph_mem::{Codec, SpillManager};

use crate::error::Result;

/// Build a spill manager over the local filesystem rooted at `spill_dir`.
pub fn fs_spill_manager(spill_dir: &str, codec_name: &str) -> Result<SpillManager> {
    let codec = Codec::from_name(codec_name)?;
    Ok(SpillManager::new(Box::new(FsStorage::new()), codec, spill_dir))
}
