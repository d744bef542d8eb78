//! Convenient re-exports for downstream crates.

pub use crate::budget::{BudgetGuard, MemoryBudget};
pub use crate::config::{EngineConfig, ShareMode};
pub use crate::error::{Error, Result};
pub use crate::id::{NodeId, SpillId};
pub use crate::row;
pub use crate::types::{KeyTuple, Row, Value};
