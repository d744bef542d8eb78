//! Filter expressed as a mapper that yields zero rows for rejected input.

use compgraph_core::types::Row;

use crate::traits::{Mapper, OpError};

type Predicate = dyn Fn(&Row) -> Result<bool, OpError> + Send + Sync;

/// Keeps rows for which the predicate holds.
pub struct Filter {
    predicate: Box<Predicate>,
}

impl Filter {
    /// Filter with an infallible predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Row) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Box::new(move |row| Ok(predicate(row))),
        }
    }

    /// Filter with a predicate that may fail (e.g. on a missing field).
    pub fn try_new<F>(predicate: F) -> Self
    where
        F: Fn(&Row) -> Result<bool, OpError> + Send + Sync + 'static,
    {
        Self {
            predicate: Box::new(predicate),
        }
    }
}

impl Mapper for Filter {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn apply(&self, row: Row) -> Result<Vec<Row>, OpError> {
        if (self.predicate)(&row)? {
            Ok(vec![row])
        } else {
            Ok(Vec::new())
        }
    }
}
