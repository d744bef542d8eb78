//! Map operator and the field-level mappers.
//!
//! `MapStream` applies a [`Mapper`] to every upstream row in order and
//! flattens the fan-out. Numeric and geo/time mappers live in `stats` and
//! `geo`.

use std::sync::{Arc, LazyLock};

use compgraph_core::types::{Row, Value};
use regex::Regex;

use crate::traits::{Mapper, OpError, RowStream};

/// Lazily applies a mapper to an upstream stream.
pub struct MapStream {
    input: RowStream,
    mapper: Arc<dyn Mapper>,
    pending: std::vec::IntoIter<Row>,
    done: bool,
}

impl MapStream {
    pub fn new(input: RowStream, mapper: Arc<dyn Mapper>) -> Self {
        Self {
            input,
            mapper,
            pending: Vec::new().into_iter(),
            done: false,
        }
    }
}

impl Iterator for MapStream {
    type Item = Result<Row, OpError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.next() {
                return Some(Ok(row));
            }
            if self.done {
                return None;
            }
            let result = match self.input.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Ok(row)) => self.mapper.apply(row),
                Some(Err(e)) => Err(e),
            };
            match result {
                Ok(rows) => self.pending = rows.into_iter(),
                Err(e) => {
                    self.done = true;
                    tracing::debug!(mapper = self.mapper.name(), error = %e, "map aborted");
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Yields exactly the row passed.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl Mapper for Identity {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn apply(&self, row: Row) -> Result<Vec<Row>, OpError> {
        Ok(vec![row])
    }
}

/// Sets a field to a constant value.
#[derive(Debug, Clone)]
pub struct AddField {
    field: String,
    value: Value,
}

impl AddField {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

impl Mapper for AddField {
    fn name(&self) -> &'static str {
        "add_field"
    }

    fn apply(&self, mut row: Row) -> Result<Vec<Row>, OpError> {
        row.insert(self.field.clone(), self.value.clone());
        Ok(vec![row])
    }
}

/// Drops a field; fails if the row does not have it.
#[derive(Debug, Clone)]
pub struct RemoveField {
    field: String,
}

impl RemoveField {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Mapper for RemoveField {
    fn name(&self) -> &'static str {
        "remove_field"
    }

    fn apply(&self, mut row: Row) -> Result<Vec<Row>, OpError> {
        row.remove(&self.field)?;
        Ok(vec![row])
    }
}

/// Keeps only the named fields, in the given order.
#[derive(Debug, Clone)]
pub struct Project {
    fields: Vec<String>,
}

impl Project {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl Mapper for Project {
    fn name(&self) -> &'static str {
        "project"
    }

    fn apply(&self, mut row: Row) -> Result<Vec<Row>, OpError> {
        let mut out = Row::with_capacity(self.fields.len());
        for field in &self.fields {
            out.insert(field.clone(), row.remove(field)?);
        }
        Ok(vec![out])
    }
}

/// Strips punctuation and underscores from a string field.
#[derive(Debug, Clone)]
pub struct FilterPunctuation {
    field: String,
}

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^\w\s]|_)+").expect("punctuation pattern"));

impl FilterPunctuation {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Mapper for FilterPunctuation {
    fn name(&self) -> &'static str {
        "filter_punctuation"
    }

    fn apply(&self, mut row: Row) -> Result<Vec<Row>, OpError> {
        let cleaned = PUNCTUATION.replace_all(row.get_str(&self.field)?, "");
        let cleaned = cleaned.into_owned();
        row.insert(self.field.clone(), cleaned);
        Ok(vec![row])
    }
}

/// Case-folds a string field.
#[derive(Debug, Clone)]
pub struct LowerCase {
    field: String,
}

impl LowerCase {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Mapper for LowerCase {
    fn name(&self) -> &'static str {
        "lower_case"
    }

    fn apply(&self, mut row: Row) -> Result<Vec<Row>, OpError> {
        let lowered = row.get_str(&self.field)?.to_lowercase();
        row.insert(self.field.clone(), lowered);
        Ok(vec![row])
    }
}

/// Splits a string field into one row per piece.
///
/// Without a separator the field is split on runs of Unicode whitespace and
/// empty pieces are dropped; with one, every piece is kept.
#[derive(Debug, Clone)]
pub struct Split {
    field: String,
    separator: Option<String>,
}

impl Split {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            separator: None,
        }
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }
}

impl Mapper for Split {
    fn name(&self) -> &'static str {
        "split"
    }

    fn apply(&self, row: Row) -> Result<Vec<Row>, OpError> {
        let text = row.get_str(&self.field)?;
        let pieces: Vec<String> = match &self.separator {
            None => text.split_whitespace().map(str::to_owned).collect(),
            Some(sep) => text.split(sep.as_str()).map(str::to_owned).collect(),
        };
        Ok(pieces
            .into_iter()
            .map(|piece| {
                let mut out = row.clone();
                out.insert(self.field.clone(), piece);
                out
            })
            .collect())
    }
}

type MapFn = dyn Fn(Row) -> Result<Vec<Row>, OpError> + Send + Sync;

/// Adapts a closure into a mapper.
pub struct FnMapper {
    name: &'static str,
    f: Box<MapFn>,
}

impl FnMapper {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Row) -> Result<Vec<Row>, OpError> + Send + Sync + 'static,
    {
        Self {
            name: "fn_mapper",
            f: Box::new(f),
        }
    }

    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

impl Mapper for FnMapper {
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&self, row: Row) -> Result<Vec<Row>, OpError> {
        (self.f)(row)
    }
}
