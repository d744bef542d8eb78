//! Positional grouping of a key-sorted stream.
//!
//! A group is a maximal run of adjacent rows with equal key tuples. Nothing
//! here sorts: on unsorted input the same key simply shows up as several
//! groups, unless `verify_sorted` is on, in which case a key smaller than its
//! predecessor is reported as `OpError::UnsortedInput`.

use compgraph_core::types::{KeyTuple, Row};

use crate::traits::{OpError, RowStream};

pub struct Grouper {
    input: RowStream,
    keys: Vec<String>,
    verify_sorted: bool,
    /// First row of the next group, already pulled from `input`.
    pending: Option<(KeyTuple, Row)>,
    /// Key of a group handed out but not read to its end.
    open: Option<KeyTuple>,
    exhausted: bool,
    groups: u64,
}

impl Grouper {
    pub fn new(input: RowStream, keys: Vec<String>) -> Self {
        Self {
            input,
            keys,
            verify_sorted: false,
            pending: None,
            open: None,
            exhausted: false,
            groups: 0,
        }
    }

    pub fn with_verify_sorted(mut self, on: bool) -> Self {
        self.verify_sorted = on;
        self
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Number of groups started so far.
    pub fn groups(&self) -> u64 {
        self.groups
    }

    fn pull(&mut self) -> Result<Option<(KeyTuple, Row)>, OpError> {
        if self.exhausted {
            return Ok(None);
        }
        match self.input.next() {
            None => {
                self.exhausted = true;
                Ok(None)
            }
            Some(Ok(row)) => {
                let key = row.key(&self.keys)?;
                Ok(Some((key, row)))
            }
            Some(Err(e)) => {
                self.exhausted = true;
                Err(e)
            }
        }
    }

    /// Start the next group, or `None` at end of input.
    ///
    /// The returned [`Group`] borrows the grouper; rows it does not yield
    /// before being dropped are skipped by the following call.
    pub fn next_group(&mut self) -> Result<Option<Group<'_>>, OpError> {
        if let Some(open) = self.open.take() {
            loop {
                match self.pull()? {
                    Some((key, _)) if key == open => continue,
                    next => {
                        self.pending = next;
                        break;
                    }
                }
            }
        }
        let first = match self.pending.take() {
            Some(p) => p,
            None => match self.pull()? {
                Some(p) => p,
                None => return Ok(None),
            },
        };
        self.groups += 1;
        let (key, row) = first;
        self.open = Some(key.clone());
        Ok(Some(Group {
            grouper: self,
            key,
            first: Some(row),
            done: false,
        }))
    }

    /// Pull the next group fully into memory.
    pub fn next_group_vec(&mut self) -> Result<Option<(KeyTuple, Vec<Row>)>, OpError> {
        let Some(mut group) = self.next_group()? else {
            return Ok(None);
        };
        let mut rows = Vec::new();
        for row in group.by_ref() {
            rows.push(row?);
        }
        Ok(Some((group.key, rows)))
    }
}

/// Rows of one key group, in input order.
pub struct Group<'a> {
    grouper: &'a mut Grouper,
    key: KeyTuple,
    first: Option<Row>,
    done: bool,
}

impl Group<'_> {
    pub fn key(&self) -> &KeyTuple {
        &self.key
    }

    /// Consume and discard the rest of the group.
    pub fn drain(&mut self) -> Result<(), OpError> {
        for row in self.by_ref() {
            row?;
        }
        Ok(())
    }
}

impl Iterator for Group<'_> {
    type Item = Result<Row, OpError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(row) = self.first.take() {
            return Some(Ok(row));
        }
        if self.done {
            return None;
        }
        match self.grouper.pull() {
            Ok(Some((key, row))) => {
                if key == self.key {
                    return Some(Ok(row));
                }
                self.done = true;
                self.grouper.open = None;
                if self.grouper.verify_sorted && key < self.key {
                    return Some(Err(OpError::UnsortedInput {
                        keys: self.grouper.keys.clone(),
                        prev: format!("{:?}", self.key.values()),
                        next: format!("{:?}", key.values()),
                    }));
                }
                self.grouper.pending = Some((key, row));
                None
            }
            Ok(None) => {
                self.done = true;
                self.grouper.open = None;
                None
            }
            Err(e) => {
                self.done = true;
                self.grouper.open = None;
                Some(Err(e))
            }
        }
    }
}
