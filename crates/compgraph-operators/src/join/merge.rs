//! Merge join over two key-sorted streams.
//!
//! Precondition: both inputs are sorted ascending on the join keys. At most
//! one key group per side is held in memory.

use std::cmp::Ordering;

use compgraph_core::types::{KeyTuple, Row};

use super::Joiner;
use crate::group::Grouper;
use crate::traits::{OpError, RowStream};

pub struct MergeJoin {
    joiner: Joiner,
    keys: Vec<String>,
    left: Grouper,
    right: Grouper,
    left_group: Option<(KeyTuple, Vec<Row>)>,
    right_group: Option<(KeyTuple, Vec<Row>)>,
    pending: std::vec::IntoIter<Row>,
    done: bool,
    pairs: u64,
}

impl MergeJoin {
    pub fn new(joiner: Joiner, keys: Vec<String>, left: RowStream, right: RowStream) -> Self {
        Self {
            joiner,
            left: Grouper::new(left, keys.clone()),
            right: Grouper::new(right, keys.clone()),
            keys,
            left_group: None,
            right_group: None,
            pending: Vec::new().into_iter(),
            done: false,
            pairs: 0,
        }
    }

    pub fn with_verify_sorted(mut self, on: bool) -> Self {
        self.left = self.left.with_verify_sorted(on);
        self.right = self.right.with_verify_sorted(on);
        self
    }

    /// Join the next pair of groups into `pending`. `false` once both sides
    /// are exhausted.
    fn step(&mut self) -> Result<bool, OpError> {
        if self.left_group.is_none() {
            self.left_group = self.left.next_group_vec()?;
        }
        if self.right_group.is_none() {
            self.right_group = self.right.next_group_vec()?;
        }

        let order = match (&self.left_group, &self.right_group) {
            (None, None) => return Ok(false),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((lk, _)), Some((rk, _))) => lk.cmp(rk),
        };

        let (left_rows, right_rows) = match order {
            Ordering::Less => (self.take_left(), Vec::new()),
            Ordering::Greater => (Vec::new(), self.take_right()),
            Ordering::Equal => (self.take_left(), self.take_right()),
        };

        let mut out = Vec::new();
        self.joiner
            .join_groups(&self.keys, left_rows, right_rows, &mut out);
        self.pairs += 1;
        self.pending = out.into_iter();
        Ok(true)
    }

    fn take_left(&mut self) -> Vec<Row> {
        self.left_group.take().map(|(_, rows)| rows).unwrap_or_default()
    }

    fn take_right(&mut self) -> Vec<Row> {
        self.right_group.take().map(|(_, rows)| rows).unwrap_or_default()
    }
}

impl Iterator for MergeJoin {
    type Item = Result<Row, OpError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.next() {
                return Some(Ok(row));
            }
            if self.done {
                return None;
            }
            match self.step() {
                Ok(true) => continue,
                Ok(false) => {
                    self.done = true;
                    tracing::trace!(
                        join = %self.joiner.kind(),
                        group_pairs = self.pairs,
                        left_groups = self.left.groups(),
                        right_groups = self.right.groups(),
                        "join finished"
                    );
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
