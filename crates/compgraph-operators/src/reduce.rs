//! Reduce operator: one reducer call per adjacent key group.

use std::sync::Arc;

use compgraph_core::types::Row;

use crate::group::Grouper;
use crate::traits::{OpError, Reducer, RowStream};

/// Lazily reduces a key-sorted stream group by group.
///
/// Every row a reducer returns gets the group's key fields written onto it
/// last, overwriting any same-named field the reducer produced.
pub struct ReduceStream {
    grouper: Grouper,
    keys: Vec<String>,
    reducer: Arc<dyn Reducer>,
    pending: std::vec::IntoIter<Row>,
    done: bool,
}

impl ReduceStream {
    pub fn new(input: RowStream, reducer: Arc<dyn Reducer>, keys: Vec<String>) -> Self {
        Self {
            grouper: Grouper::new(input, keys.clone()),
            keys,
            reducer,
            pending: Vec::new().into_iter(),
            done: false,
        }
    }

    pub fn with_verify_sorted(mut self, on: bool) -> Self {
        self.grouper = self.grouper.with_verify_sorted(on);
        self
    }

    /// Reduce the next group into `pending`. `false` at end of input.
    fn step(&mut self) -> Result<bool, OpError> {
        let Some(mut group) = self.grouper.next_group()? else {
            return Ok(false);
        };
        let key = group.key().clone();
        let mut rows = self.reducer.reduce(&self.keys, &mut group)?;
        group.drain()?;
        for row in &mut rows {
            for (field, value) in self.keys.iter().zip(key.values()) {
                row.insert(field.clone(), value.clone());
            }
        }
        self.pending = rows.into_iter();
        Ok(true)
    }
}

impl Iterator for ReduceStream {
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
                        reducer = self.reducer.name(),
                        groups = self.grouper.groups(),
                        "reduce finished"
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

#[cfg(test)]
mod tests {
    use compgraph_core::{row, Value};

    use super::*;
    use crate::reducers::{Count, FirstReducer, FnReducer};

    fn stream(rows: Vec<Row>) -> RowStream {
        Box::new(rows.into_iter().map(Ok::<Row, OpError>))
    }

    fn keys(k: &[&str]) -> Vec<String> {
        k.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_one_call_per_group() {
        let rows = vec![
            row! {"w" => "a"},
            row! {"w" => "a"},
            row! {"w" => "b"},
            row! {"w" => "c"},
            row! {"w" => "c"},
            row! {"w" => "c"},
        ];
        let out: Vec<Row> = ReduceStream::new(stream(rows), Arc::new(Count::new("n")), keys(&["w"]))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            out,
            vec![
                row! {"n" => 2, "w" => "a"},
                row! {"n" => 1, "w" => "b"},
                row! {"n" => 3, "w" => "c"},
            ]
        );
    }

    #[test]
    fn test_key_fields_overwrite_reducer_output() {
        let clobber = FnReducer::new(|_keys, group| {
            let n = group.count();
            Ok(vec![row! {"k" => "bogus", "n" => n}])
        });
        let rows = vec![row! {"k" => 1}, row! {"k" => 1}];
        let out: Vec<Row> = ReduceStream::new(stream(rows), Arc::new(clobber), keys(&["k"]))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("k").unwrap(), &Value::Int(1));
        assert_eq!(out[0].get("n").unwrap(), &Value::Int(2));
    }

    #[test]
    fn test_early_stopping_reducer_sees_each_group_once() {
        let rows = vec![
            row! {"k" => 1, "v" => "x"},
            row! {"k" => 1, "v" => "y"},
            row! {"k" => 2, "v" => "z"},
        ];
        let out: Vec<Row> =
            ReduceStream::new(stream(rows), Arc::new(FirstReducer), keys(&["k"]))
                .collect::<Result<_, _>>()
                .unwrap();
        assert_eq!(out, vec![row! {"k" => 1, "v" => "x"}, row! {"k" => 2, "v" => "z"}]);
    }

    #[test]
    fn test_empty_input() {
        let mut s = ReduceStream::new(stream(vec![]), Arc::new(Count::new("n")), keys(&["k"]));
        assert!(s.next().is_none());
    }

    #[test]
    fn test_verify_sorted_surfaces_error() {
        let rows = vec![row! {"k" => 2}, row! {"k" => 1}];
        let result: Result<Vec<Row>, _> =
            ReduceStream::new(stream(rows), Arc::new(Count::new("n")), keys(&["k"]))
                .with_verify_sorted(true)
                .collect();
        assert!(matches!(result, Err(OpError::UnsortedInput { .. })));
    }
}
