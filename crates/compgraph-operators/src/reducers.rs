//! Concrete reducers.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};

use compgraph_core::types::{KeyTuple, Row, Value};
use compgraph_core::Error;

use crate::traits::{OpError, Reducer};

type GroupIter<'a> = &'a mut dyn Iterator<Item = Result<Row, OpError>>;

/// Running sum that stays integral while every addend is an integer.
#[derive(Debug, Clone, Copy)]
struct NumericSum {
    int: Option<i64>,
    float: f64,
}

impl NumericSum {
    fn new() -> Self {
        Self {
            int: Some(0),
            float: 0.0,
        }
    }

    fn add(&mut self, row: &Row, field: &str) -> Result<(), OpError> {
        let v = row.get(field)?;
        self.int = match (self.int, v) {
            (Some(acc), Value::Int(i)) => acc.checked_add(*i),
            _ => None,
        };
        self.float += row.get_f64(field)?;
        Ok(())
    }

    fn value(self) -> Value {
        match self.int {
            Some(i) => Value::Int(i),
            None => Value::Float(self.float),
        }
    }
}

/// Emits the first row of each group unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstReducer;

impl Reducer for FirstReducer {
    fn name(&self) -> &'static str {
        "first"
    }

    fn reduce(&self, _keys: &[String], group: GroupIter<'_>) -> Result<Vec<Row>, OpError> {
        match group.next() {
            Some(row) => Ok(vec![row?]),
            None => Ok(Vec::new()),
        }
    }
}

/// Emits `{field: number_of_rows}`.
#[derive(Debug, Clone)]
pub struct Count {
    field: String,
}

impl Count {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Reducer for Count {
    fn name(&self) -> &'static str {
        "count"
    }

    fn reduce(&self, _keys: &[String], group: GroupIter<'_>) -> Result<Vec<Row>, OpError> {
        let mut n: i64 = 0;
        for row in group {
            row?;
            n += 1;
        }
        let mut out = Row::with_capacity(1);
        out.insert(self.field.clone(), n);
        Ok(vec![out])
    }
}

/// Emits `{field: sum of field}`.
#[derive(Debug, Clone)]
pub struct Sum {
    field: String,
}

impl Sum {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Reducer for Sum {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn reduce(&self, _keys: &[String], group: GroupIter<'_>) -> Result<Vec<Row>, OpError> {
        let mut sum = NumericSum::new();
        for row in group {
            sum.add(&row?, &self.field)?;
        }
        let mut out = Row::with_capacity(1);
        out.insert(self.field.clone(), sum.value());
        Ok(vec![out])
    }
}

struct Ranked {
    value: Value,
    seq: u64,
    row: Row,
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earlier rows outrank later ones on equal values.
        self.value
            .total_cmp(&other.value)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

/// Emits the `n` rows with the largest `field`, largest first.
///
/// Keeps a min-heap of at most `n` rows, so memory is bounded by `n`
/// rather than the group size.
#[derive(Debug, Clone)]
pub struct TopN {
    field: String,
    n: usize,
}

impl TopN {
    pub fn new(field: impl Into<String>, n: usize) -> Self {
        Self {
            field: field.into(),
            n,
        }
    }
}

impl Reducer for TopN {
    fn name(&self) -> &'static str {
        "top_n"
    }

    fn reduce(&self, _keys: &[String], group: GroupIter<'_>) -> Result<Vec<Row>, OpError> {
        let mut heap: BinaryHeap<Reverse<Ranked>> = BinaryHeap::with_capacity(self.n);
        for (seq, row) in group.enumerate() {
            let row = row?;
            let entry = Ranked {
                value: row.get(&self.field)?.clone(),
                seq: seq as u64,
                row,
            };
            if heap.len() < self.n {
                heap.push(Reverse(entry));
            } else if let Some(Reverse(worst)) = heap.peek() {
                if entry > *worst {
                    heap.pop();
                    heap.push(Reverse(entry));
                }
            }
        }
        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(r)| r.row)
            .collect())
    }
}

/// Per distinct `word` value in the group, emits
/// `{word: value, result: weight_of_value / total_weight}`.
///
/// Every row weighs 1 unless a weight field is set. Output follows first
/// appearance within the group.
#[derive(Debug, Clone)]
pub struct TermFrequency {
    word: String,
    result: String,
    weight: Option<String>,
}

impl TermFrequency {
    pub fn new(word: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            result: "tf".into(),
            weight: None,
        }
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = result.into();
        self
    }

    pub fn with_weight(mut self, weight: impl Into<String>) -> Self {
        self.weight = Some(weight.into());
        self
    }
}

impl Reducer for TermFrequency {
    fn name(&self) -> &'static str {
        "term_frequency"
    }

    fn reduce(&self, _keys: &[String], group: GroupIter<'_>) -> Result<Vec<Row>, OpError> {
        let mut index: BTreeMap<KeyTuple, usize> = BTreeMap::new();
        let mut counts: Vec<(Value, f64)> = Vec::new();
        let mut total = 0.0;
        for row in group {
            let row = row?;
            let w = match &self.weight {
                Some(field) => row.get_f64(field)?,
                None => 1.0,
            };
            let word = row.get(&self.word)?;
            let slot = *index
                .entry(KeyTuple(vec![word.clone()]))
                .or_insert_with(|| {
                    counts.push((word.clone(), 0.0));
                    counts.len() - 1
                });
            counts[slot].1 += w;
            total += w;
        }
        if counts.is_empty() {
            return Ok(Vec::new());
        }
        if total == 0.0 {
            return Err(Error::Numeric(format!("'{}': zero total weight", self.result)).into());
        }
        Ok(counts
            .into_iter()
            .map(|(word, count)| {
                let mut out = Row::with_capacity(2);
                out.insert(self.word.clone(), word);
                out.insert(self.result.clone(), count / total);
                out
            })
            .collect())
    }
}

/// Emits `{result: Σ(length·weight) / Σ(duration·weight)}`.
#[derive(Debug, Clone)]
pub struct MeanSpeed {
    duration: String,
    length: String,
    result: String,
    weight: String,
}

impl MeanSpeed {
    pub fn new(
        duration: impl Into<String>,
        length: impl Into<String>,
        result: impl Into<String>,
        weight: impl Into<String>,
    ) -> Self {
        Self {
            duration: duration.into(),
            length: length.into(),
            result: result.into(),
            weight: weight.into(),
        }
    }
}

impl Reducer for MeanSpeed {
    fn name(&self) -> &'static str {
        "mean_speed"
    }

    fn reduce(&self, _keys: &[String], group: GroupIter<'_>) -> Result<Vec<Row>, OpError> {
        let mut time = 0.0;
        let mut distance = 0.0;
        for row in group {
            let row = row?;
            let w = row.get_f64(&self.weight)?;
            time += row.get_f64(&self.duration)? * w;
            distance += row.get_f64(&self.length)? * w;
        }
        if time == 0.0 {
            return Err(Error::Numeric(format!("'{}': zero total duration", self.result)).into());
        }
        let mut out = Row::with_capacity(1);
        out.insert(self.result.clone(), distance / time);
        Ok(vec![out])
    }
}

type ReduceFn = dyn Fn(&[String], GroupIter<'_>) -> Result<Vec<Row>, OpError> + Send + Sync;

/// Adapts a closure into a reducer.
pub struct FnReducer {
    f: Box<ReduceFn>,
}

impl FnReducer {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[String], GroupIter<'_>) -> Result<Vec<Row>, OpError> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

impl Reducer for FnReducer {
    fn name(&self) -> &'static str {
        "fn_reducer"
    }

    fn reduce(&self, keys: &[String], group: GroupIter<'_>) -> Result<Vec<Row>, OpError> {
        (self.f)(keys, group)
    }
}
