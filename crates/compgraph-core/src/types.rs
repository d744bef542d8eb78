//! Dynamically-typed row values and the open `Row` mapping.
//!
//! Rows carry no schema: any field may appear, disappear or be renamed by an
//! operator. Lookups go through [`Row::get`] and friends, which fail with
//! [`Error::MissingField`] instead of default-filling.
//!
//! `Value` is serialized untagged, so a row's JSON form is a plain object
//! (`{"text":"hello","count":2}`). Line-delimited sources use this encoding;
//! spilled sort segments use a tagged one that keeps non-finite floats.

use std::cmp::Ordering;
use std::fmt;
use std::mem::size_of;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<f64>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[f64]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Total order used for sorting, grouping and joining.
    ///
    /// Numbers compare numerically across `Int`/`Float`; strings by bytes;
    /// lists element-wise. Values of different kinds order by kind rank
    /// (number < string < list).
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Int(x), Int(y)) => x.cmp(y),
            (Float(x), Float(y)) => x.total_cmp(y),
            (Int(x), Float(y)) => (*x as f64).total_cmp(y),
            (Float(x), Int(y)) => x.total_cmp(&(*y as f64)),
            (Str(x), Str(y)) => x.cmp(y),
            (List(x), List(y)) => {
                for (a, b) in x.iter().zip(y.iter()) {
                    match a.total_cmp(b) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                x.len().cmp(&y.len())
            }
            _ => kind_rank(self).cmp(&kind_rank(other)),
        }
    }

    fn heap_bytes(&self) -> usize {
        match self {
            Value::Str(s) => s.len(),
            Value::List(l) => l.len() * size_of::<f64>(),
            _ => 0,
        }
    }
}

/// Assign a numeric order to value kinds for mixed-kind comparisons.
fn kind_rank(v: &Value) -> u8 {
    match v {
        Value::Int(_) | Value::Float(_) => 0,
        Value::Str(_) => 1,
        Value::List(_) => 2,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::List(l) => {
                f.write_str("[")?;
                for (i, x) in l.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{x}")?;
                }
                f.write_str("]")
            }
        }
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Int(v as i64)
                }
            }
        )*
    };
}

value_from_int!(i64, i32, u32, u8, usize);

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::List(v)
    }
}

impl<const N: usize> From<[f64; N]> for Value {
    fn from(v: [f64; N]) -> Self {
        Value::List(v.to_vec())
    }
}

// Bookkeeping charged per row/entry on top of string and list payloads.
const ROW_OVERHEAD: usize = size_of::<Row>();
const ENTRY_OVERHEAD: usize = size_of::<(String, Value)>() + size_of::<usize>();

/// One record: an insertion-ordered mapping from field name to [`Value`].
///
/// Equality ignores field order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(IndexMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn with_capacity(n: usize) -> Self {
        Self(IndexMap::with_capacity(n))
    }

    /// Look up a field, failing loudly when it is absent.
    pub fn get(&self, field: &str) -> Result<&Value> {
        self.0
            .get(field)
            .ok_or_else(|| Error::MissingField(field.to_string()))
    }

    pub fn get_opt(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_f64(&self, field: &str) -> Result<f64> {
        let v = self.get(field)?;
        v.as_f64().ok_or_else(|| mismatch(field, "number", v))
    }

    pub fn get_str(&self, field: &str) -> Result<&str> {
        let v = self.get(field)?;
        v.as_str().ok_or_else(|| mismatch(field, "string", v))
    }

    pub fn get_list(&self, field: &str) -> Result<&[f64]> {
        let v = self.get(field)?;
        v.as_list().ok_or_else(|| mismatch(field, "list", v))
    }

    /// Insert or overwrite a field. A new field is appended; an existing one
    /// keeps its position.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Remove a field, preserving the order of the remaining ones.
    pub fn remove(&mut self, field: &str) -> Result<Value> {
        self.0
            .shift_remove(field)
            .ok_or_else(|| Error::MissingField(field.to_string()))
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn fields(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Extract the key tuple for `fields`, in order.
    pub fn key(&self, fields: &[String]) -> Result<KeyTuple> {
        fields
            .iter()
            .map(|f| self.get(f).cloned())
            .collect::<Result<Vec<_>>>()
            .map(KeyTuple)
    }

    /// Rough resident size of this row, charged to the memory watchdog.
    pub fn estimated_bytes(&self) -> usize {
        self.0.iter().fold(ROW_OVERHEAD, |acc, (k, v)| {
            acc + ENTRY_OVERHEAD + k.len() + v.heap_bytes()
        })
    }
}

fn mismatch(field: &str, expected: &'static str, found: &Value) -> Error {
    Error::TypeMismatch {
        field: field.to_string(),
        expected,
        found: found.kind(),
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<(String, Value)> for Row {
    fn extend<I: IntoIterator<Item = (String, Value)>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

/// Values extracted from a row for an ordered list of key fields.
///
/// Ordering is lexicographic over [`Value::total_cmp`]; equality agrees with
/// the ordering (so `Int(1)` and `Float(1.0)` are the same key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyTuple(pub Vec<Value>);

impl KeyTuple {
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Pair key values back up with their field names.
    pub fn into_fields<'a>(
        self,
        fields: &'a [String],
    ) -> impl Iterator<Item = (String, Value)> + 'a {
        fields.iter().cloned().zip(self.0)
    }
}

impl Ord for KeyTuple {
    fn cmp(&self, other: &Self) -> Ordering {
        for (x, y) in self.0.iter().zip(other.0.iter()) {
            match x.total_cmp(y) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialOrd for KeyTuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyTuple {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyTuple {}

/// Build a [`Row`] from `field => value` pairs.
///
/// ```
/// use compgraph_core::row;
/// let r = row! { "text" => "hello", "count" => 2 };
/// assert_eq!(r.get_f64("count").unwrap(), 2.0);
/// ```
#[macro_export]
macro_rules! row {
    () => {
        $crate::types::Row::new()
    };
    ($($field:expr => $value:expr),+ $(,)?) => {{
        let mut row = $crate::types::Row::new();
        $( row.insert($field, $value); )+
        row
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_is_an_error() {
        let r = row! { "a" => 1 };
        assert_eq!(r.get("b"), Err(Error::MissingField("b".into())));
        let mut r = r;
        assert!(r.remove("b").is_err());
    }

    #[test]
    fn test_numbers_compare_across_kinds() {
        assert_eq!(Value::Int(2).total_cmp(&Value::Float(2.0)), Ordering::Equal);
        assert_eq!(Value::Int(2).total_cmp(&Value::Float(2.5)), Ordering::Less);
        assert_eq!(
            Value::Float(10.0).total_cmp(&Value::Str("1".into())),
            Ordering::Less
        );
    }

    #[test]
    fn test_key_tuple_lexicographic() {
        let fields = vec!["a".to_string(), "b".to_string()];
        let k1 = row! { "a" => 1, "b" => "z" }.key(&fields).unwrap();
        let k2 = row! { "a" => 2, "b" => "a" }.key(&fields).unwrap();
        let k3 = row! { "a" => 2, "b" => "b" }.key(&fields).unwrap();
        assert!(k1 < k2);
        assert!(k2 < k3);
        assert_eq!(k1, row! { "b" => "z", "a" => 1.0 }.key(&fields).unwrap());
    }

    #[test]
    fn test_row_json_is_plain_object() {
        let r = row! { "text" => "hi", "n" => 3, "x" => 0.5, "p" => vec![1.0, 2.0] };
        let s = serde_json::to_string(&r).unwrap();
        assert_eq!(s, r#"{"text":"hi","n":3,"x":0.5,"p":[1.0,2.0]}"#);
        let back: Row = serde_json::from_str(&s).unwrap();
        assert_eq!(back.get("n").unwrap(), &Value::Int(3));
        assert_eq!(back.get("x").unwrap(), &Value::Float(0.5));
        assert_eq!(back, r);
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut r = row! { "a" => 1, "b" => 2, "c" => 3 };
        r.remove("b").unwrap();
        let fields: Vec<_> = r.fields().cloned().collect();
        assert_eq!(fields, vec!["a", "c"]);
    }

    #[test]
    fn test_type_mismatch_names_field() {
        let r = row! { "a" => "x" };
        match r.get_f64("a") {
            Err(Error::TypeMismatch { field, expected, found }) => {
                assert_eq!(field, "a");
                assert_eq!(expected, "number");
                assert_eq!(found, "string");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
