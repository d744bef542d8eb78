//! Sort-merge join: policies and the row-merge rule.
//!
//! `merge` holds the streaming operator that pairs up key groups; this module
//! decides what a pair of groups (either possibly empty) turns into.

mod merge;

use std::fmt;

use compgraph_core::types::Row;

pub use merge::MergeJoin;

/// How a join reacts to a key present on only one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    /// Emit only keys present on both sides.
    #[default]
    Inner,
    /// Also pass through left rows whose key has no right match.
    Left,
    /// Also pass through right rows whose key has no left match.
    Right,
    /// Pass through unmatched rows from either side.
    Outer,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
            JoinType::Right => "right",
            JoinType::Outer => "outer",
        })
    }
}

/// A join policy plus the suffixes used to disambiguate shared non-key
/// fields.
///
/// When both suffixes are empty and both sides carry the same non-key field,
/// the right value overwrites the left one in the merged row.
#[derive(Debug, Clone, Default)]
pub struct Joiner {
    kind: JoinType,
    suffix_a: String,
    suffix_b: String,
}

impl Joiner {
    pub fn new(kind: JoinType) -> Self {
        Self {
            kind,
            suffix_a: String::new(),
            suffix_b: String::new(),
        }
    }

    pub fn inner() -> Self {
        Self::new(JoinType::Inner)
    }

    pub fn left() -> Self {
        Self::new(JoinType::Left)
    }

    pub fn right() -> Self {
        Self::new(JoinType::Right)
    }

    pub fn outer() -> Self {
        Self::new(JoinType::Outer)
    }

    pub fn with_suffixes(mut self, suffix_a: impl Into<String>, suffix_b: impl Into<String>) -> Self {
        self.suffix_a = suffix_a.into();
        self.suffix_b = suffix_b.into();
        self
    }

    pub fn kind(&self) -> JoinType {
        self.kind
    }

    /// Turn one pair of key groups into output rows, appending to `out`.
    ///
    /// | policy | left empty        | right empty      | both present |
    /// |--------|-------------------|------------------|--------------|
    /// | inner  | nothing           | nothing          | cross-merge  |
    /// | left   | nothing           | left rows as-is  | cross-merge  |
    /// | right  | right rows as-is  | nothing          | cross-merge  |
    /// | outer  | right rows as-is  | left rows as-is  | cross-merge  |
    pub fn join_groups(&self, keys: &[String], left: Vec<Row>, right: Vec<Row>, out: &mut Vec<Row>) {
        match (left.is_empty(), right.is_empty()) {
            (false, false) => {
                out.reserve(left.len() * right.len());
                for a in &left {
                    for b in &right {
                        out.push(self.merge_rows(a, b, keys));
                    }
                }
            }
            (false, true) => {
                if matches!(self.kind, JoinType::Left | JoinType::Outer) {
                    out.extend(left);
                }
            }
            (true, false) => {
                if matches!(self.kind, JoinType::Right | JoinType::Outer) {
                    out.extend(right);
                }
            }
            (true, true) => {}
        }
    }

    /// Merge two rows sharing a join key.
    ///
    /// Fields are taken from `a` then `b`. Key fields and fields present on
    /// one side only keep their name. A non-key field present on both sides
    /// goes to `name + suffix_a` if that name is still free in the merged
    /// row, else to `name + suffix_b`.
    pub fn merge_rows(&self, a: &Row, b: &Row, keys: &[String]) -> Row {
        let is_common =
            |field: &str| a.contains(field) && b.contains(field) && !keys.iter().any(|k| k == field);

        let mut merged = Row::with_capacity(a.len() + b.len());
        for (field, value) in a.iter().chain(b.iter()) {
            let name = if !is_common(field) {
                field.clone()
            } else {
                let with_a = format!("{field}{}", self.suffix_a);
                if merged.contains(&with_a) {
                    format!("{field}{}", self.suffix_b)
                } else {
                    with_a
                }
            };
            merged.insert(name, value.clone());
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use compgraph_core::row;

    use super::*;

    fn keys() -> Vec<String> {
        vec!["id".to_string()]
    }

    #[test]
    fn test_merge_suffixes_shared_fields() {
        let j = Joiner::inner().with_suffixes("_a", "_b");
        let merged = j.merge_rows(
            &row! {"id" => 1, "score" => 10, "left_only" => "x"},
            &row! {"id" => 1, "score" => 20, "right_only" => "y"},
            &keys(),
        );
        assert_eq!(
            merged,
            row! {"id" => 1, "score_a" => 10, "left_only" => "x", "score_b" => 20, "right_only" => "y"}
        );
    }

    #[test]
    fn test_merge_empty_suffixes_overwrite() {
        let merged = Joiner::inner().merge_rows(
            &row! {"id" => 1, "v" => "left"},
            &row! {"id" => 1, "v" => "right"},
            &keys(),
        );
        assert_eq!(merged, row! {"id" => 1, "v" => "right"});
    }

    #[test]
    fn test_merge_only_one_suffix() {
        let merged = Joiner::inner().with_suffixes("", "_b").merge_rows(
            &row! {"id" => 1, "v" => 1},
            &row! {"id" => 1, "v" => 2},
            &keys(),
        );
        assert_eq!(merged, row! {"id" => 1, "v" => 1, "v_b" => 2});
    }

    #[test]
    fn test_policy_table() {
        let l = vec![row! {"id" => 1, "l" => 1}];
        let r = vec![row! {"id" => 1, "r" => 1}];
        let cases = [
            (Joiner::inner(), 0, 0),
            (Joiner::left(), 1, 0),
            (Joiner::right(), 0, 1),
            (Joiner::outer(), 1, 1),
        ];
        for (j, left_only, right_only) in cases {
            let mut out = Vec::new();
            j.join_groups(&keys(), l.clone(), Vec::new(), &mut out);
            assert_eq!(out.len(), left_only, "{} with empty right", j.kind());
            out.clear();
            j.join_groups(&keys(), Vec::new(), r.clone(), &mut out);
            assert_eq!(out.len(), right_only, "{} with empty left", j.kind());
            out.clear();
            j.join_groups(&keys(), l.clone(), r.clone(), &mut out);
            assert_eq!(out, vec![row! {"id" => 1, "l" => 1, "r" => 1}]);
        }
    }

    #[test]
    fn test_cross_product_within_key() {
        let l = vec![row! {"id" => 1, "l" => 1}, row! {"id" => 1, "l" => 2}];
        let r = vec![row! {"id" => 1, "r" => 1}, row! {"id" => 1, "r" => 2}, row! {"id" => 1, "r" => 3}];
        let mut out = Vec::new();
        Joiner::inner().join_groups(&keys(), l, r, &mut out);
        assert_eq!(out.len(), 6);
    }
}
