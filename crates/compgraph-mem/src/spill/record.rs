//! Line encoding of rows inside spill segments.
//!
//! Each row is a JSON array of `[field, value]` pairs in field order. Values
//! carry their variant as a tag and floats travel as their IEEE-754 bit
//! pattern, so NaN and the infinities come back exactly as they went in.
//!
//! `[["text",{"S":"hi"}],["x",{"F":4607182418800017408}]]`

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use compgraph_core::types::{Row, Value};

use crate::error::{Error, Result};

#[derive(Serialize, Deserialize)]
enum Tagged<'a> {
    I(i64),
    F(u64),
    S(Cow<'a, str>),
    L(Vec<u64>),
}

impl<'a> From<&'a Value> for Tagged<'a> {
    fn from(value: &'a Value) -> Self {
        match value {
            Value::Int(i) => Tagged::I(*i),
            Value::Float(f) => Tagged::F(f.to_bits()),
            Value::Str(s) => Tagged::S(Cow::Borrowed(s)),
            Value::List(l) => Tagged::L(l.iter().map(|f| f.to_bits()).collect()),
        }
    }
}

impl From<Tagged<'_>> for Value {
    fn from(tagged: Tagged<'_>) -> Self {
        match tagged {
            Tagged::I(i) => Value::Int(i),
            Tagged::F(bits) => Value::Float(f64::from_bits(bits)),
            Tagged::S(s) => Value::Str(s.into_owned()),
            Tagged::L(l) => Value::List(l.into_iter().map(f64::from_bits).collect()),
        }
    }
}

/// Append one encoded row and its trailing newline to `out`.
pub(crate) fn encode_row(row: &Row, out: &mut Vec<u8>) -> Result<()> {
    let fields: Vec<(&str, Tagged<'_>)> = row
        .iter()
        .map(|(name, value)| (name.as_str(), Tagged::from(value)))
        .collect();
    serde_json::to_writer(&mut *out, &fields)
        .map_err(|e| Error::Codec(format!("json serialize: {e}")))?;
    out.push(b'\n');
    Ok(())
}

/// Decode one line written by [`encode_row`], without its newline.
pub(crate) fn decode_row(line: &str) -> serde_json::Result<Row> {
    let fields: Vec<(String, Tagged<'_>)> = serde_json::from_str(line)?;
    Ok(fields
        .into_iter()
        .map(|(name, value)| (name, Value::from(value)))
        .collect())
}
