//! Numeric mappers: products and the TF-IDF/PMI family.
//!
//! Degenerate inputs (log of a non-positive ratio, division by zero, a
//! non-finite result) are raised as `Error::Numeric` rather than written out
//! as `inf`/`NaN`.

use compgraph_core::types::{Row, Value};
use compgraph_core::Error;

use crate::traits::{Mapper, OpError};

fn finite(field: &str, x: f64) -> Result<f64, OpError> {
    if x.is_finite() {
        Ok(x)
    } else {
        Err(Error::Numeric(format!("'{field}' would be {x}")).into())
    }
}

/// `ln(numerator / denominator)`, raising on a zero denominator or a
/// non-positive ratio.
fn ln_ratio(result: &str, numerator: f64, denominator: f64) -> Result<f64, OpError> {
    if denominator == 0.0 {
        return Err(Error::Numeric(format!("'{result}': division by zero")).into());
    }
    let ratio = numerator / denominator;
    if ratio <= 0.0 {
        return Err(Error::Numeric(format!("'{result}': log of non-positive {ratio}")).into());
    }
    finite(result, ratio.ln())
}

/// Multiplies numeric fields into a result field.
///
/// The product stays an integer while every factor is one.
#[derive(Debug, Clone)]
pub struct Product {
    fields: Vec<String>,
    result: String,
}

impl Product {
    pub fn new<I, S>(fields: I, result: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            result: result.into(),
        }
    }
}

impl Mapper for Product {
    fn name(&self) -> &'static str {
        "product"
    }

    fn apply(&self, mut row: Row) -> Result<Vec<Row>, OpError> {
        let mut int_prod: Option<i64> = Some(1);
        let mut float_prod = 1.0;
        for field in &self.fields {
            let v = row.get(field)?;
            int_prod = match (int_prod, v) {
                (Some(acc), Value::Int(i)) => acc.checked_mul(*i),
                _ => None,
            };
            float_prod *= row.get_f64(field)?;
        }
        let value = match int_prod {
            Some(p) => Value::Int(p),
            None => Value::Float(finite(&self.result, float_prod)?),
        };
        row.insert(self.result.clone(), value);
        Ok(vec![row])
    }
}

/// `idf = ln(total_docs / docs_with_term)`.
#[derive(Debug, Clone)]
pub struct InverseDocumentFrequency {
    total: String,
    docs: String,
    result: String,
}

impl InverseDocumentFrequency {
    pub fn new(total: impl Into<String>, docs: impl Into<String>) -> Self {
        Self {
            total: total.into(),
            docs: docs.into(),
            result: "idf".into(),
        }
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = result.into();
        self
    }
}

impl Mapper for InverseDocumentFrequency {
    fn name(&self) -> &'static str {
        "idf"
    }

    fn apply(&self, mut row: Row) -> Result<Vec<Row>, OpError> {
        let idf = ln_ratio(
            &self.result,
            row.get_f64(&self.total)?,
            row.get_f64(&self.docs)?,
        )?;
        row.insert(self.result.clone(), idf);
        Ok(vec![row])
    }
}

/// `tfidf = tf * idf`.
#[derive(Debug, Clone)]
pub struct TfIdf {
    tf: String,
    idf: String,
    result: String,
}

impl TfIdf {
    pub fn new(tf: impl Into<String>, idf: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            tf: tf.into(),
            idf: idf.into(),
            result: result.into(),
        }
    }
}

impl Mapper for TfIdf {
    fn name(&self) -> &'static str {
        "tf_idf"
    }

    fn apply(&self, mut row: Row) -> Result<Vec<Row>, OpError> {
        let v = finite(
            &self.result,
            row.get_f64(&self.tf)? * row.get_f64(&self.idf)?,
        )?;
        row.insert(self.result.clone(), v);
        Ok(vec![row])
    }
}

/// `pmi = ln(tf_in_doc / tf_in_corpus)`.
#[derive(Debug, Clone)]
pub struct Pmi {
    tf: String,
    corpus_tf: String,
    result: String,
}

impl Pmi {
    pub fn new(tf: impl Into<String>, corpus_tf: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            tf: tf.into(),
            corpus_tf: corpus_tf.into(),
            result: result.into(),
        }
    }
}

impl Mapper for Pmi {
    fn name(&self) -> &'static str {
        "pmi"
    }

    fn apply(&self, mut row: Row) -> Result<Vec<Row>, OpError> {
        let v = ln_ratio(
            &self.result,
            row.get_f64(&self.tf)?,
            row.get_f64(&self.corpus_tf)?,
        )?;
        row.insert(self.result.clone(), v);
        Ok(vec![row])
    }
}
