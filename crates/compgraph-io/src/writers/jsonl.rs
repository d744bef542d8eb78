//! Streaming NDJSON writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use compgraph_core::types::Row;

use crate::error::Result;

/// Writes rows as one JSON object per line, keeping each row's field order.
pub struct JsonlWriter<W: Write> {
    writer: BufWriter<W>,
    rows_written: u64,
}

impl JsonlWriter<File> {
    pub fn to_path(path: impl AsRef<Path>) -> Result<Self> {
        let f = File::create(path)?;
        Ok(Self::to_writer(f))
    }
}

impl<W: Write> JsonlWriter<W> {
    pub fn to_writer(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            rows_written: 0,
        }
    }

    pub fn write_row(&mut self, row: &Row) -> Result<()> {
        serde_json::to_writer(&mut self.writer, row)?;
        self.writer.write_all(b"\n")?;
        self.rows_written += 1;
        Ok(())
    }

    /// Drain a fallible row stream into the writer. Stops at the first error.
    pub fn write_all<I, E>(&mut self, rows: I) -> std::result::Result<u64, E>
    where
        I: IntoIterator<Item = std::result::Result<Row, E>>,
        E: From<crate::Error>,
    {
        let mut n = 0;
        for row in rows {
            self.write_row(&row?)?;
            n += 1;
        }
        self.flush()?;
        Ok(n)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| crate::Error::Io(e.into_error()))
    }
}
