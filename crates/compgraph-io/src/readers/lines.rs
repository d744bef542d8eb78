use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use compgraph_core::types::Row;

use crate::error::{Error, Result};

/// Turns one line of text (without its newline) into a row.
pub type LineParser = Arc<dyn Fn(&str) -> compgraph_core::Result<Row> + Send + Sync>;

const READ_BUF_BYTES: usize = 64 * 1024;

/// Reads a file lazily, one parsed row per non-empty line.
pub struct LineReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    parser: LineParser,
    line_no: usize,
}

impl LineReader {
    pub fn open(path: impl AsRef<Path>, parser: LineParser) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        tracing::debug!(path = %path.display(), "opened line source");
        Ok(Self {
            path,
            lines: BufReader::with_capacity(READ_BUF_BYTES, file).lines(),
            parser,
            line_no: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for LineReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(Error::Io(e))),
            };
            self.line_no += 1;
            // Blank lines carry no row.
            if line.trim().is_empty() {
                continue;
            }
            return Some((self.parser)(&line).map_err(|source| Error::Line {
                path: self.path.display().to_string(),
                line: self.line_no,
                source,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use compgraph_core::row;

    use super::*;

    #[test]
    fn test_reads_with_custom_parser() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "a,1").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "b,2").unwrap();

        let parser: LineParser = Arc::new(|line: &str| {
            let (name, n) = line
                .split_once(',')
                .ok_or_else(|| compgraph_core::Error::Parse(line.to_string()))?;
            let n: i64 = n
                .parse()
                .map_err(|_| compgraph_core::Error::Parse(n.to_string()))?;
            Ok(row! { "name" => name, "n" => n })
        });

        let rows: Vec<Row> = LineReader::open(f.path(), parser)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows, vec![row! {"name" => "a", "n" => 1}, row! {"name" => "b", "n" => 2}]);
    }

    #[test]
    fn test_parse_error_reports_line() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "{{\"x\": 1}}").unwrap();
        writeln!(f, "oops").unwrap();

        let mut reader = LineReader::open(f.path(), crate::readers::jsonl::parser()).unwrap();
        assert!(reader.next().unwrap().is_ok());
        match reader.next().unwrap() {
            Err(Error::Line { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected line error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file() {
        let parser = crate::readers::jsonl::parser();
        assert!(matches!(
            LineReader::open("/definitely/not/here.jsonl", parser),
            Err(Error::Io(_))
        ));
    }
}
