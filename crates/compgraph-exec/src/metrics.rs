//! Tracing hooks for graph runs.
//!
//! The library never installs a subscriber; binaries and tests pick one.

use compgraph_core::types::Row;
use compgraph_mem::MemoryWatchdog;
use compgraph_operators::{OpError, RowStream};

use crate::graph::Graph;

/// Span covering one `Engine::run` call.
pub fn run_span(graph: &Graph) -> tracing::Span {
    tracing::debug_span!("compgraph.run", graph = %graph.id())
}

/// Wraps the output of a run and logs a summary once it ends.
pub(crate) struct RunStream {
    inner: RowStream,
    span: tracing::Span,
    watchdog: MemoryWatchdog,
    rows: u64,
    finished: bool,
}

impl RunStream {
    pub(crate) fn new(inner: RowStream, span: tracing::Span, watchdog: MemoryWatchdog) -> Self {
        Self {
            inner,
            span,
            watchdog,
            rows: 0,
            finished: false,
        }
    }

    fn finish(&mut self, failed: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        let _enter = self.span.enter();
        tracing::debug!(
            rows = self.rows,
            failed,
            peak_bytes = self.watchdog.peak_bytes(),
            "run finished"
        );
    }
}

impl Iterator for RunStream {
    type Item = Result<Row, OpError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.inner.next() {
            Some(Ok(row)) => {
                self.rows += 1;
                Some(Ok(row))
            }
            Some(Err(e)) => {
                self.finish(true);
                Some(Err(e))
            }
            None => {
                self.finish(false);
                None
            }
        }
    }
}
