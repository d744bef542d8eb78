//! Runtime: turn a `Graph` into a lazily pulled row stream.
//!
//! - `Engine` owns the memory watchdog, the spill manager and the config.
//! - `run` checks every named source against the bindings before building
//!   anything, then composes one iterator per node. No row is produced until
//!   the caller pulls.
//! - Shared prefixes (`graph_from_graph`) are recomputed per branch or
//!   buffered once per run, depending on `ShareMode`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use thiserror::Error;

use compgraph_core::budget::MemoryBudget;
use compgraph_core::config::{EngineConfig, ShareMode};
use compgraph_core::id::NodeId;
use compgraph_core::types::Row;

use compgraph_mem::{Codec, MemoryWatchdog, SpillManager, Storage, WatchdogGuard};

use compgraph_io::storage::fs_spill_manager;
use compgraph_io::LineReader;

use compgraph_operators::{ExternalSort, MapStream, MergeJoin, OpError, ReduceStream, RowStream};

use crate::graph::{Graph, Node};
use crate::metrics;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("no binding for source '{0}'")]
    UnboundSource(String),
    #[error("operator exec: {0}")]
    Operator(#[from] OpError),
    #[error("invalid config: {0}")]
    Config(String),
}

/// Zero-argument producer of a source's rows, called once per run (and once
/// per branch when a prefix is recomputed).
pub type SourceFn = Arc<dyn Fn() -> Box<dyn Iterator<Item = Row>>>;

/// Map from `graph_from_iter` source names to row producers.
#[derive(Clone, Default)]
pub struct Bindings {
    sources: HashMap<String, SourceFn>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind<F, I>(mut self, name: impl Into<String>, producer: F) -> Self
    where
        F: Fn() -> I + 'static,
        I: IntoIterator<Item = Row>,
        I::IntoIter: 'static,
    {
        self.insert(name, producer);
        self
    }

    /// Bind a fixed set of rows; each run gets its own copy.
    pub fn bind_rows(self, name: impl Into<String>, rows: Vec<Row>) -> Self {
        let rows = Arc::new(rows);
        self.bind(name, move || rows.as_ref().clone())
    }

    pub fn insert<F, I>(&mut self, name: impl Into<String>, producer: F)
    where
        F: Fn() -> I + 'static,
        I: IntoIterator<Item = Row>,
        I::IntoIter: 'static,
    {
        let f: SourceFn = Arc::new(move || Box::new(producer().into_iter()));
        self.sources.insert(name.into(), f);
    }

    pub fn get(&self, name: &str) -> Option<&SourceFn> {
        self.sources.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.sources.keys().collect();
        names.sort();
        f.debug_struct("Bindings").field("sources", &names).finish()
    }
}

/// Engine owns the memory watchdog, the spill manager and the config shared
/// by every run it executes.
pub struct Engine {
    cfg: EngineConfig,
    watchdog: MemoryWatchdog,
    spill: Arc<SpillManager>,
}

impl Engine {
    /// Engine spilling to `cfg.spill_dir` on the local filesystem.
    pub fn new(cfg: EngineConfig) -> Result<Self, ExecError> {
        cfg.validate().map_err(|e| ExecError::Config(e.to_string()))?;
        let spill = fs_spill_manager(&cfg.spill_dir, &cfg.spill_codec)
            .map_err(|e| ExecError::Config(e.to_string()))?;
        Ok(Self::assemble(cfg, spill))
    }

    /// Engine spilling into an arbitrary storage backend.
    pub fn with_storage(cfg: EngineConfig, storage: Box<dyn Storage>) -> Result<Self, ExecError> {
        cfg.validate().map_err(|e| ExecError::Config(e.to_string()))?;
        let codec = Codec::from_name(&cfg.spill_codec).map_err(|e| ExecError::Config(e.to_string()))?;
        let spill = SpillManager::new(storage, codec, cfg.spill_dir.clone());
        Ok(Self::assemble(cfg, spill))
    }

    pub fn from_env() -> Result<Self, ExecError> {
        Self::new(EngineConfig::from_env())
    }

    fn assemble(cfg: EngineConfig, spill: SpillManager) -> Self {
        Self {
            watchdog: MemoryWatchdog::new(cfg.mem_cap_bytes),
            spill: Arc::new(spill),
            cfg,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn watchdog(&self) -> &MemoryWatchdog {
        &self.watchdog
    }

    pub fn spill_manager(&self) -> &Arc<SpillManager> {
        &self.spill
    }

    /// Highest resident estimate the watchdog has seen so far.
    pub fn peak_bytes(&self) -> usize {
        self.watchdog.peak_bytes()
    }

    /// Resolve sources and compose the pull chain for `graph`.
    ///
    /// Fails with `UnboundSource` before any producer is called if a
    /// `graph_from_iter` name has no binding.
    pub fn run(&self, graph: &Graph, bindings: &Bindings) -> Result<RowStream, ExecError> {
        let sources = graph.source_names();
        if let Some(missing) = sources.iter().find(|name| !bindings.contains(name)) {
            return Err(ExecError::UnboundSource(missing.clone()));
        }

        let span = metrics::run_span(graph);
        {
            let _enter = span.enter();
            tracing::debug!(
                nodes = graph.node_count(),
                sources = ?sources,
                share_mode = ?self.cfg.share_mode,
                "run start"
            );
        }

        let mut builder = StreamBuilder {
            engine: self,
            bindings,
            shared: HashMap::new(),
        };
        let stream = builder.build(graph)?;
        Ok(Box::new(metrics::RunStream::new(
            stream,
            span,
            self.watchdog.clone(),
        )))
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("cfg", &self.cfg)
            .field("watchdog", &self.watchdog)
            .finish()
    }
}

/// Per-run state: the buffered prefixes live only as long as this run's streams.
struct StreamBuilder<'a> {
    engine: &'a Engine,
    bindings: &'a Bindings,
    shared: HashMap<NodeId, Rc<SharedPrefix>>,
}

impl StreamBuilder<'_> {
    fn build(&mut self, graph: &Graph) -> Result<RowStream, ExecError> {
        let verify = self.engine.cfg.verify_sorted;
        let stream: RowStream = match graph.node() {
            Node::Iter { name } => {
                let producer = self
                    .bindings
                    .get(name)
                    .ok_or_else(|| ExecError::UnboundSource(name.clone()))?
                    .clone();
                Box::new(LazySource::new(move || {
                    Ok(Box::new(producer().map(Ok::<Row, OpError>)) as RowStream)
                }))
            }
            Node::File { path, parser } => {
                let path = path.clone();
                let parser = parser.clone();
                Box::new(LazySource::new(move || {
                    let reader = LineReader::open(&path, parser)?;
                    Ok(Box::new(reader.map(|r| r.map_err(OpError::from))) as RowStream)
                }))
            }
            Node::Fork { upstream } => match self.engine.cfg.share_mode {
                ShareMode::Recompute => self.build(upstream)?,
                ShareMode::Cache => {
                    let shared = match self.shared.get(&upstream.id()) {
                        Some(shared) => Rc::clone(shared),
                        None => {
                            let stream = self.build(upstream)?;
                            let shared = Rc::new(SharedPrefix::new(
                                upstream.id(),
                                stream,
                                self.engine.watchdog.clone(),
                            ));
                            self.shared.insert(upstream.id(), Rc::clone(&shared));
                            shared
                        }
                    };
                    Box::new(ReplayStream::new(shared))
                }
            },
            Node::Map { input, mapper } => {
                Box::new(MapStream::new(self.build(input)?, Arc::clone(mapper)))
            }
            Node::Sort { input, keys } => {
                let sort = ExternalSort::new(keys.clone(), self.engine.watchdog.clone())
                    .with_spill(Arc::clone(&self.engine.spill))
                    .with_max_rows_per_run(self.engine.cfg.max_rows_per_run);
                Box::new(sort.sort(self.build(input)?))
            }
            Node::Reduce {
                input,
                reducer,
                keys,
            } => Box::new(
                ReduceStream::new(self.build(input)?, Arc::clone(reducer), keys.clone())
                    .with_verify_sorted(verify),
            ),
            Node::Join {
                left,
                right,
                joiner,
                keys,
            } => {
                let left = self.build(left)?;
                let right = self.build(right)?;
                Box::new(
                    MergeJoin::new(joiner.clone(), keys.clone(), left, right)
                        .with_verify_sorted(verify),
                )
            }
        };
        Ok(stream)
    }
}

type OpenFn = Box<dyn FnOnce() -> Result<RowStream, OpError>>;

/// Source that opens its underlying stream on the first pull.
struct LazySource {
    open: Option<OpenFn>,
    stream: Option<RowStream>,
}

impl LazySource {
    fn new<F>(open: F) -> Self
    where
        F: FnOnce() -> Result<RowStream, OpError> + 'static,
    {
        Self {
            open: Some(Box::new(open)),
            stream: None,
        }
    }
}

impl Iterator for LazySource {
    type Item = Result<Row, OpError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(open) = self.open.take() {
            match open() {
                Ok(stream) => self.stream = Some(stream),
                Err(e) => return Some(Err(e)),
            }
        }
        self.stream.as_mut()?.next()
    }
}

enum PrefixState {
    Pending(RowStream),
    Ready(Rc<Vec<Row>>),
    Failed(String),
}

/// A prefix buffered in full the first time any branch pulls from it.
struct SharedPrefix {
    node: NodeId,
    state: RefCell<PrefixState>,
    watchdog: MemoryWatchdog,
    guard: RefCell<Option<WatchdogGuard>>,
}

impl SharedPrefix {
    fn new(node: NodeId, stream: RowStream, watchdog: MemoryWatchdog) -> Self {
        Self {
            node,
            state: RefCell::new(PrefixState::Pending(stream)),
            watchdog,
            guard: RefCell::new(None),
        }
    }

    fn rows(&self) -> Result<Rc<Vec<Row>>, OpError> {
        let mut state = self.state.borrow_mut();
        let stream = match std::mem::replace(&mut *state, PrefixState::Failed(String::new())) {
            PrefixState::Pending(stream) => stream,
            PrefixState::Ready(rows) => {
                *state = PrefixState::Ready(Rc::clone(&rows));
                return Ok(rows);
            }
            PrefixState::Failed(msg) => {
                *state = PrefixState::Failed(msg.clone());
                return Err(OpError::Exec(msg));
            }
        };

        let mut rows = Vec::new();
        let mut bytes = 0usize;
        for item in stream {
            match item {
                Ok(row) => {
                    bytes += row.estimated_bytes();
                    rows.push(row);
                }
                Err(e) => {
                    *state = PrefixState::Failed(format!("shared prefix {} failed: {e}", self.node));
                    return Err(e);
                }
            }
        }

        let guard = self.watchdog.try_acquire(bytes, "shared-prefix");
        if guard.is_none() {
            tracing::debug!(node = %self.node, bytes, "shared prefix exceeds memory ceiling, kept uncharged");
        }
        *self.guard.borrow_mut() = guard;
        tracing::debug!(node = %self.node, rows = rows.len(), bytes, "shared prefix buffered");

        let rows = Rc::new(rows);
        *state = PrefixState::Ready(Rc::clone(&rows));
        Ok(rows)
    }
}

/// One branch's view of a buffered prefix.
struct ReplayStream {
    shared: Rc<SharedPrefix>,
    rows: Option<Rc<Vec<Row>>>,
    pos: usize,
    failed: bool,
}

impl ReplayStream {
    fn new(shared: Rc<SharedPrefix>) -> Self {
        Self {
            shared,
            rows: None,
            pos: 0,
            failed: false,
        }
    }
}

impl Iterator for ReplayStream {
    type Item = Result<Row, OpError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.rows.is_none() {
            match self.shared.rows() {
                Ok(rows) => self.rows = Some(rows),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        let row = self.rows.as_ref()?.get(self.pos)?.clone();
        self.pos += 1;
        Some(Ok(row))
    }
}
