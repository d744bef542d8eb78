//! Graph construction.
//!
//! A `Graph` is a handle to one node of an immutable DAG. Building a graph
//! never touches data: every method returns a new node that points at its
//! inputs, so one node can feed any number of continuations.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use compgraph_core::id::NodeId;
use compgraph_core::types::Row;
use compgraph_io::LineParser;
use compgraph_operators::{Joiner, Mapper, OpError, Reducer};

use crate::runtime::{Bindings, Engine, ExecError};

pub(crate) enum Node {
    Iter {
        name: String,
    },
    File {
        path: PathBuf,
        parser: LineParser,
    },
    Fork {
        upstream: Graph,
    },
    Map {
        input: Graph,
        mapper: Arc<dyn Mapper>,
    },
    Sort {
        input: Graph,
        keys: Vec<String>,
    },
    Reduce {
        input: Graph,
        reducer: Arc<dyn Reducer>,
        keys: Vec<String>,
    },
    Join {
        left: Graph,
        right: Graph,
        joiner: Joiner,
        keys: Vec<String>,
    },
}

impl Node {
    fn op_name(&self) -> &'static str {
        match self {
            Node::Iter { .. } => "iter",
            Node::File { .. } => "file",
            Node::Fork { .. } => "fork",
            Node::Map { .. } => "map",
            Node::Sort { .. } => "sort",
            Node::Reduce { .. } => "reduce",
            Node::Join { .. } => "join",
        }
    }

    fn inputs(&self) -> Vec<&Graph> {
        match self {
            Node::Iter { .. } | Node::File { .. } => Vec::new(),
            Node::Fork { upstream } => vec![upstream],
            Node::Map { input, .. } | Node::Sort { input, .. } | Node::Reduce { input, .. } => {
                vec![input]
            }
            Node::Join { left, right, .. } => vec![left, right],
        }
    }
}

/// Handle to a node of a computation graph. Cloning is cheap and shares the node.
#[derive(Clone)]
pub struct Graph {
    id: NodeId,
    node: Arc<Node>,
}

impl Graph {
    fn from_node(node: Node) -> Self {
        Self {
            id: NodeId::next(),
            node: Arc::new(node),
        }
    }

    /// Source whose rows come from the producer bound to `name` at run time.
    pub fn graph_from_iter(name: impl Into<String>) -> Self {
        Self::from_node(Node::Iter { name: name.into() })
    }

    /// Source that reads `path` line by line, parsing each line with `parser`.
    /// The file is opened when the first row is pulled.
    pub fn graph_from_file(path: impl AsRef<Path>, parser: LineParser) -> Self {
        Self::from_node(Node::File {
            path: path.as_ref().to_path_buf(),
            parser,
        })
    }

    /// Source that executes `existing`'s whole chain to obtain its rows.
    ///
    /// Under `ShareMode::Recompute` every branch forked this way re-runs the
    /// prefix; under `ShareMode::Cache` the prefix runs once per `run` call
    /// and the buffered rows are replayed to each branch.
    pub fn graph_from_graph(existing: &Graph) -> Self {
        Self::from_node(Node::Fork {
            upstream: existing.clone(),
        })
    }

    pub fn map(&self, mapper: impl Mapper) -> Self {
        self.map_arc(Arc::new(mapper))
    }

    pub fn map_arc(&self, mapper: Arc<dyn Mapper>) -> Self {
        Self::from_node(Node::Map {
            input: self.clone(),
            mapper,
        })
    }

    pub fn sort<I, S>(&self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_node(Node::Sort {
            input: self.clone(),
            keys: keys.into_iter().map(Into::into).collect(),
        })
    }

    /// Group adjacent rows by `keys` and apply `reducer` to each group.
    /// The input must already be sorted by `keys`.
    pub fn reduce<I, S>(&self, reducer: impl Reducer, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_node(Node::Reduce {
            input: self.clone(),
            reducer: Arc::new(reducer),
            keys: keys.into_iter().map(Into::into).collect(),
        })
    }

    /// Merge-join this graph (left) with `other` (right) on `keys`.
    /// Both inputs must already be sorted by `keys`.
    pub fn join<I, S>(&self, joiner: Joiner, other: &Graph, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_node(Node::Join {
            left: self.clone(),
            right: other.clone(),
            joiner,
            keys: keys.into_iter().map(Into::into).collect(),
        })
    }

    /// Run the graph with an engine configured from the environment
    /// (see `EngineConfig::from_env`).
    pub fn run(
        &self,
        bindings: &Bindings,
    ) -> Result<Box<dyn Iterator<Item = Result<Row, OpError>>>, ExecError> {
        let engine = Engine::from_env()?;
        engine.run(self, bindings)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn node(&self) -> &Node {
        &self.node
    }

    /// Names of every `graph_from_iter` source reachable from this node,
    /// in first-visit order.
    pub fn source_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.walk(&mut |g| {
            if let Node::Iter { name } = g.node() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        });
        names
    }

    /// Number of distinct nodes reachable from this one, itself included.
    pub fn node_count(&self) -> usize {
        let mut n = 0;
        self.walk(&mut |_| n += 1);
        n
    }

    fn walk(&self, visit: &mut dyn FnMut(&Graph)) {
        let mut seen = HashSet::new();
        let mut stack = vec![self];
        while let Some(g) = stack.pop() {
            if !seen.insert(g.id) {
                continue;
            }
            visit(g);
            // reversed so the left input is visited first
            stack.extend(g.node.inputs().into_iter().rev());
        }
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Graph");
        d.field("id", &self.id).field("op", &self.node.op_name());
        match self.node() {
            Node::Iter { name } => {
                d.field("name", name);
            }
            Node::File { path, .. } => {
                d.field("path", path);
            }
            Node::Sort { keys, .. } | Node::Reduce { keys, .. } => {
                d.field("keys", keys);
            }
            Node::Join { joiner, keys, .. } => {
                d.field("kind", &joiner.kind()).field("keys", keys);
            }
            Node::Fork { .. } | Node::Map { .. } => {}
        }
        d.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compgraph_operators::map::Identity;
    use compgraph_operators::reducers::Count;

    #[test]
    fn test_builder_shares_nodes() {
        let src = Graph::graph_from_iter("docs");
        let a = src.map(Identity);
        let b = src.sort(["text"]).reduce(Count::new("count"), ["text"]);
        let joined = a.sort(["text"]).join(Joiner::inner(), &b, ["text"]);

        // docs, map, sort, sort, reduce, join
        assert_eq!(joined.node_count(), 6);
        assert_eq!(joined.source_names(), vec!["docs".to_string()]);
    }

    #[test]
    fn test_source_names_left_first() {
        let left = Graph::graph_from_iter("left");
        let right = Graph::graph_from_iter("right");
        let g = left.join(Joiner::outer(), &right, ["k"]);
        assert_eq!(g.source_names(), vec!["left".to_string(), "right".to_string()]);
    }

    #[test]
    fn test_fork_counts_upstream() {
        let base = Graph::graph_from_iter("x").map(Identity);
        let fork = Graph::graph_from_graph(&base);
        assert_eq!(fork.node_count(), 3);
        assert!(format!("{fork:?}").contains("fork"));
    }
}
