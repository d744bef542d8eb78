#![forbid(unsafe_code)]
//! compgraph: lazy batch dataflow graphs over row streams.
//!
//! Build a [`Graph`] from named or file-backed sources, chain `map`, `sort`,
//! `reduce` and `join`, then call `run` with source bindings to get a lazily
//! produced row stream. Sorting spills to disk once the memory watchdog's
//! ceiling is reached.
//!
//! ```
//! use compgraph::prelude::*;
//!
//! let graph = Graph::graph_from_iter("docs")
//!     .map(LowerCase::new("text"))
//!     .map(Split::new("text"))
//!     .sort(["text"])
//!     .reduce(Count::new("count"), ["text"]);
//!
//! let bindings = Bindings::new().bind_rows("docs", vec![row! { "text" => "A a b" }]);
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let rows: Vec<Row> = engine
//!     .run(&graph, &bindings)
//!     .unwrap()
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(rows[0], row! { "text" => "a", "count" => 2 });
//! ```

pub use compgraph_core as core;
pub use compgraph_exec as exec;
pub use compgraph_io as io;
pub use compgraph_mem as mem;
pub use compgraph_operators as operators;

pub mod pipelines;

pub use compgraph_core::{row, KeyTuple, Row, Value};
pub use compgraph_exec::{Bindings, Engine, ExecError, Graph};

pub mod prelude {
    pub use compgraph_core::config::{EngineConfig, ShareMode};
    pub use compgraph_core::{row, Error, KeyTuple, Row, Value};
    pub use compgraph_exec::{Bindings, Engine, ExecError, Graph};
    pub use compgraph_operators::filter::Filter;
    pub use compgraph_operators::geo::{ProcessDate, StreetLength};
    pub use compgraph_operators::map::{
        AddField, FilterPunctuation, FnMapper, Identity, LowerCase, Project, RemoveField, Split,
    };
    pub use compgraph_operators::reducers::{
        Count, FirstReducer, FnReducer, MeanSpeed, Sum, TermFrequency, TopN,
    };
    pub use compgraph_operators::stats::{InverseDocumentFrequency, Pmi, Product, TfIdf};
    pub use compgraph_operators::{JoinType, Joiner, Mapper, OpError, Reducer, RowStream};
}
