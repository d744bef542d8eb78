use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Row(#[from] compgraph_core::Error),

    #[error("{path}:{line}: {source}")]
    Line {
        path: String,
        line: usize,
        source: compgraph_core::Error,
    },

    #[error("storage: {0}")]
    Storage(#[from] compgraph_mem::error::Error),
}
