//! Engine configuration that downstream crates can serialize/deserialize.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What a node created with `graph_from_graph` does with its shared prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareMode {
    /// Re-execute the shared prefix once per branch that forks from it.
    #[default]
    Recompute,
    /// Materialize the prefix the first time a branch pulls it and replay the
    /// buffered rows for every later branch within the same run.
    Cache,
}

impl FromStr for ShareMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recompute" => Ok(ShareMode::Recompute),
            "cache" => Ok(ShareMode::Cache),
            other => Err(Error::Config(format!("unknown share mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Memory ceiling (in bytes) for rows a sort stage may hold before spilling.
    pub mem_cap_bytes: usize,

    /// Optional row-count ceiling per in-memory sort chunk.
    pub max_rows_per_run: Option<usize>,

    /// Directory for spilled sort chunks.
    pub spill_dir: String,

    /// Spill codec name: `none`, `zstd` or `lz4` (the latter two need cargo features).
    pub spill_codec: String,

    /// Shared-prefix policy for `graph_from_graph` nodes.
    pub share_mode: ShareMode,

    /// Make Reduce/Join fail on input that is not sorted by their key.
    pub verify_sorted: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mem_cap_bytes: 256 * 1024 * 1024, // 256 MiB default
            max_rows_per_run: None,
            spill_dir: std::env::temp_dir()
                .join("compgraph-spill")
                .to_string_lossy()
                .into_owned(),
            spill_codec: "none".to_string(),
            share_mode: ShareMode::Recompute,
            verify_sorted: false,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `COMPGRAPH_MEM_CAP_BYTES`: memory ceiling in bytes
    /// - `COMPGRAPH_MAX_ROWS_PER_RUN`: row ceiling per sort chunk
    /// - `COMPGRAPH_SPILL_DIR`: spill directory
    /// - `COMPGRAPH_SPILL_CODEC`: spill codec name
    /// - `COMPGRAPH_SHARE_MODE`: `recompute` or `cache`
    /// - `COMPGRAPH_VERIFY_SORTED`: `1`/`true` to check Reduce/Join input order
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("COMPGRAPH_MEM_CAP_BYTES") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.mem_cap_bytes = v;
            }
        }

        if let Ok(s) = std::env::var("COMPGRAPH_MAX_ROWS_PER_RUN") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_rows_per_run = Some(v);
            }
        }

        if let Ok(s) = std::env::var("COMPGRAPH_SPILL_DIR") {
            cfg.spill_dir = s;
        }

        if let Ok(s) = std::env::var("COMPGRAPH_SPILL_CODEC") {
            cfg.spill_codec = s;
        }

        if let Ok(s) = std::env::var("COMPGRAPH_SHARE_MODE") {
            if let Ok(v) = s.parse::<ShareMode>() {
                cfg.share_mode = v;
            }
        }

        if let Ok(s) = std::env::var("COMPGRAPH_VERIFY_SORTED") {
            cfg.verify_sorted = matches!(s.trim(), "1" | "true" | "yes");
        }

        cfg
    }

    pub fn with_mem_cap_bytes(mut self, bytes: usize) -> Self {
        self.mem_cap_bytes = bytes;
        self
    }

    pub fn with_max_rows_per_run(mut self, rows: usize) -> Self {
        self.max_rows_per_run = Some(rows);
        self
    }

    pub fn with_spill_dir(mut self, dir: impl Into<String>) -> Self {
        self.spill_dir = dir.into();
        self
    }

    pub fn with_share_mode(mut self, mode: ShareMode) -> Self {
        self.share_mode = mode;
        self
    }

    pub fn with_verify_sorted(mut self, on: bool) -> Self {
        self.verify_sorted = on;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.mem_cap_bytes == 0 {
            return Err(Error::Config("mem_cap_bytes must be positive".into()));
        }
        if self.max_rows_per_run == Some(0) {
            return Err(Error::Config("max_rows_per_run must be positive".into()));
        }
        if self.spill_dir.trim().is_empty() {
            return Err(Error::Config("spill_dir must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.share_mode, ShareMode::Recompute);
        assert!(!cfg.verify_sorted);
    }

    #[test]
    fn test_validate_rejects_zero_ceilings() {
        assert!(EngineConfig::default().with_mem_cap_bytes(0).validate().is_err());
        assert!(EngineConfig::default()
            .with_max_rows_per_run(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_share_mode_parse_and_serde() {
        assert_eq!("Cache".parse::<ShareMode>().unwrap(), ShareMode::Cache);
        assert!("sometimes".parse::<ShareMode>().is_err());
        let json = serde_json::to_string(&ShareMode::Recompute).unwrap();
        assert_eq!(json, "\"recompute\"");
    }
}
