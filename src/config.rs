//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::Result;

/// When `Graph::execute_script` commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoCommit {
    /// Each statement runs in its own transaction.
    #[default]
    PerStatement,
    /// The whole script runs in one transaction.
    PerScript,
}

/// Tunables for a [`Graph`](crate::Graph).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rows per property chunk.
    pub chunk_size: usize,
    /// Let the compiler keep multi-hop matches factorized.
    pub factorized_execution: bool,
    pub auto_commit: AutoCommit,
    /// Hop ceiling for repetitions without an upper bound.
    pub max_var_length: usize,
    pub floyd_warshall_max_nodes: usize,
    /// Fail compilation on labels/types the graph has never seen.
    pub reject_unknown_labels: bool,
    /// Log every statement at `info` with its duration and row count.
    pub query_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            factorized_execution: true,
            auto_commit: AutoCommit::PerStatement,
            max_var_length: 16,
            floyd_warshall_max_nodes: 1000,
            reject_unknown_labels: false,
            query_logging: false,
        }
    }
}

impl Config {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_factorized_execution(mut self, enabled: bool) -> Self {
        self.factorized_execution = enabled;
        self
    }

    pub fn with_auto_commit(mut self, policy: AutoCommit) -> Self {
        self.auto_commit = policy;
        self
    }

    pub fn with_max_var_length(mut self, hops: usize) -> Self {
        self.max_var_length = hops;
        self
    }

    pub fn with_floyd_warshall_max_nodes(mut self, nodes: usize) -> Self {
        self.floyd_warshall_max_nodes = nodes;
        self
    }

    pub fn with_reject_unknown_labels(mut self, strict: bool) -> Self {
        self.reject_unknown_labels = strict;
        self
    }

    pub fn with_query_logging(mut self, enabled: bool) -> Self {
        self.query_logging = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Config::from_json_str(r#"{"chunk_size": 64, "auto_commit": "per_script"}"#).unwrap();
        assert_eq!(config.chunk_size, 64);
        assert_eq!(config.auto_commit, AutoCommit::PerScript);
        assert!(config.factorized_execution);
        assert_eq!(config.max_var_length, 16);
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let err = Config::from_json_str("{chunk_size: }").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = Config::default().with_chunk_size(8).with_query_logging(true);
        let back = Config::from_json_str(&config.to_json_string().unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
