//! # quiver-db: embedded property graph engine
//!
//! An in-memory labeled property graph with columnar property storage,
//! snapshot-isolated transactions and a pattern engine that keeps
//! multi-hop matches factorized until something needs them flat.
//!
//! ## Design Principles
//!
//! 1. **One canonical query form**: every language front end lowers to a
//!    [`pattern::Statement`]; the compiler never sees query text
//! 2. **Immutable snapshots**: readers hold an `Arc<GraphSnapshot>` and
//!    never block; the single writer works on a private copy
//! 3. **Prune before touching rows**: zone maps skip property chunks that
//!    cannot satisfy a pushed predicate
//! 4. **Algorithms read the transactional view**: [`algo`] runs on the
//!    same snapshot a query would see
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quiver_db::{Graph, PropertyMap, Value};
//!
//! # fn example() -> quiver_db::Result<()> {
//! let graph = Graph::open_memory();
//!
//! let mut params = PropertyMap::new();
//! params.insert("name".into(), Value::from("Ada"));
//! graph.query("CREATE (n:Person {name: $name})", &params)?;
//!
//! let result = graph.query("MATCH (n:Person) RETURN n.name AS name", &PropertyMap::new())?;
//! for row in &result {
//!     println!("{}", row.get::<String>("name")?);
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod algo;
pub mod config;
pub mod cypher;
pub mod execution;
pub mod model;
pub mod pattern;
pub mod planner;
pub mod rdf;
pub mod storage;
pub mod tx;

use std::sync::Arc;

use hashbrown::HashMap;
use serde::Serialize;
use tracing::{debug, warn};

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{AutoCommit, Config};
pub use cypher::CypherFrontend;
pub use execution::{CancellationToken, ExecutionStats, FromValue, QueryResult, ResultRow};
pub use model::{Direction, Edge, EdgeId, Node, NodeId, PropertyMap, Value, props};
pub use pattern::{QueryFrontend, Statement};
pub use planner::Plan;
pub use storage::GraphSnapshot;
pub use tx::{Transaction, TxId, TxMode, TxState};

use tx::TxManager;

// ============================================================================
// Top-level Graph handle
// ============================================================================

/// State shared by a [`Graph`] and every transaction opened on it.
#[derive(Debug)]
pub(crate) struct GraphInner {
    pub(crate) config: Config,
    pub(crate) manager: TxManager,
}

/// The primary entry point: an in-memory graph database.
///
/// Cloning is cheap; clones share the same graph.
#[derive(Debug, Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::open_memory()
    }
}

impl Graph {
    /// An empty graph with the default configuration.
    pub fn open_memory() -> Self {
        Self::new(Config::default())
    }

    pub fn new(config: Config) -> Self {
        let manager = TxManager::new(config.chunk_size);
        debug!(?config, "graph opened");
        Self { inner: Arc::new(GraphInner { config, manager }) }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// A read-write transaction. It claims the writer slot at its first
    /// write, not here.
    pub fn begin_transaction(&self) -> Result<Transaction> {
        Ok(Transaction::begin(Arc::clone(&self.inner), TxMode::ReadWrite))
    }

    /// A read-only transaction; writes through it fail with
    /// [`TransactionError::ReadOnly`].
    pub fn begin_read_transaction(&self) -> Result<Transaction> {
        Ok(Transaction::begin(Arc::clone(&self.inner), TxMode::ReadOnly))
    }

    /// Runs `f` in a transaction that commits if `f` returns `Ok` and
    /// rolls back otherwise.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Transaction) -> Result<T>) -> Result<T> {
        let mut tx = self.begin_transaction()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(error = %rollback_err, "rollback after failed closure");
                }
                Err(e)
            }
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    /// Runs one statement in its own transaction.
    pub fn execute(&self, statement: &Statement) -> Result<QueryResult> {
        self.execute_with_params(statement, &PropertyMap::new())
    }

    pub fn execute_with_params(&self, statement: &Statement, params: &PropertyMap) -> Result<QueryResult> {
        self.transaction(|tx| tx.execute_with_params(statement, params))
    }

    /// Runs statements in order, stopping at the first failure.
    ///
    /// Under [`AutoCommit::PerStatement`] each statement commits on its
    /// own, so the ones before a failure stay committed. Under
    /// [`AutoCommit::PerScript`] a failure rolls the whole script back.
    pub fn execute_script(&self, statements: &[Statement]) -> Result<Vec<QueryResult>> {
        self.execute_script_with_params(statements, &PropertyMap::new())
    }

    pub fn execute_script_with_params(
        &self,
        statements: &[Statement],
        params: &PropertyMap,
    ) -> Result<Vec<QueryResult>> {
        match self.inner.config.auto_commit {
            AutoCommit::PerStatement => statements
                .iter()
                .map(|stmt| self.execute_with_params(stmt, params))
                .collect(),
            AutoCommit::PerScript => self.transaction(|tx| {
                statements.iter().map(|stmt| tx.execute_with_params(stmt, params)).collect()
            }),
        }
    }

    /// Translates `text` with `frontend`, then runs it like [`Graph::execute`].
    pub fn execute_with(
        &self,
        frontend: &dyn QueryFrontend,
        text: &str,
        params: &PropertyMap,
    ) -> Result<QueryResult> {
        let statement = frontend.translate(text, params)?;
        debug!(frontend = frontend.name(), "query translated");
        self.execute_with_params(&statement, params)
    }

    /// Runs one Cypher statement.
    pub fn query(&self, text: &str, params: &PropertyMap) -> Result<QueryResult> {
        self.execute_with(&CypherFrontend, text, params)
    }

    /// Runs a `;`-separated Cypher script under [`Config::auto_commit`].
    /// Nothing runs if any statement fails to parse.
    pub fn query_script(&self, text: &str) -> Result<Vec<QueryResult>> {
        let statements = cypher::parse_script(text)?;
        self.execute_script(&statements)
    }

    /// Compiles `statement` against the latest committed snapshot without
    /// running it.
    pub fn explain(&self, statement: &Statement) -> Result<Plan> {
        planner::compile(statement, &self.snapshot(), &self.inner.config)
    }

    // ========================================================================
    // Direct access
    // ========================================================================

    /// The latest committed snapshot.
    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        self.inner.manager.latest()
    }

    pub fn create_node(&self, labels: &[&str], properties: PropertyMap) -> Result<Node> {
        self.transaction(|tx| tx.create_node(labels, properties))
    }

    pub fn create_edge(&self, src: NodeId, dst: NodeId, edge_type: &str, properties: PropertyMap) -> Result<Edge> {
        self.transaction(|tx| tx.create_edge(src, dst, edge_type, properties))
    }

    /// Counts over the latest committed snapshot.
    pub fn statistics(&self) -> GraphStatistics {
        let snapshot = self.snapshot();
        GraphStatistics {
            version: snapshot.version(),
            node_count: snapshot.node_count(),
            edge_count: snapshot.edge_count(),
            label_counts: snapshot
                .label_names()
                .into_iter()
                .map(|label| {
                    let count = snapshot.label_count(&label);
                    (label, count)
                })
                .collect(),
            edge_type_counts: snapshot
                .edge_type_names()
                .into_iter()
                .map(|edge_type| {
                    let count = snapshot.edge_type_count(&edge_type);
                    (edge_type, count)
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStatistics {
    /// Committed version the counts were taken from.
    pub version: u64,
    pub node_count: usize,
    pub edge_count: usize,
    pub label_counts: HashMap<String, usize>,
    pub edge_type_counts: HashMap<String, usize>,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Errors raised while turning a query into a plan.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("unknown label: {0}")]
    UnknownLabel(String),

    #[error("unknown edge type: {0}")]
    UnknownEdgeType(String),

    #[error("invalid repetition: {0}")]
    InvalidRepetition(String),

    #[error("variable `{0}` is bound to both a node and an edge")]
    AmbiguousVariable(String),

    #[error("unbound variable: {0}")]
    UnboundVariable(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Errors raised while evaluating a plan.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("type mismatch in {context}: expected {expected}, got {got}")]
    TypeMismatch { context: String, expected: String, got: String },

    #[error("missing required property {variable}.{key}")]
    MissingProperty { variable: String, key: String },

    #[error("missing parameter ${0}")]
    MissingParameter(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in {0}")]
    Overflow(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransactionError {
    #[error("transaction {id} is {state:?}")]
    InvalidState { id: u64, state: TxState },

    #[error("transaction {requested} cannot write: transaction {holder} holds the writer slot")]
    WriteConflict { holder: u64, requested: u64 },

    #[error("transaction {0} is read-only")]
    ReadOnly(u64),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_closure_rolls_back_on_error() {
        let graph = Graph::open_memory();
        let err = graph
            .transaction(|tx| {
                tx.create_node(&["Person"], PropertyMap::new())?;
                Err::<(), _>(Error::NotFound("stop".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(graph.snapshot().node_count(), 0);
        assert_eq!(graph.statistics().version, 0);
    }

    #[test]
    fn test_statistics_count_labels_and_types() {
        let graph = Graph::open_memory();
        let a = graph.create_node(&["Person"], props([("name", "Alice")])).unwrap();
        let b = graph.create_node(&["Person", "Admin"], PropertyMap::new()).unwrap();
        graph.create_edge(a.id, b.id, "KNOWS", PropertyMap::new()).unwrap();

        let stats = graph.statistics();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.edge_count, 1);
        assert_eq!(stats.label_counts["Person"], 2);
        assert_eq!(stats.label_counts["Admin"], 1);
        assert_eq!(stats.edge_type_counts["KNOWS"], 1);
        assert_eq!(stats.version, 3);
    }

    #[test]
    fn test_read_transaction_rejects_writes() {
        let graph = Graph::open_memory();
        let mut tx = graph.begin_read_transaction().unwrap();
        let err = tx.create_node(&["X"], PropertyMap::new()).unwrap_err();
        assert!(matches!(err, Error::Transaction(TransactionError::ReadOnly(_))));
        assert!(tx.is_active());
    }

    #[test]
    fn test_second_writer_conflicts() {
        let graph = Graph::open_memory();
        let mut first = graph.begin_transaction().unwrap();
        let mut second = graph.begin_transaction().unwrap();
        first.create_node(&["A"], PropertyMap::new()).unwrap();
        let err = second.create_node(&["B"], PropertyMap::new()).unwrap_err();
        assert!(matches!(err, Error::Transaction(TransactionError::WriteConflict { .. })));
        first.commit().unwrap();
        second.rollback().unwrap();
        assert_eq!(graph.snapshot().node_count(), 1);
    }

    #[test]
    fn test_error_messages() {
        let err: Error = CompileError::Syntax { position: 7, message: "unterminated string".into() }.into();
        assert_eq!(err.to_string(), "Compile error: syntax error at position 7: unterminated string");
        let err: Error = RuntimeError::DivisionByZero.into();
        assert_eq!(err.to_string(), "Runtime error: division by zero");
    }
}
