//! Query execution using the Volcano iterator model
//!
//! The planner turns a [`LogicalPlan`] into a tree of physical operators.
//! Rows are pulled one at a time from the root; every operator pulls from its
//! input only when asked. Writes go straight into the transaction passed in
//! through [`GraphAccess::Transaction`], so later operators of the same query
//! observe them.

pub mod eval;
pub mod operator;
pub mod planner;
pub mod record;

pub use operator::{OperatorBox, PhysicalOperator};
pub use planner::build_operator_tree;
pub use record::{Params, QueryResult, QueryStats, Record, Value};

use super::functions::FunctionRegistry;
use super::ir::LogicalPlan;
use crate::cancel::{CancellationToken, Cancelled};
use crate::graph::{EntityId, GraphError, GraphRead, GraphSnapshot};
use crate::transaction::{Transaction, TransactionError};
use regex::Regex;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use thiserror::Error;
use tracing::debug;

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// A function got an argument of a type it cannot handle
    #[error("Type mismatch in {function}: expected {expected}, got {actual}")]
    TypeMismatch {
        function: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Division by zero")]
    DivisionByZero,

    /// Call to a function that was not registered when the query compiled
    #[error("Unknown function {name}/{arity}")]
    UnknownFunction { name: String, arity: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Write operation attempted against a read-only snapshot
    #[error("Cannot modify the graph from a read-only query context")]
    ReadOnly,

    #[error("Cannot delete entity {0} because it still has relationships; use DETACH DELETE")]
    DeleteConnected(EntityId),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Graph error: {0}")]
    Graph(GraphError),

    #[error("Transaction error: {0}")]
    Transaction(TransactionError),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

impl From<GraphError> for ExecutionError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Cancelled => ExecutionError::Cancelled,
            GraphError::EntityHasRelationships(id) => ExecutionError::DeleteConnected(id),
            other => ExecutionError::Graph(other),
        }
    }
}

impl From<TransactionError> for ExecutionError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Graph(graph) => graph.into(),
            other => ExecutionError::Transaction(other),
        }
    }
}

impl From<Cancelled> for ExecutionError {
    fn from(_: Cancelled) -> Self {
        ExecutionError::Cancelled
    }
}

/// The graph a query runs against
pub enum GraphAccess<'a> {
    /// Read-only: any write fails with [`ExecutionError::ReadOnly`]
    Snapshot(&'a GraphSnapshot),
    /// Reads see the transaction's own writes
    Transaction(&'a mut Transaction),
}

impl GraphAccess<'_> {
    pub fn read(&self) -> &dyn GraphRead {
        match self {
            GraphAccess::Snapshot(snapshot) => *snapshot,
            GraphAccess::Transaction(tx) => &**tx,
        }
    }

    pub fn write(&mut self) -> ExecutionResult<&mut Transaction> {
        match self {
            GraphAccess::Snapshot(_) => Err(ExecutionError::ReadOnly),
            GraphAccess::Transaction(tx) => Ok(&mut **tx),
        }
    }
}

/// Everything an operator needs while producing rows
pub struct ExecContext<'a> {
    pub graph: GraphAccess<'a>,
    pub params: &'a Params,
    pub functions: &'a FunctionRegistry,
    pub cancel: &'a CancellationToken,
    pub stats: QueryStats,
    /// Upper bound substituted for an open-ended `*min..`
    pub max_hops: usize,
    regex_cache: RefCell<FxHashMap<String, Regex>>,
}

impl<'a> ExecContext<'a> {
    pub fn new(
        graph: GraphAccess<'a>,
        params: &'a Params,
        functions: &'a FunctionRegistry,
        cancel: &'a CancellationToken,
        max_hops: usize,
    ) -> Self {
        Self {
            graph,
            params,
            functions,
            cancel,
            stats: QueryStats::default(),
            max_hops,
            regex_cache: RefCell::new(FxHashMap::default()),
        }
    }

    /// Whether `text` fully matches `pattern`, compiling each pattern once
    pub fn regex_matches(&self, pattern: &str, text: &str) -> ExecutionResult<bool> {
        let mut cache = self.regex_cache.borrow_mut();
        if !cache.contains_key(pattern) {
            let regex = Regex::new(&format!("^(?:{})$", pattern))
                .map_err(|e| ExecutionError::InvalidArgument(format!("Invalid regular expression: {}", e)))?;
            cache.insert(pattern.to_string(), regex);
        }
        Ok(cache.get(pattern).is_some_and(|regex| regex.is_match(text)))
    }
}

/// Run a compiled plan to completion
pub fn execute_plan(plan: &LogicalPlan, ctx: &mut ExecContext<'_>) -> ExecutionResult<QueryResult> {
    if !plan.read_only {
        ctx.graph.write()?;
    }

    let mut root = build_operator_tree(plan);
    root.reset(&Record::new());

    let mut rows = Vec::new();
    while let Some(record) = root.next(ctx)? {
        ctx.cancel.check()?;
        if !plan.columns.is_empty() {
            rows.push(record);
        }
    }
    ctx.stats.rows_returned = rows.len() as u64;
    debug!(rows = rows.len(), stats = ?ctx.stats, "query executed");

    Ok(QueryResult {
        columns: plan.columns.clone(),
        rows,
        stats: ctx.stats,
    })
}
