//! Crate-wide error type
//!
//! Each layer keeps its own `thiserror` enum. [`Error`] wraps all of them so
//! the [`Database`](crate::Database) facade can return a single type, and
//! [`Error::kind`] gives callers a stable category to branch on.

use crate::config::ConfigError;
use crate::graph::{GraphError, StorageError};
use crate::persistence::WalError;
use crate::query::{CompileError, CompileErrorKind, ExecutionError};
use crate::transaction::TransactionError;
use std::fmt;
use thiserror::Error;

/// Stable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Lex,
    Syntax,
    Scope,
    Semantic,
    /// An id or block that does not exist
    NotFound,
    TypeMismatch,
    /// Lost an optimistic commit race; retrying may succeed
    Conflict,
    Storage,
    Cancelled,
    /// Any other failure while evaluating a query
    Runtime,
    Config,
    /// Operation not allowed in the current state (finished transaction, read-only snapshot)
    InvalidState,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors returned by [`Database`](crate::Database)
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Compile(err) => match err.kind {
                CompileErrorKind::Lex => ErrorKind::Lex,
                CompileErrorKind::Syntax => ErrorKind::Syntax,
                CompileErrorKind::Scope => ErrorKind::Scope,
                CompileErrorKind::Semantic => ErrorKind::Semantic,
            },
            Error::Execution(err) => execution_kind(err),
            Error::Transaction(err) => transaction_kind(err),
            Error::Graph(err) => graph_kind(err),
            Error::Storage(err) => storage_kind(err),
            Error::Wal(_) => ErrorKind::Storage,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether running the same work again in a fresh transaction may succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

fn execution_kind(err: &ExecutionError) -> ErrorKind {
    match err {
        ExecutionError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
        ExecutionError::DivisionByZero
        | ExecutionError::UnknownFunction { .. }
        | ExecutionError::InvalidArgument(_)
        | ExecutionError::DeleteConnected(_) => ErrorKind::Runtime,
        ExecutionError::ReadOnly => ErrorKind::InvalidState,
        ExecutionError::Cancelled => ErrorKind::Cancelled,
        ExecutionError::Graph(err) => graph_kind(err),
        ExecutionError::Transaction(err) => transaction_kind(err),
    }
}

fn transaction_kind(err: &TransactionError) -> ErrorKind {
    match err {
        TransactionError::Conflict { .. } => ErrorKind::Conflict,
        TransactionError::NotActive { .. } => ErrorKind::InvalidState,
        TransactionError::Graph(err) => graph_kind(err),
        TransactionError::Wal(_) => ErrorKind::Storage,
    }
}

fn graph_kind(err: &GraphError) -> ErrorKind {
    match err {
        GraphError::NotFound(_) | GraphError::InvalidEndpoint(_) => ErrorKind::NotFound,
        GraphError::Storage(err) => storage_kind(err),
        GraphError::UnexpectedBlock { .. } => ErrorKind::Storage,
        // Only a concurrent delete can leave an endpoint missing at commit
        GraphError::DanglingRelationship { .. } => ErrorKind::Conflict,
        GraphError::EntityHasRelationships(_) => ErrorKind::Runtime,
        GraphError::Cancelled => ErrorKind::Cancelled,
    }
}

fn storage_kind(err: &StorageError) -> ErrorKind {
    match err {
        StorageError::NotFound(_) => ErrorKind::NotFound,
        _ => ErrorKind::Storage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EntityId, GraphId};

    #[test]
    fn test_compile_kinds() {
        let err: Error = CompileError::scope(1, 8, "Variable `m` not defined").into();
        assert_eq!(err.kind(), ErrorKind::Scope);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_nested_kinds() {
        let conflict: Error = ExecutionError::Transaction(TransactionError::Conflict {
            tx_id: 3,
            ids: vec![GraphId::Entity(EntityId::new(1))],
        })
        .into();
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        assert!(conflict.is_retryable());

        let missing: Error = TransactionError::Graph(GraphError::NotFound(GraphId::Entity(EntityId::new(9)))).into();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let cancelled: Error = ExecutionError::Cancelled.into();
        assert_eq!(cancelled.kind(), ErrorKind::Cancelled);

        let read_only: Error = ExecutionError::ReadOnly.into();
        assert_eq!(read_only.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_message_is_transparent() {
        let err: Error = ExecutionError::DivisionByZero.into();
        assert_eq!(err.to_string(), "Division by zero");
        assert_eq!(err.kind(), ErrorKind::Runtime);
    }
}
