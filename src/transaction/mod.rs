//! Optimistic transactions over immutable snapshots
//!
//! A transaction reads a fixed snapshot, buffers its writes in a private
//! [`GraphDiff`](crate::graph::GraphDiff) and only touches shared state at
//! commit time:
//! - **Atomicity**: the commit publishes one new root manifest, or nothing
//! - **Isolation**: snapshot isolation by default, serializable on request
//! - **Durability**: intents and commits go through the WAL before the root swap

mod manager;
mod state;

pub use manager::{RecoveryReport, TransactionManager};
pub use state::Transaction;

use crate::graph::{GraphError, GraphId};
use crate::persistence::WalError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Conflicts only between overlapping write-sets
    #[default]
    Snapshot,
    /// Also fails when something this transaction read was changed concurrently
    Serializable,
}

/// Lifecycle of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committing,
    Committed,
    Aborted,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxState::Active => "active",
            TxState::Committing => "committing",
            TxState::Committed => "committed",
            TxState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Transaction errors
#[derive(Error, Debug)]
pub enum TransactionError {
    /// A concurrent commit touched the listed ids; the transaction was aborted
    #[error("Transaction {tx_id} conflicts on {}", format_ids(.ids))]
    Conflict { tx_id: u64, ids: Vec<GraphId> },

    #[error("Transaction {tx_id} is {state}")]
    NotActive { tx_id: u64, state: TxState },

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
}

pub type TransactionResult<T> = Result<T, TransactionError>;

fn format_ids(ids: &[GraphId]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}
