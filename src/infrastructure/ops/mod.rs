//! The op pipeline: dependency graph and persisted ledger

pub mod graph;
pub mod graph_node;
pub mod ledger;

pub use graph::{EnqueueResult, OpGraph, OpGraphError};
pub use ledger::{LedgerError, OpLedger};
