//! Client-coordinated multi-document ACID transactions layered on a
//! [`store::DocumentStore`]: per-attempt staging via document extended
//! attributes, an active-transaction-record protocol for commit/rollback,
//! write-write conflict resolution, and a lost-transactions cleanup loop.
//!
//! This crate has no dependency on `waypoint-net`/`waypoint-http` -- it is
//! driven entirely through the `DocumentStore` capability interface, which
//! the top-level crate implements over a binary session. That keeps the
//! attempt state machine testable against an in-process fake instead of a
//! live cluster.

mod attempt;
mod cleanup;
mod error;
mod model;
mod runner;
mod store;

#[cfg(test)]
mod test_support;

pub use attempt::{AttemptContext, OperationError, TxnDocument};
pub use cleanup::LostTransactionsCleanup;
pub use error::{StoreError, TransactionError};
pub use model::{
    AtrEntry, AtrState, AttemptState, Cas, DocId, DurabilityLevel, StagedMutation, StagedOpKind,
    TransactionConfig, MAX_EXPIRATION,
};
pub use runner::Transactions;
pub use store::{DocumentStore, StoredDocument, TransactionalXattr};
