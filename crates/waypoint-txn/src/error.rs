/// The four outward-facing outcomes the engine ever surfaces to `run`'s
/// caller. Every lower-level failure (network, auth, not-found-at-commit)
/// is translated into one of these according to where in the attempt state
/// machine it occurred.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("transaction failed: {0}")]
    Failed(#[source] StoreError),
    #[error("transaction expired before it could complete")]
    Expired,
    #[error("transaction reached commit but the outcome is unknown: {0}")]
    CommitAmbiguous(#[source] StoreError),
    #[error("transaction committed but a post-commit step failed: {0}")]
    FailedPostCommit(#[source] StoreError),
}

/// Failure surfaced by a [`crate::store::DocumentStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,
    #[error("document already exists")]
    AlreadyExists,
    #[error("CAS mismatch")]
    CasMismatch,
    #[error("document is locked by another operation")]
    Locked,
    #[error("transport or protocol error: {0}")]
    Transport(String),
    #[error("query service error: {0}")]
    Query(String),
}

impl StoreError {
    /// Whether a failed KV call during an attempt should send the attempt
    /// into rollback (as opposed to being retried transparently within the
    /// same operation).
    pub fn requires_rollback(&self) -> bool {
        !matches!(self, StoreError::Locked)
    }
}
