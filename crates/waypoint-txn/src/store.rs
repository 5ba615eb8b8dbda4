use crate::error::StoreError;
use crate::model::{AtrEntry, Cas, DocId, StagedMutation, StagedOpKind};
use std::time::Duration;

/// The transactional extended attribute staged onto a live document:
/// transaction id, attempt id, a reference back to the owning ATR, the
/// staged operation, and its content (absent for a staged remove).
#[derive(Debug, Clone)]
pub struct TransactionalXattr {
    pub transaction_id: String,
    pub attempt_id: String,
    pub atr: DocId,
    pub operation: StagedOpKind,
    pub staged_content: Option<serde_json::Value>,
}

/// A document as read by the engine: its live body/CAS plus any
/// transactional xattr currently staged on it by some attempt.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub content: serde_json::Value,
    pub cas: Cas,
    pub txn_xattr: Option<TransactionalXattr>,
}

/// Capability interface the attempt/runner/cleanup logic is driven through,
/// kept separate from `waypoint-net`/`waypoint-http` so this crate has no
/// dependency on the wire protocol and can be exercised against in-process
/// fakes, per the "virtual interface hierarchies as capability-interface
/// traits" design note. The top-level crate provides the real
/// implementation over a binary session.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document's current body, CAS, and transactional xattr (if
    /// any is staged on it).
    async fn get(&self, doc: &DocId) -> Result<StoredDocument, StoreError>;

    /// Read an ATR document's entry for one attempt, if present.
    async fn get_atr_entry(
        &self,
        atr: &DocId,
        attempt_id: &str,
    ) -> Result<Option<AtrEntry>, StoreError>;

    /// List every attempt entry currently recorded in an ATR document, used
    /// by the lost-transactions cleanup loop.
    async fn list_atr_entries(&self, atr: &DocId) -> Result<Vec<AtrEntry>, StoreError>;

    /// Insert a brand-new ATR entry in state `Pending`. Fails with
    /// [`StoreError::AlreadyExists`] if the attempt id is already present.
    async fn insert_atr_entry(&self, atr: &DocId, entry: &AtrEntry) -> Result<(), StoreError>;

    /// Subdoc-mutate an existing ATR entry in place (state transition or
    /// staged_mutations append).
    async fn update_atr_entry(&self, atr: &DocId, entry: &AtrEntry) -> Result<(), StoreError>;

    /// Stage a mutation onto a document by writing its transactional xattr.
    /// `expected_cas` is `Some` for `replace`/`remove` (the CAS the engine
    /// last observed); `None` for a staged `insert`, which instead creates
    /// an invisible tombstone document.
    async fn stage_mutation(
        &self,
        doc: &DocId,
        xattr: &TransactionalXattr,
        expected_cas: Option<Cas>,
    ) -> Result<Cas, StoreError>;

    /// Apply a staged mutation's content to the live document and clear its
    /// transactional xattr (commit-time unstage).
    async fn unstage_mutation(&self, mutation: &StagedMutation) -> Result<(), StoreError>;

    /// Revert a staged mutation: remove a staged insert's tombstone, or
    /// clear the xattr restoring the original body for replace/remove
    /// (rollback-time revert).
    async fn revert_mutation(&self, mutation: &StagedMutation) -> Result<(), StoreError>;

    /// Issue a transactional query, tagged with the attempt's txid and
    /// remaining timeout so the query service stages its own mutations
    /// under the same ATR.
    async fn query(
        &self,
        statement: &str,
        txid: &str,
        txtimeout: Duration,
    ) -> Result<serde_json::Value, StoreError>;
}
