use crate::error::StoreError;
use crate::model::{
    AtrEntry, AtrState, AttemptState, Cas, DocId, StagedMutation, StagedOpKind, TransactionConfig,
};
use crate::store::{DocumentStore, TransactionalXattr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

fn now_ns() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// A document handle returned by a successful `get`/`insert`/`replace`,
/// carrying the CAS the next mutation against it must supply.
#[derive(Debug, Clone)]
pub struct TxnDocument {
    pub doc: DocId,
    pub cas: Cas,
    pub content: serde_json::Value,
}

/// Failure surfaced to transaction logic from one operation. Distinct from
/// [`crate::error::TransactionError`], which is the *attempt's* outward
/// result once the whole `run` loop gives up.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("another attempt holds this document and has not completed")]
    WriteWriteConflict,
    #[error("transaction attempt expired")]
    Expired,
}

/// Which side of the commit point a failed [`AttemptContext::commit`] call
/// happened on.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CommitOutcome {
    #[error(transparent)]
    Ambiguous(StoreError),
    #[error(transparent)]
    FailedPostCommit(StoreError),
}

/// Per-attempt context exposed to transaction logic: `get`/`insert`/
/// `replace`/`remove`/`get_multi`/`query`, each staging its effect rather
/// than mutating the live document directly.
pub struct AttemptContext<S: DocumentStore> {
    store: Arc<S>,
    config: TransactionConfig,
    transaction_id: String,
    attempt_id: String,
    start_ns: u128,
    state: Mutex<AttemptState>,
    atr: Mutex<Option<DocId>>,
    staged: Mutex<Vec<StagedMutation>>,
}

impl<S: DocumentStore> AttemptContext<S> {
    pub fn new(store: Arc<S>, config: TransactionConfig, transaction_id: String) -> Self {
        AttemptContext {
            store,
            config,
            transaction_id,
            attempt_id: uuid::Uuid::new_v4().to_string(),
            start_ns: now_ns(),
            state: Mutex::new(AttemptState::NotStarted),
            atr: Mutex::new(None),
            staged: Mutex::new(Vec::new()),
        }
    }

    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub async fn state(&self) -> AttemptState {
        *self.state.lock().await
    }

    fn has_expired(&self) -> bool {
        now_ns().saturating_sub(self.start_ns) > self.config.expiration.as_nanos()
    }

    fn check_expiry(&self) -> Result<(), OperationError> {
        if self.has_expired() {
            return Err(OperationError::Expired);
        }
        Ok(())
    }

    /// Hash `key` onto one of `atr_shards` metadata-collection keys, the
    /// same "stable shard selection" the lost-transactions cleanup loop
    /// scans exhaustively.
    fn atr_key_for(&self, first_key: &str) -> String {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in first_key.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        format!("_txn:atr-{:04}", hash % self.config.atr_shards as u64)
    }

    async fn ensure_atr(&self, first_doc: &DocId) -> Result<DocId, OperationError> {
        let mut atr_guard = self.atr.lock().await;
        if let Some(atr) = atr_guard.as_ref() {
            return Ok(atr.clone());
        }
        let meta = &self.config.metadata_collection;
        let atr = DocId::new(
            meta.bucket.clone(),
            meta.scope.clone(),
            meta.collection.clone(),
            self.atr_key_for(&first_doc.key),
        );
        let entry = AtrEntry {
            attempt_id: self.attempt_id.clone(),
            transaction_id: self.transaction_id.clone(),
            state: AtrState::Pending,
            start_ns: self.start_ns,
            expires_after_ms: self.config.expiration.as_millis() as u64,
            staged_mutations: Vec::new(),
        };
        self.store.insert_atr_entry(&atr, &entry).await?;
        *self.state.lock().await = AttemptState::Started;
        *atr_guard = Some(atr.clone());
        Ok(atr)
    }

    async fn append_staged(&self, mutation: StagedMutation) -> Result<(), OperationError> {
        let first = {
            let mut staged = self.staged.lock().await;
            let is_first = staged.is_empty();
            staged.push(mutation);
            is_first
        };
        let atr = self.atr.lock().await.clone().expect("atr allocated before staging");
        let staged_mutations = self.staged.lock().await.clone();
        let entry = AtrEntry {
            attempt_id: self.attempt_id.clone(),
            transaction_id: self.transaction_id.clone(),
            state: AtrState::Pending,
            start_ns: self.start_ns,
            expires_after_ms: self.config.expiration.as_millis() as u64,
            staged_mutations,
        };
        let _ = first;
        self.store.update_atr_entry(&atr, &entry).await?;
        Ok(())
    }

    /// Resolve a write-write race against a document already bearing
    /// another attempt's transactional xattr.
    async fn resolve_conflict(&self, xattr: &TransactionalXattr) -> Result<(), OperationError> {
        let other_entry = self
            .store
            .get_atr_entry(&xattr.atr, &xattr.attempt_id)
            .await?;
        match other_entry {
            None => Ok(()),
            Some(entry) if entry.state.is_terminal() => Ok(()),
            Some(entry) if entry.has_expired(now_ns()) => {
                tracing::info!(
                    other_attempt = %xattr.attempt_id,
                    "completing expired attempt's cleanup before proceeding"
                );
                match entry.state {
                    AtrState::Committed => {
                        for mutation in &entry.staged_mutations {
                            let _ = self.store.unstage_mutation(mutation).await;
                        }
                    }
                    _ => {
                        for mutation in &entry.staged_mutations {
                            let _ = self.store.revert_mutation(mutation).await;
                        }
                    }
                }
                Ok(())
            }
            Some(_) => Err(OperationError::WriteWriteConflict),
        }
    }

    pub async fn get(&self, doc: DocId) -> Result<TxnDocument, OperationError> {
        self.check_expiry()?;
        let stored = self.store.get(&doc).await?;
        if let Some(xattr) = &stored.txn_xattr {
            if xattr.attempt_id != self.attempt_id {
                self.resolve_conflict(xattr).await?;
                let stored = self.store.get(&doc).await?;
                return Ok(TxnDocument {
                    doc,
                    cas: stored.cas,
                    content: stored.content,
                });
            }
        }
        Ok(TxnDocument {
            doc,
            cas: stored.cas,
            content: stored.content,
        })
    }

    /// Read `docs` concurrently. The engine defines no cross-document
    /// ordering guarantee for this call beyond per-document staleness
    /// detection via each CAS -- the one operation allowed to run outside
    /// program order.
    pub async fn get_multi(
        &self,
        docs: Vec<DocId>,
    ) -> Result<Vec<Option<TxnDocument>>, OperationError> {
        self.check_expiry()?;
        let futures = docs.into_iter().map(|doc| async move {
            match self.get(doc).await {
                Ok(found) => Ok(Some(found)),
                Err(OperationError::Store(StoreError::NotFound)) => Ok(None),
                Err(other) => Err(other),
            }
        });
        futures::future::try_join_all(futures).await
    }

    pub async fn insert(
        &self,
        doc: DocId,
        content: serde_json::Value,
    ) -> Result<TxnDocument, OperationError> {
        self.check_expiry()?;
        let atr = self.ensure_atr(&doc).await?;
        let xattr = TransactionalXattr {
            transaction_id: self.transaction_id.clone(),
            attempt_id: self.attempt_id.clone(),
            atr,
            operation: StagedOpKind::Insert,
            staged_content: Some(content.clone()),
        };
        let cas = self.store.stage_mutation(&doc, &xattr, None).await?;
        self.append_staged(StagedMutation {
            doc: doc.clone(),
            kind: StagedOpKind::Insert,
            staged_content: Some(content.clone()),
            cas,
        })
        .await?;
        Ok(TxnDocument { doc, cas, content })
    }

    pub async fn replace(
        &self,
        existing: &TxnDocument,
        content: serde_json::Value,
    ) -> Result<TxnDocument, OperationError> {
        self.check_expiry()?;
        let atr = self.ensure_atr(&existing.doc).await?;
        let xattr = TransactionalXattr {
            transaction_id: self.transaction_id.clone(),
            attempt_id: self.attempt_id.clone(),
            atr,
            operation: StagedOpKind::Replace,
            staged_content: Some(content.clone()),
        };
        let cas = self
            .store
            .stage_mutation(&existing.doc, &xattr, Some(existing.cas))
            .await?;
        self.append_staged(StagedMutation {
            doc: existing.doc.clone(),
            kind: StagedOpKind::Replace,
            staged_content: Some(content.clone()),
            cas,
        })
        .await?;
        Ok(TxnDocument {
            doc: existing.doc.clone(),
            cas,
            content,
        })
    }

    pub async fn remove(&self, existing: &TxnDocument) -> Result<(), OperationError> {
        self.check_expiry()?;
        let atr = self.ensure_atr(&existing.doc).await?;
        let xattr = TransactionalXattr {
            transaction_id: self.transaction_id.clone(),
            attempt_id: self.attempt_id.clone(),
            atr,
            operation: StagedOpKind::Remove,
            staged_content: None,
        };
        let cas = self
            .store
            .stage_mutation(&existing.doc, &xattr, Some(existing.cas))
            .await?;
        self.append_staged(StagedMutation {
            doc: existing.doc.clone(),
            kind: StagedOpKind::Remove,
            staged_content: None,
            cas,
        })
        .await
    }

    pub async fn query(&self, statement: &str) -> Result<serde_json::Value, OperationError> {
        self.check_expiry()?;
        let remaining = self
            .config
            .expiration
            .saturating_sub(Duration::from_nanos(
                now_ns().saturating_sub(self.start_ns) as u64,
            ));
        self.store
            .query(statement, &self.transaction_id, remaining)
            .await
            .map_err(OperationError::from)
    }

    /// Commit every staged mutation: ATR `Pending → Committed`, unstage
    /// each document (with durability), ATR `Committed → Completed`.
    ///
    /// A failure writing the `Committed` ATR entry is ambiguous: the CAS'd
    /// write may or may not have reached the server, so whether the
    /// transaction committed at all is unknown. A failure afterward --
    /// unstaging a document, or writing `Completed` -- happens once the ATR
    /// has already durably recorded the attempt as committed, so the
    /// transaction's outcome is certain and only a post-commit bookkeeping
    /// step failed.
    pub(crate) async fn commit(&self) -> Result<(), CommitOutcome> {
        let atr = match self.atr.lock().await.clone() {
            Some(atr) => atr,
            None => return Ok(()),
        };
        *self.state.lock().await = AttemptState::Committing;
        let staged = self.staged.lock().await.clone();
        let mut entry = AtrEntry {
            attempt_id: self.attempt_id.clone(),
            transaction_id: self.transaction_id.clone(),
            state: AtrState::Committed,
            start_ns: self.start_ns,
            expires_after_ms: self.config.expiration.as_millis() as u64,
            staged_mutations: staged.clone(),
        };
        self.store
            .update_atr_entry(&atr, &entry)
            .await
            .map_err(CommitOutcome::Ambiguous)?;

        *self.state.lock().await = AttemptState::Unstaging;
        for mutation in &staged {
            self.store
                .unstage_mutation(mutation)
                .await
                .map_err(CommitOutcome::FailedPostCommit)?;
        }

        entry.state = AtrState::Completed;
        self.store
            .update_atr_entry(&atr, &entry)
            .await
            .map_err(CommitOutcome::FailedPostCommit)?;
        *self.state.lock().await = AttemptState::Completed;
        Ok(())
    }

    /// Roll back every staged mutation: ATR `Pending → Aborted`, revert
    /// each staged document, ATR `Aborted → RolledBack`.
    pub(crate) async fn rollback(&self) -> Result<(), StoreError> {
        let atr = match self.atr.lock().await.clone() {
            Some(atr) => atr,
            None => {
                *self.state.lock().await = AttemptState::RolledBack;
                return Ok(());
            }
        };
        *self.state.lock().await = AttemptState::Aborted;
        let staged = self.staged.lock().await.clone();
        let mut entry = AtrEntry {
            attempt_id: self.attempt_id.clone(),
            transaction_id: self.transaction_id.clone(),
            state: AtrState::Aborted,
            start_ns: self.start_ns,
            expires_after_ms: self.config.expiration.as_millis() as u64,
            staged_mutations: staged.clone(),
        };
        self.store.update_atr_entry(&atr, &entry).await?;

        *self.state.lock().await = AttemptState::RollingBack;
        for mutation in &staged {
            self.store.revert_mutation(mutation).await?;
        }

        entry.state = AtrState::RolledBack;
        self.store.update_atr_entry(&atr, &entry).await?;
        *self.state.lock().await = AttemptState::RolledBack;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeStore;

    fn config() -> TransactionConfig {
        TransactionConfig {
            expiration: Duration::from_secs(15),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn insert_then_commit_is_visible() {
        let store = Arc::new(FakeStore::new());
        let ctx = AttemptContext::new(store.clone(), config(), "txn-1".to_string());
        let doc = DocId::new("b", "_default", "_default", "k1");
        ctx.insert(doc.clone(), serde_json::json!({"v": 1})).await.unwrap();
        ctx.commit().await.unwrap();
        let content = store.committed_content(&doc).unwrap();
        assert_eq!(content, serde_json::json!({"v": 1}));
    }

    #[tokio::test]
    async fn insert_then_rollback_leaves_no_document() {
        let store = Arc::new(FakeStore::new());
        let ctx = AttemptContext::new(store.clone(), config(), "txn-2".to_string());
        let doc = DocId::new("b", "_default", "_default", "k2");
        ctx.insert(doc.clone(), serde_json::json!({"v": 1})).await.unwrap();
        ctx.rollback().await.unwrap();
        assert!(store.committed_content(&doc).is_none());
    }

    #[tokio::test]
    async fn concurrent_attempt_on_same_document_conflicts() {
        let store = Arc::new(FakeStore::new());
        let doc = DocId::new("b", "_default", "_default", "k3");
        store.seed(doc.clone(), serde_json::json!({"v": 0}));

        let first = AttemptContext::new(store.clone(), config(), "txn-3".to_string());
        let got = first.get(doc.clone()).await.unwrap();
        first.replace(&got, serde_json::json!({"v": 1})).await.unwrap();

        let second = AttemptContext::new(store.clone(), config(), "txn-4".to_string());
        let err = second.get(doc.clone()).await.unwrap_err();
        assert!(matches!(err, OperationError::WriteWriteConflict));
    }

    #[tokio::test]
    async fn expired_attempt_rejects_new_operations() {
        let mut cfg = config();
        cfg.expiration = Duration::from_nanos(1);
        let store = Arc::new(FakeStore::new());
        let ctx = AttemptContext::new(store, cfg, "txn-5".to_string());
        tokio::time::sleep(Duration::from_millis(5)).await;
        let err = ctx
            .insert(
                DocId::new("b", "_default", "_default", "k4"),
                serde_json::json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::Expired));
    }
}
