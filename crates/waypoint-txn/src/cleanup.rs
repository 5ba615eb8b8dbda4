use crate::error::StoreError;
use crate::model::{AtrState, DocId, TransactionConfig};
use crate::store::DocumentStore;
use std::sync::Arc;
use std::time::Duration;

fn now_ns() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Background loop owned by the cluster handle: periodically scans
/// every ATR shard in the metadata collection and, for any entry past its
/// expiry, rolls it forward (state `Committed`) or back (`Pending`/
/// `Aborted`) exactly as the original attempt would have. Idempotent --
/// running it concurrently from multiple clients against the same entry is
/// safe, the loser just sees its own `update_atr_entry` overwritten or a
/// mutation already reverted.
pub struct LostTransactionsCleanup<S: DocumentStore> {
    store: Arc<S>,
    config: TransactionConfig,
}

impl<S: DocumentStore> LostTransactionsCleanup<S> {
    pub fn new(store: Arc<S>, config: TransactionConfig) -> Self {
        LostTransactionsCleanup { store, config }
    }

    fn atr_for_shard(&self, shard: u32) -> DocId {
        let meta = &self.config.metadata_collection;
        DocId::new(
            meta.bucket.clone(),
            meta.scope.clone(),
            meta.collection.clone(),
            format!("_txn:atr-{:04}", shard),
        )
    }

    /// Scan every shard once, returning the number of entries cleaned up.
    pub async fn run_once(&self) -> Result<usize, StoreError> {
        if !self.config.cleanup_lost_attempts_enabled {
            return Ok(0);
        }
        let now = now_ns();
        let mut cleaned = 0;
        for shard in 0..self.config.atr_shards {
            let atr = self.atr_for_shard(shard);
            let entries = match self.store.list_atr_entries(&atr).await {
                Ok(entries) => entries,
                Err(StoreError::NotFound) => continue,
                Err(err) => return Err(err),
            };
            for mut entry in entries {
                if entry.state.is_terminal() || !entry.has_expired(now) {
                    continue;
                }
                match entry.state {
                    AtrState::Committed => {
                        for mutation in &entry.staged_mutations {
                            let _ = self.store.unstage_mutation(mutation).await;
                        }
                        entry.state = AtrState::Completed;
                    }
                    _ => {
                        for mutation in &entry.staged_mutations {
                            let _ = self.store.revert_mutation(mutation).await;
                        }
                        entry.state = AtrState::RolledBack;
                    }
                }
                self.store.update_atr_entry(&atr, &entry).await?;
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    pub fn spawn(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(cleaned) if cleaned > 0 => {
                        tracing::info!(cleaned, "lost-transaction cleanup pass completed")
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(%err, "lost-transaction cleanup pass failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AtrEntry, Cas, DocId as D, StagedMutation, StagedOpKind};
    use crate::test_support::FakeStore;

    #[tokio::test]
    async fn rolls_forward_an_expired_committed_entry() {
        let store = Arc::new(FakeStore::new());
        let config = TransactionConfig {
            atr_shards: 4,
            ..Default::default()
        };
        let cleanup = LostTransactionsCleanup::new(store.clone(), config.clone());

        let doc = D::new("b", "_default", "_default", "orphan");
        store.seed(doc.clone(), serde_json::json!({"v": 0}));
        let atr = cleanup.atr_for_shard(0);
        let entry = AtrEntry {
            attempt_id: "lost-1".to_string(),
            transaction_id: "txn-lost".to_string(),
            state: AtrState::Committed,
            start_ns: 0,
            expires_after_ms: 1,
            staged_mutations: vec![StagedMutation {
                doc: doc.clone(),
                kind: StagedOpKind::Replace,
                staged_content: Some(serde_json::json!({"v": 1})),
                cas: Cas(1),
            }],
        };
        store.insert_atr_entry(&atr, &entry).await.unwrap();

        let cleaned = cleanup.run_once().await.unwrap();
        assert_eq!(cleaned, 1);
        assert_eq!(
            store.committed_content(&doc).unwrap(),
            serde_json::json!({"v": 1})
        );
    }

    #[tokio::test]
    async fn leaves_unexpired_entries_alone() {
        let store = Arc::new(FakeStore::new());
        let config = TransactionConfig {
            atr_shards: 4,
            ..Default::default()
        };
        let cleanup = LostTransactionsCleanup::new(store.clone(), config);
        let atr = cleanup.atr_for_shard(0);
        let entry = AtrEntry {
            attempt_id: "alive-1".to_string(),
            transaction_id: "txn-alive".to_string(),
            state: AtrState::Pending,
            start_ns: now_ns(),
            expires_after_ms: 60_000,
            staged_mutations: vec![],
        };
        store.insert_atr_entry(&atr, &entry).await.unwrap();

        assert_eq!(cleanup.run_once().await.unwrap(), 0);
    }
}
