use crate::attempt::{AttemptContext, OperationError};
use crate::error::TransactionError;
use crate::model::{TransactionConfig, MAX_EXPIRATION};
use crate::store::DocumentStore;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Owns a [`DocumentStore`] and drives `run`'s attempt-retry loop: each call
/// resolves to success, `transaction_failed`, `transaction_expired`,
/// `transaction_commit_ambiguous`, or `transaction_failed_post_commit`.
///
/// Unlike `waypoint_retry::drive`, which retries a single request
/// classified into an `Outcome`, a transaction attempt is a whole sequence
/// of operations that must be rolled back and replayed from scratch on
/// conflict -- so this loop is its own, smaller sibling rather than reusing
/// `drive` directly. The overall deadline is fixed at the first attempt's
/// start, not reset per retry, so repeated conflicts cannot extend a
/// transaction's wall-clock budget past its configured expiration.
pub struct Transactions<S: DocumentStore> {
    store: Arc<S>,
}

impl<S: DocumentStore> Transactions<S> {
    pub fn new(store: Arc<S>) -> Self {
        Transactions { store }
    }

    pub async fn run<F, Fut, T>(
        &self,
        mut config: TransactionConfig,
        mut logic: F,
    ) -> Result<T, TransactionError>
    where
        F: FnMut(Arc<AttemptContext<S>>) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        if config.expiration > MAX_EXPIRATION {
            tracing::warn!(
                requested = ?config.expiration,
                max = ?MAX_EXPIRATION,
                "clamping transaction expiration to the maximum"
            );
            config.expiration = MAX_EXPIRATION;
        }
        let transaction_id = uuid::Uuid::new_v4().to_string();
        let deadline = Instant::now() + config.expiration + Duration::from_millis(500);

        loop {
            if Instant::now() >= deadline {
                return Err(TransactionError::Expired);
            }

            let ctx = Arc::new(AttemptContext::new(
                self.store.clone(),
                config.clone(),
                transaction_id.clone(),
            ));

            match logic(ctx.clone()).await {
                Ok(value) => match ctx.commit().await {
                    Ok(()) => return Ok(value),
                    Err(crate::attempt::CommitOutcome::Ambiguous(store_err)) => {
                        tracing::error!(
                            transaction_id = %transaction_id,
                            attempt_id = %ctx.attempt_id(),
                            error = %store_err,
                            "commit outcome unknown"
                        );
                        return Err(TransactionError::CommitAmbiguous(store_err));
                    }
                    Err(crate::attempt::CommitOutcome::FailedPostCommit(store_err)) => {
                        tracing::error!(
                            transaction_id = %transaction_id,
                            attempt_id = %ctx.attempt_id(),
                            error = %store_err,
                            "transaction committed but a post-commit step failed"
                        );
                        return Err(TransactionError::FailedPostCommit(store_err));
                    }
                },
                Err(OperationError::Expired) => {
                    let _ = ctx.rollback().await;
                    return Err(TransactionError::Expired);
                }
                Err(OperationError::WriteWriteConflict) => {
                    tracing::warn!(
                        transaction_id = %transaction_id,
                        attempt_id = %ctx.attempt_id(),
                        "write-write conflict, retrying whole transaction"
                    );
                    let _ = ctx.rollback().await;
                    continue;
                }
                Err(OperationError::Store(store_err)) => {
                    let _ = ctx.rollback().await;
                    if !store_err.requires_rollback() {
                        tracing::debug!(
                            transaction_id = %transaction_id,
                            attempt_id = %ctx.attempt_id(),
                            error = %store_err,
                            "transient store error, retrying whole transaction"
                        );
                        continue;
                    }
                    return Err(TransactionError::Failed(store_err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DocId;
    use crate::test_support::FakeStore;

    #[tokio::test]
    async fn run_commits_a_single_insert() {
        let store = Arc::new(FakeStore::new());
        let txns = Transactions::new(store.clone());
        let doc = DocId::new("b", "_default", "_default", "k1");

        let result = txns
            .run(TransactionConfig::default(), {
                let doc = doc.clone();
                move |ctx| {
                    let doc = doc.clone();
                    async move {
                        ctx.insert(doc, serde_json::json!({"v": 1})).await?;
                        Ok::<_, OperationError>(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(
            store.committed_content(&doc).unwrap(),
            serde_json::json!({"v": 1})
        );
    }

    #[tokio::test]
    async fn run_rolls_back_on_store_error() {
        let store = Arc::new(FakeStore::new());
        let txns = Transactions::new(store.clone());
        let doc = DocId::new("b", "_default", "_default", "k2");
        store.seed(doc.clone(), serde_json::json!({"v": 0}));

        let result: Result<(), TransactionError> = txns
            .run(TransactionConfig::default(), {
                let doc = doc.clone();
                move |ctx| {
                    let doc = doc.clone();
                    async move {
                        let got = ctx.get(doc.clone()).await?;
                        ctx.replace(&got, serde_json::json!({"v": 1})).await?;
                        Err(OperationError::Store(crate::error::StoreError::Query(
                            "forced failure".to_string(),
                        )))
                    }
                }
            })
            .await;

        assert!(matches!(result, Err(TransactionError::Failed(_))));
        assert_eq!(
            store.committed_content(&doc).unwrap(),
            serde_json::json!({"v": 0})
        );
    }
}
