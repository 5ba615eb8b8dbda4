use crate::bucket::BucketHandle;
use crate::cluster::Cluster;
use crate::model::{Cas, DocumentId, EncodedValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use waypoint_txn::{
    AtrEntry, Cas as TxnCas, DocId, StagedMutation, StagedOpKind, StoreError, StoredDocument,
    TransactionalXattr,
};

/// [`waypoint_txn::DocumentStore`] over the live KV layer. Real extended
/// attributes and subdoc multi-mutation packets are a substantial wire
/// surface of their own (see `waypoint-wire/src/header.rs`'s note that
/// per-opcode encoders are an external collaborator); this adapter instead
/// wraps every document's body in a small JSON envelope carrying the
/// transactional xattr alongside the real content, so staged documents are
/// visible to a plain `get` (a real core would hide them) -- a deliberate
/// simplification recorded in DESIGN.md.
pub struct WireDocumentStore {
    cluster: Arc<Cluster>,
}

impl WireDocumentStore {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        WireDocumentStore { cluster }
    }

    async fn bucket(&self, name: &str) -> Result<Arc<BucketHandle>, StoreError> {
        self.cluster
            .bucket(name)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))
    }

    async fn load_atr(&self, atr: &DocId) -> Result<(Vec<AtrEntry>, Option<Cas>), StoreError> {
        let bucket = self.bucket(&atr.bucket).await?;
        let kv_doc = to_document_id(atr);
        match bucket.get(&kv_doc).await {
            Ok((value, cas)) => {
                let doc: AtrDocument = serde_json::from_slice(&value.bytes).map_err(json_err)?;
                Ok((doc.entries, Some(cas)))
            }
            Err(crate::Error::UnexpectedStatus(waypoint_wire::Status::KeyNotFound)) => {
                Ok((Vec::new(), None))
            }
            Err(other) => Err(store_err(other, StoreError::CasMismatch)),
        }
    }

    async fn mutate_atr(
        &self,
        atr: &DocId,
        mut apply: impl FnMut(&mut Vec<AtrEntry>) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let bucket = self.bucket(&atr.bucket).await?;
        let kv_doc = to_document_id(atr);

        for _ in 0..8 {
            let (mut entries, cas) = self.load_atr(atr).await?;
            apply(&mut entries)?;
            let bytes = serde_json::to_vec(&AtrDocument { entries }).map_err(json_err)?;
            let result = match cas {
                Some(cas) => bucket.replace(&kv_doc, EncodedValue::json(bytes.into()), cas).await,
                None => bucket.insert(&kv_doc, EncodedValue::json(bytes.into())).await,
            };
            match result {
                Ok((_cas, _token)) => return Ok(()),
                Err(crate::Error::UnexpectedStatus(waypoint_wire::Status::KeyExists)) => continue,
                Err(other) => return Err(store_err(other, StoreError::CasMismatch)),
            }
        }
        Err(StoreError::CasMismatch)
    }
}

#[async_trait::async_trait]
impl waypoint_txn::DocumentStore for WireDocumentStore {
    async fn get(&self, doc: &DocId) -> Result<StoredDocument, StoreError> {
        let bucket = self.bucket(&doc.bucket).await?;
        let kv_doc = to_document_id(doc);
        let (value, cas) = bucket
            .get(&kv_doc)
            .await
            .map_err(|e| store_err(e, StoreError::CasMismatch))?;
        let envelope: Envelope = serde_json::from_slice(&value.bytes).map_err(json_err)?;
        let content = envelope.content.ok_or(StoreError::NotFound)?;
        Ok(StoredDocument {
            content,
            cas: TxnCas(cas.0),
            txn_xattr: envelope.txn.map(StoredXattr::into_xattr),
        })
    }

    async fn get_atr_entry(
        &self,
        atr: &DocId,
        attempt_id: &str,
    ) -> Result<Option<AtrEntry>, StoreError> {
        let (entries, _) = self.load_atr(atr).await?;
        Ok(entries.into_iter().find(|e| e.attempt_id == attempt_id))
    }

    async fn list_atr_entries(&self, atr: &DocId) -> Result<Vec<AtrEntry>, StoreError> {
        let (entries, _) = self.load_atr(atr).await?;
        Ok(entries)
    }

    async fn insert_atr_entry(&self, atr: &DocId, entry: &AtrEntry) -> Result<(), StoreError> {
        let entry = entry.clone();
        self.mutate_atr(atr, move |entries| {
            if entries.iter().any(|e| e.attempt_id == entry.attempt_id) {
                return Err(StoreError::AlreadyExists);
            }
            entries.push(entry.clone());
            Ok(())
        })
        .await
    }

    async fn update_atr_entry(&self, atr: &DocId, entry: &AtrEntry) -> Result<(), StoreError> {
        let entry = entry.clone();
        self.mutate_atr(atr, move |entries| {
            let slot = entries
                .iter_mut()
                .find(|e| e.attempt_id == entry.attempt_id)
                .ok_or(StoreError::NotFound)?;
            *slot = entry.clone();
            Ok(())
        })
        .await
    }

    async fn stage_mutation(
        &self,
        doc: &DocId,
        xattr: &TransactionalXattr,
        expected_cas: Option<TxnCas>,
    ) -> Result<TxnCas, StoreError> {
        let bucket = self.bucket(&doc.bucket).await?;
        let kv_doc = to_document_id(doc);
        let stored_xattr = StoredXattr::from_xattr(xattr);

        match expected_cas {
            None => {
                let envelope = Envelope {
                    content: None,
                    txn: Some(stored_xattr),
                };
                let bytes = serde_json::to_vec(&envelope).map_err(json_err)?;
                let (cas, _token) = bucket
                    .insert(&kv_doc, EncodedValue::json(bytes.into()))
                    .await
                    .map_err(|e| store_err(e, StoreError::AlreadyExists))?;
                Ok(TxnCas(cas.0))
            }
            Some(expected) => {
                let (current, live_cas) = bucket
                    .get(&kv_doc)
                    .await
                    .map_err(|e| store_err(e, StoreError::CasMismatch))?;
                if live_cas.0 != expected.0 {
                    return Err(StoreError::CasMismatch);
                }
                let current: Envelope = serde_json::from_slice(&current.bytes).map_err(json_err)?;
                let envelope = Envelope {
                    content: current.content,
                    txn: Some(stored_xattr),
                };
                let bytes = serde_json::to_vec(&envelope).map_err(json_err)?;
                let (cas, _token) = bucket
                    .replace(&kv_doc, EncodedValue::json(bytes.into()), live_cas)
                    .await
                    .map_err(|e| store_err(e, StoreError::CasMismatch))?;
                Ok(TxnCas(cas.0))
            }
        }
    }

    async fn unstage_mutation(&self, mutation: &StagedMutation) -> Result<(), StoreError> {
        let bucket = self.bucket(&mutation.doc.bucket).await?;
        let kv_doc = to_document_id(&mutation.doc);
        let (_, live_cas) = bucket
            .get(&kv_doc)
            .await
            .map_err(|e| store_err(e, StoreError::CasMismatch))?;

        match mutation.kind {
            StagedOpKind::Remove => {
                bucket
                    .remove(&kv_doc, live_cas)
                    .await
                    .map_err(|e| store_err(e, StoreError::CasMismatch))?;
            }
            StagedOpKind::Insert | StagedOpKind::Replace => {
                let envelope = Envelope {
                    content: mutation.staged_content.clone(),
                    txn: None,
                };
                let bytes = serde_json::to_vec(&envelope).map_err(json_err)?;
                bucket
                    .replace(&kv_doc, EncodedValue::json(bytes.into()), live_cas)
                    .await
                    .map_err(|e| store_err(e, StoreError::CasMismatch))?;
            }
        }
        Ok(())
    }

    async fn revert_mutation(&self, mutation: &StagedMutation) -> Result<(), StoreError> {
        let bucket = self.bucket(&mutation.doc.bucket).await?;
        let kv_doc = to_document_id(&mutation.doc);

        match mutation.kind {
            StagedOpKind::Insert => match bucket.get(&kv_doc).await {
                Ok((_, live_cas)) => {
                    bucket
                        .remove(&kv_doc, live_cas)
                        .await
                        .map_err(|e| store_err(e, StoreError::CasMismatch))?;
                }
                Err(crate::Error::UnexpectedStatus(waypoint_wire::Status::KeyNotFound)) => {}
                Err(other) => return Err(store_err(other, StoreError::CasMismatch)),
            },
            StagedOpKind::Replace | StagedOpKind::Remove => {
                let (current, live_cas) = bucket
                    .get(&kv_doc)
                    .await
                    .map_err(|e| store_err(e, StoreError::CasMismatch))?;
                let mut envelope: Envelope =
                    serde_json::from_slice(&current.bytes).map_err(json_err)?;
                envelope.txn = None;
                let bytes = serde_json::to_vec(&envelope).map_err(json_err)?;
                bucket
                    .replace(&kv_doc, EncodedValue::json(bytes.into()), live_cas)
                    .await
                    .map_err(|e| store_err(e, StoreError::CasMismatch))?;
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        statement: &str,
        txid: &str,
        txtimeout: Duration,
    ) -> Result<serde_json::Value, StoreError> {
        self.cluster
            .query_in_transaction(statement, txid, txtimeout)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }
}

#[derive(Serialize, Deserialize, Default)]
struct AtrDocument {
    entries: Vec<AtrEntry>,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    content: Option<serde_json::Value>,
    txn: Option<StoredXattr>,
}

#[derive(Serialize, Deserialize, Clone)]
struct StoredXattr {
    transaction_id: String,
    attempt_id: String,
    atr: DocId,
    operation: StagedOpKind,
    staged_content: Option<serde_json::Value>,
}

impl StoredXattr {
    fn from_xattr(xattr: &TransactionalXattr) -> Self {
        StoredXattr {
            transaction_id: xattr.transaction_id.clone(),
            attempt_id: xattr.attempt_id.clone(),
            atr: xattr.atr.clone(),
            operation: xattr.operation,
            staged_content: xattr.staged_content.clone(),
        }
    }

    fn into_xattr(self) -> TransactionalXattr {
        TransactionalXattr {
            transaction_id: self.transaction_id,
            attempt_id: self.attempt_id,
            atr: self.atr,
            operation: self.operation,
            staged_content: self.staged_content,
        }
    }
}

fn to_document_id(doc: &DocId) -> DocumentId {
    DocumentId::in_collection(
        doc.bucket.clone(),
        doc.scope.clone(),
        doc.collection.clone(),
        doc.key.clone(),
    )
}

fn store_err(err: crate::Error, conflict_for_key_exists: StoreError) -> StoreError {
    match err {
        crate::Error::UnexpectedStatus(waypoint_wire::Status::KeyNotFound) => StoreError::NotFound,
        crate::Error::UnexpectedStatus(waypoint_wire::Status::KeyExists) => {
            conflict_for_key_exists
        }
        crate::Error::UnexpectedStatus(waypoint_wire::Status::Locked) => StoreError::Locked,
        other => StoreError::Transport(other.to_string()),
    }
}

fn json_err(err: serde_json::Error) -> StoreError {
    StoreError::Transport(err.to_string())
}
