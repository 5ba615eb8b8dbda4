//! In-process [`DocumentStore`] fake used by this crate's own unit tests.
//! Not a mock of any particular server behavior -- just enough bookkeeping
//! to exercise staging, commit, rollback, and conflict resolution without a
//! live cluster.

use crate::error::StoreError;
use crate::model::{AtrEntry, Cas, DocId, StagedMutation, StagedOpKind};
use crate::store::{DocumentStore, StoredDocument, TransactionalXattr};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

struct Entry {
    content: serde_json::Value,
    cas: Cas,
    visible: bool,
    xattr: Option<TransactionalXattr>,
}

pub struct FakeStore {
    docs: Mutex<HashMap<DocId, Entry>>,
    atrs: Mutex<HashMap<(DocId, String), AtrEntry>>,
    next_cas: Mutex<u64>,
}

impl FakeStore {
    pub fn new() -> Self {
        FakeStore {
            docs: Mutex::new(HashMap::new()),
            atrs: Mutex::new(HashMap::new()),
            next_cas: Mutex::new(1),
        }
    }

    pub fn seed(&self, doc: DocId, content: serde_json::Value) {
        let cas = self.bump_cas();
        self.docs.lock().unwrap().insert(
            doc,
            Entry {
                content,
                cas,
                visible: true,
                xattr: None,
            },
        );
    }

    pub fn committed_content(&self, doc: &DocId) -> Option<serde_json::Value> {
        let docs = self.docs.lock().unwrap();
        docs.get(doc)
            .filter(|entry| entry.visible)
            .map(|entry| entry.content.clone())
    }

    fn bump_cas(&self) -> Cas {
        let mut next = self.next_cas.lock().unwrap();
        let cas = Cas(*next);
        *next += 1;
        cas
    }
}

impl Default for FakeStore {
    fn default() -> Self {
        FakeStore::new()
    }
}

#[async_trait::async_trait]
impl DocumentStore for FakeStore {
    async fn get(&self, doc: &DocId) -> Result<StoredDocument, StoreError> {
        let docs = self.docs.lock().unwrap();
        match docs.get(doc) {
            Some(entry) if entry.visible => Ok(StoredDocument {
                content: entry.content.clone(),
                cas: entry.cas,
                txn_xattr: entry.xattr.clone(),
            }),
            _ => Err(StoreError::NotFound),
        }
    }

    async fn get_atr_entry(
        &self,
        atr: &DocId,
        attempt_id: &str,
    ) -> Result<Option<AtrEntry>, StoreError> {
        let atrs = self.atrs.lock().unwrap();
        Ok(atrs.get(&(atr.clone(), attempt_id.to_string())).cloned())
    }

    async fn list_atr_entries(&self, atr: &DocId) -> Result<Vec<AtrEntry>, StoreError> {
        let atrs = self.atrs.lock().unwrap();
        Ok(atrs
            .iter()
            .filter(|((key, _), _)| key == atr)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn insert_atr_entry(&self, atr: &DocId, entry: &AtrEntry) -> Result<(), StoreError> {
        let mut atrs = self.atrs.lock().unwrap();
        let key = (atr.clone(), entry.attempt_id.clone());
        if atrs.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        atrs.insert(key, entry.clone());
        Ok(())
    }

    async fn update_atr_entry(&self, atr: &DocId, entry: &AtrEntry) -> Result<(), StoreError> {
        let mut atrs = self.atrs.lock().unwrap();
        atrs.insert((atr.clone(), entry.attempt_id.clone()), entry.clone());
        Ok(())
    }

    async fn stage_mutation(
        &self,
        doc: &DocId,
        xattr: &TransactionalXattr,
        expected_cas: Option<Cas>,
    ) -> Result<Cas, StoreError> {
        let mut docs = self.docs.lock().unwrap();
        match expected_cas {
            Some(cas) => {
                let entry = docs.get_mut(doc).ok_or(StoreError::NotFound)?;
                if entry.cas != cas {
                    return Err(StoreError::CasMismatch);
                }
                let new_cas = Cas(cas.0 + 1);
                entry.cas = new_cas;
                entry.xattr = Some(xattr.clone());
                Ok(new_cas)
            }
            None => {
                if docs.get(doc).is_some_and(|entry| entry.visible) {
                    return Err(StoreError::AlreadyExists);
                }
                drop(docs);
                let cas = self.bump_cas();
                let mut docs = self.docs.lock().unwrap();
                docs.insert(
                    doc.clone(),
                    Entry {
                        content: serde_json::Value::Null,
                        cas,
                        visible: false,
                        xattr: Some(xattr.clone()),
                    },
                );
                Ok(cas)
            }
        }
    }

    async fn unstage_mutation(&self, mutation: &StagedMutation) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().unwrap();
        match mutation.kind {
            StagedOpKind::Insert | StagedOpKind::Replace => {
                let content = mutation
                    .staged_content
                    .clone()
                    .ok_or(StoreError::NotFound)?;
                let entry = docs.get_mut(&mutation.doc).ok_or(StoreError::NotFound)?;
                entry.content = content;
                entry.visible = true;
                entry.xattr = None;
            }
            StagedOpKind::Remove => {
                docs.remove(&mutation.doc);
            }
        }
        Ok(())
    }

    async fn revert_mutation(&self, mutation: &StagedMutation) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().unwrap();
        match mutation.kind {
            StagedOpKind::Insert => {
                docs.remove(&mutation.doc);
            }
            StagedOpKind::Replace | StagedOpKind::Remove => {
                if let Some(entry) = docs.get_mut(&mutation.doc) {
                    entry.xattr = None;
                }
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        _statement: &str,
        _txid: &str,
        _txtimeout: Duration,
    ) -> Result<serde_json::Value, StoreError> {
        Ok(serde_json::Value::Null)
    }
}
