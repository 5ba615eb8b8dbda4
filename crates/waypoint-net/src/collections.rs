use crate::session::Session;
use crate::Error;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use waypoint_wire::{DataType, Frame, FramingExtras, Magic, Opcode, Status};

/// Per-bucket `(scope, collection) -> collection_uid` cache, tagged with the
/// manifest uid it was resolved against. Resolution issues `GET_COLLECTION_ID`
/// on any READY session for the bucket; the cache is invalidated wholesale
/// when a KV response reports `unknown_collection` with a manifest uid newer
/// than the one currently held.
pub struct CollectionsResolver {
    manifest_uid: AtomicU64,
    cache: Mutex<HashMap<(String, String), u32>>,
}

impl CollectionsResolver {
    pub fn new() -> Self {
        CollectionsResolver {
            manifest_uid: AtomicU64::new(0),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// A cached id for `(scope, collection)`, if any. Entries are never
    /// individually stale: the whole cache is cleared on invalidation
    /// instead, so a hit here is always valid for the currently held
    /// manifest uid.
    pub fn cached(&self, scope: &str, collection: &str) -> Option<u32> {
        self.cache
            .lock()
            .unwrap()
            .get(&(scope.to_string(), collection.to_string()))
            .copied()
    }

    pub fn manifest_uid(&self) -> u64 {
        self.manifest_uid.load(Ordering::Acquire)
    }

    /// Resolve `(scope, collection)` to a numeric id, consulting the cache
    /// first and otherwise issuing `GET_COLLECTION_ID` on `session`.
    #[tracing::instrument(skip(self, session))]
    pub async fn resolve(
        &self,
        session: &Session,
        scope: &str,
        collection: &str,
        timeout: Duration,
    ) -> Result<u32, Error> {
        if let Some(id) = self.cached(scope, collection) {
            return Ok(id);
        }

        let path = format!("{scope}.{collection}");
        let frame = Frame {
            magic: Magic::Request,
            opcode: Opcode::GetCollectionId,
            data_type: DataType::empty(),
            vbucket_or_status: 0,
            opaque: 0,
            cas: 0,
            framing_extras: FramingExtras::default(),
            extras: Bytes::new(),
            key: Bytes::copy_from_slice(path.as_bytes()),
            value: Bytes::new(),
        };
        let response = session.send(frame, timeout).await?;

        match response.status() {
            Status::Success => {
                // Extras: 8-byte manifest uid, 4-byte collection id.
                if response.extras.len() < 12 {
                    return Err(Error::MalformedCollectionResponse);
                }
                let manifest_uid = u64::from_be_bytes(response.extras[0..8].try_into().unwrap());
                let collection_id = u32::from_be_bytes(response.extras[8..12].try_into().unwrap());
                self.observe_manifest_uid(manifest_uid);
                self.cache
                    .lock()
                    .unwrap()
                    .insert((scope.to_string(), collection.to_string()), collection_id);
                Ok(collection_id)
            }
            _ => Err(Error::CollectionNotFound {
                scope: scope.to_string(),
                collection: collection.to_string(),
            }),
        }
    }

    /// Called when a KV response reports `unknown_collection` carrying
    /// `new_uid`. Clears every cache entry for this bucket if `new_uid` is
    /// strictly newer than the held manifest uid; returns whether it did.
    pub fn invalidate_if_outdated(&self, new_uid: u64) -> bool {
        let current = self.manifest_uid.load(Ordering::Acquire);
        if new_uid > current {
            self.manifest_uid.store(new_uid, Ordering::Release);
            self.cache.lock().unwrap().clear();
            tracing::debug!(new_uid, "collections cache invalidated by newer manifest uid");
            true
        } else {
            false
        }
    }

    fn observe_manifest_uid(&self, uid: u64) {
        let mut current = self.manifest_uid.load(Ordering::Acquire);
        while uid > current {
            match self.manifest_uid.compare_exchange_weak(
                current,
                uid,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for CollectionsResolver {
    fn default() -> Self {
        CollectionsResolver::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_starts_empty_and_manifest_uid_starts_at_zero() {
        let resolver = CollectionsResolver::new();
        assert_eq!(resolver.cached("_default", "_default"), None);
        assert_eq!(resolver.manifest_uid(), 0);
    }

    #[test]
    fn invalidation_only_clears_on_strictly_newer_uid() {
        let resolver = CollectionsResolver::new();
        resolver.observe_manifest_uid(5);
        resolver
            .cache
            .lock()
            .unwrap()
            .insert(("_default".into(), "widgets".into()), 9);

        assert!(!resolver.invalidate_if_outdated(5));
        assert_eq!(resolver.cached("_default", "widgets"), Some(9));

        assert!(resolver.invalidate_if_outdated(6));
        assert_eq!(resolver.cached("_default", "widgets"), None);
        assert_eq!(resolver.manifest_uid(), 6);
    }
}
