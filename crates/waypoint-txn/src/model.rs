use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A document's coordinates within a cluster. Deliberately a local copy
/// rather than a re-export of the top-level crate's public document type:
/// this crate has no dependency on `waypoint-net`/`waypoint-http`, and is
/// driven entirely through the [`crate::store::DocumentStore`] capability
/// interface, so it only needs the fields it actually reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocId {
    pub bucket: String,
    pub scope: String,
    pub collection: String,
    pub key: String,
}

impl DocId {
    pub fn new(
        bucket: impl Into<String>,
        scope: impl Into<String>,
        collection: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        DocId {
            bucket: bucket.into(),
            scope: scope.into(),
            collection: collection.into(),
            key: key.into(),
        }
    }
}

/// Opaque CAS token, compared for equality only. Zero means unset, matching
/// the wire-level convention the KV protocol uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cas(pub u64);

/// The kind of mutation staged against a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StagedOpKind {
    Insert,
    Replace,
    Remove,
}

/// One entry in an ATR's `staged_mutations` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedMutation {
    pub doc: DocId,
    pub kind: StagedOpKind,
    /// Content staged under the document's transactional xattr. Absent for
    /// `Remove`.
    pub staged_content: Option<serde_json::Value>,
    /// CAS observed on the live document when this mutation was staged,
    /// used to detect a write-write race at commit/rollback time.
    pub cas: Cas,
}

/// State of one attempt's active-transaction-record entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtrState {
    Pending,
    Committed,
    Completed,
    Aborted,
    RolledBack,
}

impl AtrState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AtrState::Completed | AtrState::RolledBack)
    }
}

/// The designated-collection document holding every in-flight attempt's
/// entry for one ATR keyspace shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtrEntry {
    pub attempt_id: String,
    pub transaction_id: String,
    pub state: AtrState,
    pub start_ns: u128,
    pub expires_after_ms: u64,
    pub staged_mutations: Vec<StagedMutation>,
}

impl AtrEntry {
    pub fn has_expired(&self, now_ns: u128) -> bool {
        let expires_after = self.expires_after_ms as u128 * 1_000_000;
        now_ns.saturating_sub(self.start_ns) > expires_after
    }
}

/// An attempt's own state machine position within the transaction engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptState {
    NotStarted,
    Started,
    Committing,
    Unstaging,
    Completed,
    Aborted,
    RollingBack,
    RolledBack,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptState::Completed | AttemptState::RolledBack)
    }
}

/// Durability level requested for ATR writes and unstaged mutations. A local
/// copy of `waypoint_wire::DurabilityLevel`'s variants, kept separate so
/// this crate does not depend on the wire crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DurabilityLevel {
    #[default]
    Majority,
    MajorityAndPersistToActive,
    PersistToMajority,
    None,
}

/// Per-transaction configuration, applied to every attempt it runs.
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    pub durability: DurabilityLevel,
    pub expiration: Duration,
    pub metadata_collection: DocId,
    pub atr_shards: u32,
    pub cleanup_enabled: bool,
    pub cleanup_lost_attempts_enabled: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        TransactionConfig {
            durability: DurabilityLevel::Majority,
            expiration: Duration::from_secs(15),
            metadata_collection: DocId::new("default", "_default", "_default", ""),
            atr_shards: 1024,
            cleanup_enabled: true,
            cleanup_lost_attempts_enabled: true,
        }
    }
}

pub const MAX_EXPIRATION: Duration = Duration::from_secs(120);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atr_state_terminality() {
        assert!(!AtrState::Pending.is_terminal());
        assert!(!AtrState::Committed.is_terminal());
        assert!(!AtrState::Aborted.is_terminal());
        assert!(AtrState::Completed.is_terminal());
        assert!(AtrState::RolledBack.is_terminal());
    }

    #[test]
    fn entry_expiry_is_relative_to_start() {
        let entry = AtrEntry {
            attempt_id: "a".to_string(),
            transaction_id: "t".to_string(),
            state: AtrState::Pending,
            start_ns: 1_000_000_000,
            expires_after_ms: 10,
            staged_mutations: vec![],
        };
        assert!(!entry.has_expired(1_000_000_000 + 5_000_000));
        assert!(entry.has_expired(1_000_000_000 + 20_000_000));
    }
}
