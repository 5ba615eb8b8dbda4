/// Username/password pair applied to both the binary protocol and the HTTP
/// services; translated into each sub-crate's own credentials type at the
/// point of use rather than shared as one type across crate boundaries.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Coordinates of one document: bucket, scope, collection, and key. Scope
/// and collection default to `_default`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId {
    pub bucket: String,
    pub scope: String,
    pub collection: String,
    pub key: String,
}

impl DocumentId {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        DocumentId {
            bucket: bucket.into(),
            scope: "_default".to_string(),
            collection: "_default".to_string(),
            key: key.into(),
        }
    }

    pub fn in_collection(
        bucket: impl Into<String>,
        scope: impl Into<String>,
        collection: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        DocumentId {
            bucket: bucket.into(),
            scope: scope.into(),
            collection: collection.into(),
            key: key.into(),
        }
    }
}

/// A 64-bit opaque version token, compared for equality only. Zero means
/// "unset".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cas(pub u64);

/// Produced by the server on a successful mutation; consumed as a
/// durability/consistency input to subsequent reads and queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationToken {
    pub partition_uuid: u64,
    pub sequence_number: u64,
    pub partition_id: u16,
    pub bucket_name: String,
}

/// The top nibble of [`EncodedValue::flags`]'s upper byte: a coarse
/// "common flag" describing how `bytes` should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommonFlag {
    Json,
    Binary,
    String,
    Other(u8),
}

impl CommonFlag {
    fn from_flags(flags: u32) -> CommonFlag {
        match (flags >> 24) & 0x0f {
            0x2 => CommonFlag::Json,
            0x3 => CommonFlag::Binary,
            0x4 => CommonFlag::String,
            other => CommonFlag::Other(other as u8),
        }
    }

    fn into_flags(self) -> u32 {
        let nibble: u32 = match self {
            CommonFlag::Json => 0x2,
            CommonFlag::Binary => 0x3,
            CommonFlag::String => 0x4,
            CommonFlag::Other(raw) => raw as u32,
        };
        nibble << 24
    }
}

/// Raw bytes plus the 32-bit flags word surfaced on every successful
/// retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedValue {
    pub bytes: bytes::Bytes,
    pub flags: u32,
}

impl EncodedValue {
    pub fn json(bytes: bytes::Bytes) -> Self {
        EncodedValue {
            bytes,
            flags: CommonFlag::Json.into_flags(),
        }
    }

    pub fn common_flag(&self) -> CommonFlag {
        CommonFlag::from_flags(self.flags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionManifestEntry {
    pub uid: u32,
    pub name: String,
    pub max_ttl: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeManifest {
    pub uid: u32,
    pub name: String,
    pub collections: Vec<CollectionManifestEntry>,
}

/// UUID plus monotonic `uid` plus scopes. A per-session cache maps
/// `(scope, collection) -> collection_uid`, owned by
/// [`waypoint_net::CollectionsResolver`]; this type is the decoded manifest
/// itself, surfaced to callers that want to introspect bucket structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionsManifest {
    pub uuid: String,
    pub manifest_uid: u64,
    pub scopes: Vec<ScopeManifest>,
}

impl CollectionsManifest {
    pub fn collection_uid(&self, scope: &str, collection: &str) -> Option<u32> {
        self.scopes
            .iter()
            .find(|s| s.name == scope)?
            .collections
            .iter()
            .find(|c| c.name == collection)
            .map(|c| c.uid)
    }
}

/// Per-endpoint ping result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingState {
    Ok,
    Timeout,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingResult {
    pub service: String,
    pub remote: String,
    pub state: PingState,
    pub latency: std::time::Duration,
    pub namespace: Option<String>,
}

/// One session's frozen diagnostic snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDiagnostics {
    pub service: String,
    pub local: Option<String>,
    pub remote: String,
    pub last_activity: Option<std::time::Duration>,
    pub state: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsReport {
    pub report_id: String,
    pub sdk_version: String,
    pub sessions: Vec<SessionDiagnostics>,
}
