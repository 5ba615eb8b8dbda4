use crate::cluster_map::parse_cluster_config;
use crate::metrics::Metrics;
use crate::model::{Cas, DocumentId, EncodedValue, MutationToken};
use crate::Error;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::Instrument;
use waypoint_net::{CollectionsResolver, Session};
use waypoint_retry::{CircuitBreaker, Outcome, RetryReason};
use waypoint_topology::{Router, ServiceType};
use waypoint_wire::{CompressionOptions, DataType, Frame, FramingExtras, Magic, Opcode, Status};

/// Everything needed to dial a fresh KV session, kept on the bucket so
/// [`BucketHandle::session_for`] can lazily reconnect without threading the
/// whole [`crate::Cluster`] through every call.
pub(crate) struct DialParams {
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
    pub credentials: waypoint_net::Credentials,
    pub client_id: String,
    pub compression: CompressionOptions,
    pub kv_timeout: Duration,
    pub metrics: Arc<Metrics>,
}

/// One open bucket: its topology [`Router`], lazily-dialed per-node
/// [`Session`]s, per-node [`CircuitBreaker`]s, and the collections-id cache.
/// Sessions are dialed lazily and cached behind a lock, one per vbucket map
/// node.
pub struct BucketHandle {
    pub(crate) name: String,
    pub(crate) router: Arc<Router>,
    pub(crate) dial: DialParams,
    pub(crate) collections: CollectionsResolver,
    sessions: AsyncMutex<HashMap<usize, Arc<Session>>>,
    breakers: std::sync::RwLock<HashMap<usize, Arc<CircuitBreaker>>>,
}

impl BucketHandle {
    pub(crate) fn new(name: String, router: Arc<Router>, dial: DialParams) -> Self {
        BucketHandle {
            name,
            router,
            dial,
            collections: CollectionsResolver::new(),
            sessions: AsyncMutex::new(HashMap::new()),
            breakers: std::sync::RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of currently dialed `(node_index, session)` pairs, used by
    /// diagnostics to report per-session state without holding a lock across
    /// the whole report.
    pub(crate) async fn open_sessions(&self) -> Vec<(usize, Arc<Session>)> {
        self.sessions
            .lock()
            .await
            .iter()
            .map(|(idx, session)| (*idx, session.clone()))
            .collect()
    }

    fn breaker_for(&self, node_idx: usize) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().unwrap().get(&node_idx) {
            return breaker.clone();
        }
        let breaker = Arc::new(CircuitBreaker::new());
        self.breakers
            .write()
            .unwrap()
            .insert(node_idx, breaker.clone());
        breaker
    }

    async fn session_for(&self, node_idx: usize) -> Result<Arc<Session>, Error> {
        {
            let sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get(&node_idx) {
                if session.state() == waypoint_net::SessionState::Ready {
                    return Ok(session.clone());
                }
            }
        }

        let map = self.router.current();
        let node = map
            .nodes
            .get(node_idx)
            .ok_or_else(|| Error::BucketNotOpen(self.name.clone()))?;
        let tls = self.dial.tls_config.is_some();
        let endpoint = node
            .endpoint(ServiceType::KeyValue, tls)
            .ok_or(Error::NoHealthyEndpoint(ServiceType::KeyValue))?;
        let addr = endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&endpoint)
            .to_string();

        let metrics = self.dial.metrics.clone();
        let orphan_handler: waypoint_net::OrphanHandler =
            Arc::new(move |info: waypoint_net::OrphanedResponseInfo| {
                metrics.orphans.record(waypoint_observability::OrphanedResponse {
                    service: "kv".to_string(),
                    operation: format!("{:?}", info.opcode),
                    opaque: Some(info.opaque),
                    server_duration: None,
                    peer: info.peer,
                });
            });
        let session = Session::connect_with_orphan_handler(
            &addr,
            self.dial.tls_config.clone(),
            &self.dial.credentials,
            Some(&self.name),
            &self.dial.client_id,
            self.dial.compression,
            Some(orphan_handler),
        )
        .await?;
        let session = Arc::new(session);
        self.sessions
            .lock()
            .await
            .insert(node_idx, session.clone());
        Ok(session)
    }

    fn resolve_vbucket(&self, key: &[u8]) -> Result<(usize, u16), Error> {
        self.router
            .select_node_for_key(key)
            .ok_or(Error::NoHealthyEndpoint(ServiceType::KeyValue))
    }

    async fn resolve_collection_id(
        &self,
        session: &Session,
        scope: &str,
        collection: &str,
    ) -> Result<u32, Error> {
        if !self.router.current().has_bucket_capability("collections") {
            return Ok(0);
        }
        Ok(self
            .collections
            .resolve(session, scope, collection, self.dial.kv_timeout)
            .await?)
    }

    fn classify(status: Status, error_map: &waypoint_net::ErrorMap) -> Option<RetryReason> {
        match status {
            Status::NotMyVbucket => Some(RetryReason::KeyValueNotMyVbucket),
            Status::UnknownCollection => Some(RetryReason::KeyValueCollectionOutdated),
            Status::Locked => Some(RetryReason::KeyValueLocked),
            Status::SyncWriteInProgress => Some(RetryReason::KeyValueSyncWriteInProgress),
            Status::SyncWriteReCommitInProgress => {
                Some(RetryReason::KeyValueSyncWriteReCommitInProgress)
            }
            // Anything the curated `Status` set doesn't model is resolved
            // against the session's negotiated error map instead of being
            // treated as terminal by default.
            Status::Unmapped(code) if error_map.suggests_retry(code) => {
                Some(RetryReason::KeyValueErrorMapRetryIndicated)
            }
            _ => None,
        }
    }

    /// Dispatch one KV opcode against `doc`, retrying the classified
    /// reasons until `deadline`, consulting and updating the target node's
    /// circuit breaker around each attempt. Returns the response alongside
    /// the vbucket id the request was finally routed to, so callers can
    /// decode a [`MutationToken`] without re-resolving it.
    async fn dispatch(
        &self,
        doc: &DocumentId,
        opcode: Opcode,
        extras: bytes::Bytes,
        value: bytes::Bytes,
        cas: u64,
        idempotent: bool,
    ) -> Result<(Frame, u16), Error> {
        let deadline = Instant::now() + self.dial.kv_timeout;
        waypoint_retry::drive(
            waypoint_retry::BestEffort::new(
                Duration::from_millis(10),
                Duration::from_millis(500),
                5,
            ),
            deadline,
            idempotent,
            move |attempt| {
                let span = waypoint_observability::attempt_span(
                    &format!("{opcode:?}"),
                    Some(doc.bucket.as_str()),
                    "unresolved",
                    0,
                    attempt,
                    None,
                );
                async move {
                    let start = Instant::now();
                    let outcome = async {
                        let (node_idx, vbucket_id) = match self.resolve_vbucket(doc.key.as_bytes()) {
                            Ok(pair) => pair,
                            Err(err) => return Outcome::Terminal(err),
                        };
                        let breaker = self.breaker_for(node_idx);
                        if !breaker.allow_request() {
                            return Outcome::Retriable(
                                RetryReason::CircuitBreakerOpen,
                                Error::NoHealthyEndpoint(ServiceType::KeyValue),
                            );
                        }

                        let session = match self.session_for(node_idx).await {
                            Ok(session) => session,
                            Err(err) => {
                                breaker.record_failure();
                                return Outcome::Retriable(RetryReason::NodeNotAvailable, err);
                            }
                        };

                        let collection_id =
                            match self
                                .resolve_collection_id(&session, &doc.scope, &doc.collection)
                                .await
                            {
                                Ok(id) => id,
                                Err(err) => return Outcome::Terminal(err),
                            };
                        let wire_key = waypoint_wire::encode_collection_prefixed_key(
                            collection_id,
                            doc.key.as_bytes(),
                        );

                        let frame = Frame {
                            magic: Magic::Request,
                            opcode,
                            data_type: DataType::JSON,
                            vbucket_or_status: vbucket_id,
                            opaque: 0,
                            cas,
                            framing_extras: FramingExtras::default(),
                            extras: extras.clone(),
                            key: wire_key,
                            value: value.clone(),
                        };

                        match session.send(frame, self.dial.kv_timeout).await {
                            Ok(response) => {
                                if response.status().is_success() {
                                    breaker.record_success();
                                    return Outcome::Success((response, vbucket_id));
                                }
                                if response.status() == Status::UnknownCollection {
                                    // The wire format carries no manifest uid on this
                                    // status here, so force a refetch by bumping past
                                    // whatever uid is currently cached.
                                    self.collections
                                        .invalidate_if_outdated(self.collections.manifest_uid() + 1);
                                }
                                if response.status() == Status::NotMyVbucket
                                    && !response.value.is_empty()
                                {
                                    let fallback_hostname = self
                                        .router
                                        .current()
                                        .nodes
                                        .get(node_idx)
                                        .map(|n| n.hostname.clone())
                                        .unwrap_or_default();
                                    match parse_cluster_config(&response.value, &fallback_hostname) {
                                        Ok(new_map) => {
                                            self.router.update(new_map);
                                        }
                                        Err(err) => {
                                            tracing::warn!(
                                                ?err,
                                                "discarding malformed cluster config embedded in not_my_vbucket response"
                                            );
                                        }
                                    }
                                }
                                match Self::classify(response.status(), &session.error_map) {
                                    Some(reason) => Outcome::Retriable(
                                        reason,
                                        Error::UnexpectedStatus(response.status()),
                                    ),
                                    None => {
                                        Outcome::Terminal(Error::UnexpectedStatus(response.status()))
                                    }
                                }
                            }
                            Err(waypoint_net::Error::Timeout) => {
                                breaker.record_failure();
                                Outcome::Retriable(
                                    RetryReason::SocketClosedWhileInFlight,
                                    Error::Session(waypoint_net::Error::Timeout),
                                )
                            }
                            Err(err) => {
                                breaker.record_failure();
                                Outcome::Retriable(RetryReason::SocketNotAvailable, Error::Session(err))
                            }
                        }
                    }
                    .await;
                    self.dial
                        .metrics
                        .record("kv", &format!("{opcode:?}"), &self.name, start.elapsed());
                    outcome
                }
                .instrument(span)
            },
        )
        .await
        .map_err(Into::into)
    }

    pub async fn get(&self, doc: &DocumentId) -> Result<(EncodedValue, Cas), Error> {
        let (response, _) = self
            .dispatch(doc, Opcode::Get, bytes::Bytes::new(), bytes::Bytes::new(), 0, true)
            .await?;
        let flags = if response.extras.len() >= 4 {
            u32::from_be_bytes(response.extras[..4].try_into().unwrap())
        } else {
            0
        };
        Ok((
            EncodedValue {
                bytes: response.value,
                flags,
            },
            Cas(response.cas),
        ))
    }

    pub async fn upsert(
        &self,
        doc: &DocumentId,
        value: EncodedValue,
    ) -> Result<(Cas, Option<MutationToken>), Error> {
        let (response, vbucket_id) = self
            .dispatch(
                doc,
                Opcode::Set,
                flags_extras(value.flags),
                value.bytes,
                0,
                false,
            )
            .await?;
        Ok((Cas(response.cas), self.mutation_token(&response, vbucket_id)))
    }

    pub async fn insert(
        &self,
        doc: &DocumentId,
        value: EncodedValue,
    ) -> Result<(Cas, Option<MutationToken>), Error> {
        let (response, vbucket_id) = self
            .dispatch(
                doc,
                Opcode::Add,
                flags_extras(value.flags),
                value.bytes,
                0,
                false,
            )
            .await?;
        Ok((Cas(response.cas), self.mutation_token(&response, vbucket_id)))
    }

    pub async fn replace(
        &self,
        doc: &DocumentId,
        value: EncodedValue,
        cas: Cas,
    ) -> Result<(Cas, Option<MutationToken>), Error> {
        let (response, vbucket_id) = self
            .dispatch(
                doc,
                Opcode::Replace,
                flags_extras(value.flags),
                value.bytes,
                cas.0,
                false,
            )
            .await?;
        Ok((Cas(response.cas), self.mutation_token(&response, vbucket_id)))
    }

    pub async fn remove(&self, doc: &DocumentId, cas: Cas) -> Result<Option<MutationToken>, Error> {
        let (response, vbucket_id) = self
            .dispatch(
                doc,
                Opcode::Delete,
                bytes::Bytes::new(),
                bytes::Bytes::new(),
                cas.0,
                false,
            )
            .await?;
        Ok(self.mutation_token(&response, vbucket_id))
    }

    /// Decode the `MUTATION_SEQNO` extras (8-byte partition UUID followed by
    /// an 8-byte sequence number) a mutation response carries when the
    /// session negotiated that HELLO feature. `None` if the peer didn't.
    fn mutation_token(&self, response: &Frame, vbucket_id: u16) -> Option<MutationToken> {
        if response.extras.len() < 16 {
            return None;
        }
        let partition_uuid = u64::from_be_bytes(response.extras[0..8].try_into().unwrap());
        let sequence_number = u64::from_be_bytes(response.extras[8..16].try_into().unwrap());
        Some(MutationToken {
            partition_uuid,
            sequence_number,
            partition_id: vbucket_id,
            bucket_name: self.name.clone(),
        })
    }

    /// Fetch and decode this bucket's collections manifest. Issued
    /// against any `READY` session rather than going through [`dispatch`]'s
    /// vbucket routing, since `GET_COLLECTIONS_MANIFEST` is bucket-scoped,
    /// not key-scoped.
    pub async fn collections_manifest(&self) -> Result<crate::model::CollectionsManifest, Error> {
        if self.router.current().nodes.is_empty() {
            return Err(Error::NoHealthyEndpoint(ServiceType::KeyValue));
        }
        let session = self.session_for(0).await?;

        let frame = Frame {
            magic: Magic::Request,
            opcode: Opcode::GetCollectionsManifest,
            data_type: DataType::empty(),
            vbucket_or_status: 0,
            opaque: 0,
            cas: 0,
            framing_extras: FramingExtras::default(),
            extras: bytes::Bytes::new(),
            key: bytes::Bytes::new(),
            value: bytes::Bytes::new(),
        };
        let response = session.send(frame, self.dial.kv_timeout).await?;
        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus(response.status()));
        }
        parse_collections_manifest(&response.value)
    }
}

fn parse_collections_manifest(
    body: &[u8],
) -> Result<crate::model::CollectionsManifest, Error> {
    use crate::model::{CollectionManifestEntry, CollectionsManifest, ScopeManifest};

    #[derive(serde::Deserialize)]
    struct WireCollection {
        uid: String,
        name: String,
        #[serde(rename = "maxTTL")]
        max_ttl: Option<u32>,
    }
    #[derive(serde::Deserialize)]
    struct WireScope {
        uid: String,
        name: String,
        collections: Vec<WireCollection>,
    }
    #[derive(serde::Deserialize)]
    struct WireManifest {
        uid: String,
        scopes: Vec<WireScope>,
    }

    let parse_hex =
        |s: &str| u32::from_str_radix(s, 16).or_else(|_| s.parse()).unwrap_or(0);
    let parse_hex64 =
        |s: &str| u64::from_str_radix(s, 16).or_else(|_| s.parse()).unwrap_or(0);

    let wire: WireManifest = serde_json::from_slice(body)?;
    Ok(CollectionsManifest {
        // GET_COLLECTIONS_MANIFEST's body carries no bucket UUID of its own.
        uuid: String::new(),
        manifest_uid: parse_hex64(&wire.uid),
        scopes: wire
            .scopes
            .into_iter()
            .map(|s| ScopeManifest {
                uid: parse_hex(&s.uid),
                name: s.name,
                collections: s
                    .collections
                    .into_iter()
                    .map(|c| CollectionManifestEntry {
                        uid: parse_hex(&c.uid),
                        name: c.name,
                        max_ttl: c.max_ttl,
                    })
                    .collect(),
            })
            .collect(),
    })
}

fn flags_extras(flags: u32) -> bytes::Bytes {
    let mut buf = bytes::BytesMut::with_capacity(8);
    bytes::BufMut::put_u32(&mut buf, flags);
    bytes::BufMut::put_u32(&mut buf, 0); // expiry, never set by this core
    buf.freeze()
}
