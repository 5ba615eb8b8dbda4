use crate::bucket::{BucketHandle, DialParams};
use crate::cluster_map::parse_cluster_config;
use crate::metrics::Metrics;
use crate::model::Credentials;
use crate::Error;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::Instrument;
use uuid::Uuid;
use waypoint_http::{HttpRequest, Pool, RowReader, Service};
use waypoint_net::Session;
use waypoint_retry::{CircuitBreaker, Outcome, RetryReason};
use waypoint_topology::{ClusterOptions, ConnectionSpec, Router, ServiceType};
use waypoint_wire::{DataType, Frame, FramingExtras, Magic, Opcode};

/// One query/analytics/search/views request, already addressed at a
/// specific service; the statement or index name lives in the caller-built
/// `HttpRequest` body.
pub struct ServiceRequest {
    pub service: Service,
    pub topology_service: ServiceType,
    pub request: HttpRequest,
    pub rows_field: &'static str,
}

/// Entry point: dials a seed node, learns the cluster-level topology, and
/// hands out [`BucketHandle`]s and HTTP service dispatch. The one owner of
/// pooled connections that every other handle borrows from.
pub struct Cluster {
    pub(crate) seed_hosts: Vec<String>,
    pub(crate) tls: bool,
    pub(crate) tls_config: Option<Arc<rustls::ClientConfig>>,
    pub(crate) kv_credentials: waypoint_net::Credentials,
    pub(crate) http_pool: Pool,
    pub(crate) options: ClusterOptions,
    pub(crate) client_id: String,
    pub(crate) router: Arc<Router>,
    pub(crate) buckets: AsyncMutex<HashMap<String, Arc<BucketHandle>>>,
    pub(crate) metrics: Arc<Metrics>,
    breakers: std::sync::RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Cluster {
    /// Parse `conn_str`, dial the first reachable seed host, and fetch the
    /// cluster-level (pre-bucket) configuration document.
    pub async fn connect(conn_str: &str, credentials: Credentials) -> Result<Cluster, Error> {
        let spec: ConnectionSpec = waypoint_topology::parse_connection_string(conn_str)?;
        let tls_config = if spec.tls {
            Some(waypoint_net::default_tls_config())
        } else {
            None
        };
        let kv_credentials = waypoint_net::Credentials {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        };
        let http_credentials = match credentials.password.is_empty() && credentials.username.is_empty() {
            true => waypoint_http::Credentials::None,
            false => waypoint_http::Credentials::Basic {
                username: credentials.username,
                password: credentials.password,
            },
        };

        let client_id = format!("waypoint/{}", Uuid::new_v4());
        let seed = spec
            .seed_hosts
            .first()
            .ok_or_else(|| Error::MalformedClusterConfig("connection string has no seed hosts".to_string()))?
            .clone();

        let seed_session = Session::connect(
            &seed,
            tls_config.clone(),
            &kv_credentials,
            None,
            &client_id,
            spec.options.compression,
        )
        .await?;
        let body = fetch_cluster_config(&seed_session, spec.options.kv_timeout).await?;
        let fallback_hostname = seed.rsplit_once(':').map(|(h, _)| h).unwrap_or(&seed);
        let map = parse_cluster_config(&body, fallback_hostname)?;
        seed_session.close();

        let metrics = Metrics::new();
        metrics.spawn_reporting();

        Ok(Cluster {
            seed_hosts: spec.seed_hosts,
            tls: spec.tls,
            tls_config,
            kv_credentials,
            http_pool: Pool::new(http_credentials),
            options: spec.options,
            client_id,
            router: Arc::new(Router::new(map, spec.tls)),
            buckets: AsyncMutex::new(HashMap::new()),
            metrics,
            breakers: std::sync::RwLock::new(HashMap::new()),
        })
    }

    /// Open (or return the cached handle for) bucket `name`.
    pub async fn bucket(&self, name: &str) -> Result<Arc<BucketHandle>, Error> {
        if let Some(existing) = self.buckets.lock().await.get(name) {
            return Ok(existing.clone());
        }

        let seed = self
            .seed_hosts
            .first()
            .ok_or_else(|| Error::MalformedClusterConfig("no seed hosts recorded".to_string()))?
            .clone();
        let session = Session::connect(
            &seed,
            self.tls_config.clone(),
            &self.kv_credentials,
            Some(name),
            &self.client_id,
            self.options.compression,
        )
        .await?;
        let body = fetch_cluster_config(&session, self.options.kv_timeout).await?;
        let fallback_hostname = seed.rsplit_once(':').map(|(h, _)| h).unwrap_or(&seed);
        let map = parse_cluster_config(&body, fallback_hostname)?;

        let router = Arc::new(Router::new(map, self.tls));
        spawn_config_watcher(session, router.clone(), name.to_string());

        let handle = Arc::new(BucketHandle::new(
            name.to_string(),
            router,
            DialParams {
                tls_config: self.tls_config.clone(),
                credentials: self.kv_credentials.clone(),
                client_id: self.client_id.clone(),
                compression: self.options.compression,
                kv_timeout: self.options.kv_timeout,
                metrics: self.metrics.clone(),
            },
        ));

        self.buckets
            .lock()
            .await
            .insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    fn breaker_for(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().unwrap().get(endpoint) {
            return breaker.clone();
        }
        let breaker = Arc::new(CircuitBreaker::new());
        self.breakers
            .write()
            .unwrap()
            .insert(endpoint.to_string(), breaker.clone());
        breaker
    }

    /// Run a N1QL query, returning a row-at-a-time reader over `results`.
    pub async fn query(&self, statement: &str) -> Result<RowReader, Error> {
        let body = serde_json::json!({ "statement": statement }).to_string();
        self.dispatch_rows(ServiceRequest {
            service: Service::Query,
            topology_service: ServiceType::Query,
            request: HttpRequest::new(reqwest::Method::POST, "/query/service")
                .with_json_body(bytes::Bytes::from(body)),
            rows_field: "results",
        }, self.options.query_timeout)
        .await
    }

    /// Run an analytics query, returning a row-at-a-time reader over `results`.
    pub async fn analytics(&self, statement: &str) -> Result<RowReader, Error> {
        let body = serde_json::json!({ "statement": statement }).to_string();
        self.dispatch_rows(ServiceRequest {
            service: Service::Analytics,
            topology_service: ServiceType::Analytics,
            request: HttpRequest::new(reqwest::Method::POST, "/analytics/service")
                .with_json_body(bytes::Bytes::from(body)),
            rows_field: "results",
        }, self.options.analytics_timeout)
        .await
    }

    /// Run a search query against `index`, returning a row-at-a-time reader
    /// over `hits`.
    pub async fn search(&self, index: &str, query: serde_json::Value) -> Result<RowReader, Error> {
        self.dispatch_rows(ServiceRequest {
            service: Service::Search,
            topology_service: ServiceType::Search,
            request: HttpRequest::new(
                reqwest::Method::POST,
                format!("/api/index/{index}/query"),
            )
            .with_json_body(bytes::Bytes::from(query.to_string())),
            rows_field: "hits",
        }, self.options.search_timeout)
        .await
    }

    /// Query a views index (`design_doc`/`view`), returning a row-at-a-time
    /// reader over `rows`.
    pub async fn views(
        &self,
        bucket: &str,
        design_doc: &str,
        view: &str,
    ) -> Result<RowReader, Error> {
        self.dispatch_rows(ServiceRequest {
            service: Service::Views,
            topology_service: ServiceType::Views,
            request: HttpRequest::new(
                reqwest::Method::GET,
                format!("/{bucket}/_design/{design_doc}/_view/{view}"),
            ),
            rows_field: "rows",
        }, self.options.view_timeout)
        .await
    }

    /// Run a N1QL statement scoped to an in-flight transaction, returning
    /// the decoded response body whole rather than row-by-row: transaction
    /// logic must see the query's full result (and any `txid`-scoped error)
    /// before deciding its next operation, so there is no streaming
    /// consumer to hand a [`RowReader`] to.
    pub(crate) async fn query_in_transaction(
        &self,
        statement: &str,
        txid: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, Error> {
        let body = serde_json::json!({
            "statement": statement,
            "txid": txid,
            "tximplicit": false,
        })
        .to_string();
        let request = HttpRequest::new(reqwest::Method::POST, "/query/service")
            .with_json_body(bytes::Bytes::from(body));

        let deadline = waypoint_retry::deadline_from_timeout(timeout);
        waypoint_retry::drive(
            waypoint_retry::BestEffort::new(Duration::from_millis(20), Duration::from_millis(1_000), 4),
            deadline,
            true,
            move |attempt| {
                let request = request.clone();
                let span = waypoint_observability::attempt_span(
                    "query", None, "unresolved", 0, attempt, None,
                );
                async move {
                    let start = Instant::now();
                    let mut peer = "unresolved".to_string();
                    let outcome = async {
                        let endpoint = match self.router.select_endpoint(ServiceType::Query, |idx| {
                            self.router
                                .current()
                                .nodes
                                .get(idx)
                                .and_then(|n| n.endpoint(ServiceType::Query, self.tls))
                                .map(|e| self.breaker_for(&e).allow_request())
                                .unwrap_or(false)
                        }) {
                            Some(endpoint) => endpoint,
                            None => {
                                return Outcome::Retriable(
                                    RetryReason::ServiceNotAvailable,
                                    Error::NoHealthyEndpoint(ServiceType::Query),
                                )
                            }
                        };
                        peer = endpoint.clone();
                        let breaker = self.breaker_for(&endpoint);

                        match self.http_pool.send(Service::Query, &endpoint, request, timeout).await {
                            Ok(response) if response.status_code < 300 => {
                                breaker.record_success();
                                match serde_json::from_slice(&response.body) {
                                    Ok(value) => Outcome::Success(value),
                                    Err(err) => Outcome::Terminal(Error::Json(err)),
                                }
                            }
                            Ok(response) => Outcome::Terminal(Error::Http(
                                waypoint_http::Error::MalformedBody(format!(
                                    "query status {}: {}",
                                    response.status_code,
                                    String::from_utf8_lossy(&response.body)
                                )),
                            )),
                            Err(err @ waypoint_http::Error::Transport(_)) => {
                                breaker.record_failure();
                                Outcome::Retriable(RetryReason::ServiceNotAvailable, Error::Http(err))
                            }
                            Err(err) => Outcome::Terminal(Error::Http(err)),
                        }
                    }
                    .await;
                    self.metrics.record("query", "transaction", &peer, start.elapsed());
                    outcome
                }
                .instrument(span)
            },
        )
        .await
        .map_err(Into::into)
    }

    async fn dispatch_rows(
        &self,
        spec: ServiceRequest,
        timeout: Duration,
    ) -> Result<RowReader, Error> {
        let deadline = waypoint_retry::deadline_from_timeout(timeout);
        waypoint_retry::drive(
            waypoint_retry::BestEffort::new(Duration::from_millis(20), Duration::from_millis(1_000), 4),
            deadline,
            true,
            move |attempt| {
                let request = spec.request.clone();
                let span = waypoint_observability::attempt_span(
                    spec.rows_field,
                    None,
                    "unresolved",
                    0,
                    attempt,
                    None,
                );
                async move {
                    let start = Instant::now();
                    let mut peer = "unresolved".to_string();
                    let outcome = async {
                        let endpoint = match self.router.select_endpoint(spec.topology_service, |idx| {
                            self.router
                                .current()
                                .nodes
                                .get(idx)
                                .and_then(|n| n.endpoint(spec.topology_service, self.tls))
                                .map(|e| self.breaker_for(&e).allow_request())
                                .unwrap_or(false)
                        }) {
                            Some(endpoint) => endpoint,
                            None => {
                                return Outcome::Retriable(
                                    RetryReason::ServiceNotAvailable,
                                    Error::NoHealthyEndpoint(spec.topology_service),
                                )
                            }
                        };
                        peer = endpoint.clone();
                        let breaker = self.breaker_for(&endpoint);

                        match self
                            .http_pool
                            .send_streaming(spec.service, &endpoint, request, timeout, spec.rows_field)
                            .await
                        {
                            Ok(reader) => {
                                breaker.record_success();
                                Outcome::Success(reader)
                            }
                            Err(err @ waypoint_http::Error::Transport(_)) => {
                                breaker.record_failure();
                                Outcome::Retriable(RetryReason::ServiceNotAvailable, Error::Http(err))
                            }
                            Err(err) => Outcome::Terminal(Error::Http(err)),
                        }
                    }
                    .await;
                    self.metrics.record(
                        &format!("{:?}", spec.service).to_lowercase(),
                        spec.rows_field,
                        &peer,
                        start.elapsed(),
                    );
                    outcome
                }
                .instrument(span)
            },
        )
        .await
        .map_err(Into::into)
    }
}

async fn fetch_cluster_config(session: &Session, timeout: Duration) -> Result<Vec<u8>, Error> {
    let frame = Frame {
        magic: Magic::Request,
        opcode: Opcode::GetClusterConfig,
        data_type: DataType::empty(),
        vbucket_or_status: 0,
        opaque: 0,
        cas: 0,
        framing_extras: FramingExtras::default(),
        extras: bytes::Bytes::new(),
        key: bytes::Bytes::new(),
        value: bytes::Bytes::new(),
    };
    let response = session.send(frame, timeout).await?;
    if !response.status().is_success() {
        return Err(Error::UnexpectedStatus(response.status()));
    }
    Ok(response.value.to_vec())
}

/// Forward cluster-map push notifications from `session` into `router`'s
/// updates for as long as the session stays connected.
fn spawn_config_watcher(session: Session, router: Arc<Router>, bucket: String) {
    let Some(mut push_events) = session.take_push_events() else {
        return;
    };
    tokio::spawn(async move {
        let _session = session;
        while let Some(event) = push_events.recv().await {
            let waypoint_net::PushEvent::ClustermapChanged { bucket: for_bucket, body } = event;
            if for_bucket.as_deref().is_some_and(|b| b != bucket) {
                continue;
            }
            let fallback = "localhost";
            match parse_cluster_config(&body, fallback) {
                Ok(map) => {
                    router.update(map);
                }
                Err(err) => {
                    tracing::warn!(?err, "discarding malformed pushed cluster config");
                }
            }
        }
    });
}
