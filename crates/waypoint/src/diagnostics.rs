use crate::cluster::Cluster;
use crate::model::{DiagnosticsReport, PingResult, PingState, SessionDiagnostics};
use std::time::{Duration, Instant};
use uuid::Uuid;
use waypoint_http::{HttpRequest, Service};
use waypoint_topology::ServiceType;
use waypoint_wire::{DataType, Frame, FramingExtras, Magic, Opcode};

impl Cluster {
    /// A frozen snapshot of every currently dialed session. Unlike
    /// [`Cluster::ping`] this never touches the network: it only reports
    /// already-known session state.
    pub async fn diagnostics(&self, report_id: Option<String>) -> DiagnosticsReport {
        let report_id = report_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut sessions = Vec::new();

        let buckets: Vec<_> = self.buckets.lock().await.values().cloned().collect();
        for bucket in buckets {
            let map = bucket.router.current();
            for (idx, session) in bucket.open_sessions().await {
                let remote = map
                    .nodes
                    .get(idx)
                    .and_then(|n| n.endpoint(ServiceType::KeyValue, self.tls))
                    .unwrap_or_else(|| "unknown".to_string());
                sessions.push(SessionDiagnostics {
                    service: "kv".to_string(),
                    local: None,
                    remote,
                    last_activity: None,
                    state: format!("{:?}", session.state()),
                    namespace: Some(bucket.name().to_string()),
                });
            }
        }

        DiagnosticsReport {
            report_id,
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
            sessions,
        }
    }

    /// Round-trip every open KV session with a NOOP and every service with a
    /// healthy-looking node with a lightweight HTTP request.
    pub async fn ping(&self, report_id: Option<String>) -> Vec<PingResult> {
        let report_id = report_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::debug!(report_id, "starting ping sweep");
        let mut results = Vec::new();

        let buckets: Vec<_> = self.buckets.lock().await.values().cloned().collect();
        for bucket in buckets {
            let map = bucket.router.current();
            for (idx, session) in bucket.open_sessions().await {
                let remote = map
                    .nodes
                    .get(idx)
                    .and_then(|n| n.endpoint(ServiceType::KeyValue, self.tls))
                    .unwrap_or_else(|| "unknown".to_string());
                results.push(
                    ping_kv(
                        &session,
                        remote,
                        bucket.name().to_string(),
                        self.options.kv_timeout,
                    )
                    .await,
                );
            }
        }

        for service in [
            ServiceType::Query,
            ServiceType::Analytics,
            ServiceType::Search,
            ServiceType::Views,
        ] {
            if let Some(endpoint) = self.router.select_endpoint(service, |_| true) {
                results.push(self.ping_http(service, &endpoint).await);
            }
        }

        results
    }

    async fn ping_http(&self, service: ServiceType, endpoint: &str) -> PingResult {
        let http_service = match service {
            ServiceType::Query => Service::Query,
            ServiceType::Analytics => Service::Analytics,
            ServiceType::Search => Service::Search,
            ServiceType::Views => Service::Views,
            ServiceType::Management => Service::Management,
            ServiceType::Eventing => Service::Eventing,
            ServiceType::KeyValue => unreachable!("key-value is pinged over the binary protocol"),
        };
        let start = Instant::now();
        let request = HttpRequest::new(reqwest::Method::GET, "/");
        let state = match self
            .http_pool
            .send(http_service, endpoint, request, self.options.management_timeout)
            .await
        {
            Ok(_) => PingState::Ok,
            Err(waypoint_http::Error::Transport(err)) if err.is_timeout() => PingState::Timeout,
            Err(_) => PingState::Error,
        };
        PingResult {
            service: format!("{service:?}"),
            remote: endpoint.to_string(),
            state,
            latency: start.elapsed(),
            namespace: None,
        }
    }
}

async fn ping_kv(
    session: &waypoint_net::Session,
    remote: String,
    bucket: String,
    timeout: Duration,
) -> PingResult {
    let frame = Frame {
        magic: Magic::Request,
        opcode: Opcode::Noop,
        data_type: DataType::empty(),
        vbucket_or_status: 0,
        opaque: 0,
        cas: 0,
        framing_extras: FramingExtras::default(),
        extras: bytes::Bytes::new(),
        key: bytes::Bytes::new(),
        value: bytes::Bytes::new(),
    };
    let start = Instant::now();
    let state = match session.send(frame, timeout).await {
        Ok(response) if response.status().is_success() => PingState::Ok,
        Ok(_) => PingState::Error,
        Err(waypoint_net::Error::Timeout) => PingState::Timeout,
        Err(_) => PingState::Error,
    };
    PingResult {
        service: "kv".to_string(),
        remote,
        state,
        latency: start.elapsed(),
        namespace: Some(bucket),
    }
}
