use crate::{Error, RowReader};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use uuid::Uuid;

/// The HTTP-fronted cluster services this pool dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Query,
    Analytics,
    Search,
    Views,
    Management,
    Eventing,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: reqwest::Method,
    /// Path and query relative to the endpoint selected by the caller
    /// (topology owns endpoint selection, see `waypoint-topology`).
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<bytes::Bytes>,
    pub client_context_id: Option<String>,
}

impl HttpRequest {
    pub fn new(method: reqwest::Method, path: impl Into<String>) -> Self {
        HttpRequest {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            client_context_id: None,
        }
    }

    pub fn with_json_body(mut self, body: bytes::Bytes) -> Self {
        self.headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        self.body = Some(body);
        self
    }
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: reqwest::header::HeaderMap,
    pub body: bytes::Bytes,
}

/// Per-service credentials applied to every outgoing request. Either HTTP
/// basic auth (RBAC username/password) or mutual TLS (handled by the
/// `reqwest::Client`'s TLS identity instead) is in effect, never both.
#[derive(Debug, Clone)]
pub enum Credentials {
    Basic { username: String, password: String },
    None,
}

/// A pool of keep-alive `reqwest::Client`s, one per service, each itself
/// pooling connections per host so repeated requests to the same service
/// reuse sockets instead of reconnecting.
pub struct Pool {
    clients: RwLock<HashMap<Service, reqwest::Client>>,
    credentials: Credentials,
    idle_timeout: Duration,
    max_idle_per_host: usize,
}

impl Pool {
    pub fn new(credentials: Credentials) -> Self {
        Pool {
            clients: RwLock::new(HashMap::new()),
            credentials,
            idle_timeout: Duration::from_secs(60),
            max_idle_per_host: 4,
        }
    }

    fn client_for(&self, service: Service) -> Result<reqwest::Client, Error> {
        if let Some(client) = self.clients.read().unwrap().get(&service) {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .pool_idle_timeout(self.idle_timeout)
            .pool_max_idle_per_host(self.max_idle_per_host)
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;
        self.clients.write().unwrap().insert(service, client.clone());
        Ok(client)
    }

    /// Issue one request against `endpoint` (scheme://host:port) for
    /// `service`, applying configured credentials, a deadline, and a
    /// client-generated `client_context_id` when the caller left one unset.
    #[tracing::instrument(skip(self, request), fields(service = ?service))]
    pub async fn send(
        &self,
        service: Service,
        endpoint: &str,
        mut request: HttpRequest,
        deadline: Duration,
    ) -> Result<HttpResponse, Error> {
        if request.client_context_id.is_none() {
            request.client_context_id = Some(Uuid::new_v4().to_string());
        }

        let client = self.client_for(service)?;
        let url = format!("{}{}", endpoint.trim_end_matches('/'), request.path);
        let mut builder = client.request(request.method, url).timeout(deadline);

        if let Credentials::Basic { username, password } = &self.credentials {
            builder = builder.basic_auth(username, Some(password));
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(ctx_id) = &request.client_context_id {
            builder = builder.header("client-context-id", ctx_id);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status_code = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status_code,
            headers,
            body,
        })
    }

    /// Like [`Pool::send`], but rather than buffering the whole body,
    /// returns a [`RowReader`] over the response's top-level JSON array
    /// (`results` for query/analytics, `hits` for search, raw array for
    /// views), delivering each element as it arrives.
    #[tracing::instrument(skip(self, request), fields(service = ?service))]
    pub async fn send_streaming(
        &self,
        service: Service,
        endpoint: &str,
        mut request: HttpRequest,
        deadline: Duration,
        rows_field: &'static str,
    ) -> Result<RowReader, Error> {
        if request.client_context_id.is_none() {
            request.client_context_id = Some(Uuid::new_v4().to_string());
        }

        let client = self.client_for(service)?;
        let url = format!("{}{}", endpoint.trim_end_matches('/'), request.path);
        let mut builder = client.request(request.method, url).timeout(deadline);

        if let Credentials::Basic { username, password } = &self.credentials {
            builder = builder.basic_auth(username, Some(password));
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status_code = response.status().as_u16();
            let body = response.bytes().await.unwrap_or_default();
            return Err(Error::MalformedBody(format!(
                "status {status_code}: {}",
                String::from_utf8_lossy(&body)
            )));
        }

        Ok(RowReader::new(response, rows_field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_marks_json_bodies() {
        let req = HttpRequest::new(reqwest::Method::POST, "/query/service")
            .with_json_body(bytes::Bytes::from_static(b"{}"));
        assert!(req
            .headers
            .iter()
            .any(|(k, v)| k == "Content-Type" && v == "application/json"));
    }
}
