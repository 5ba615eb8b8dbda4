use crate::hello::{NegotiatedFeatures, ADVERTISED_FEATURES};
use crate::transport::Connection;
use crate::Error;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use waypoint_wire::{DataType, Frame, FramingExtras, Magic, Opcode};

/// Server-supplied mapping from status code to retry-relevant attributes,
/// fetched once per session via `GET_ERROR_MAP` during negotiation.
#[derive(Debug, Clone, Default)]
pub struct ErrorMap {
    pub entries: HashMap<u16, ErrorMapEntry>,
}

#[derive(Debug, Clone)]
pub struct ErrorMapEntry {
    pub name: String,
    pub description: String,
    pub attributes: Vec<String>,
    pub retry: Option<ErrorMapRetry>,
}

/// The server's suggested backoff shape for retrying a status, present when
/// `attributes` contains `retry-now` or `retry-later`.
#[derive(Debug, Clone)]
pub struct ErrorMapRetry {
    pub strategy: String,
    pub interval_ms: u64,
    pub after_ms: u64,
    pub ceil_ms: u64,
    pub max_duration_ms: u64,
}

impl ErrorMap {
    fn from_json(value: &serde_json::Value) -> ErrorMap {
        let mut entries = HashMap::new();
        if let Some(map) = value.get("errors").and_then(|v| v.as_object()) {
            for (code, entry) in map {
                let Ok(code) = u16::from_str_radix(code.trim_start_matches("0x"), 16) else {
                    continue;
                };
                entries.insert(
                    code,
                    ErrorMapEntry {
                        name: entry.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        description: entry
                            .get("desc")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        attributes: entry
                            .get("attrs")
                            .and_then(|v| v.as_array())
                            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                            .unwrap_or_default(),
                        retry: parse_retry(entry.get("retry")),
                    },
                );
            }
        }
        ErrorMap { entries }
    }

    /// Whether the server's error map marks `code` as safe to retry, per the
    /// `retry-now`/`retry-later` attributes on its entry (if any).
    pub fn suggests_retry(&self, code: u16) -> bool {
        self.entries
            .get(&code)
            .map(|entry| {
                entry.retry.is_some()
                    || entry
                        .attributes
                        .iter()
                        .any(|a| a == "retry-now" || a == "retry-later")
            })
            .unwrap_or(false)
    }
}

fn parse_retry(value: Option<&serde_json::Value>) -> Option<ErrorMapRetry> {
    let retry = value?.as_object()?;
    Some(ErrorMapRetry {
        strategy: retry
            .get("strategy")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        interval_ms: retry.get("interval").and_then(|v| v.as_u64()).unwrap_or(0),
        after_ms: retry.get("after").and_then(|v| v.as_u64()).unwrap_or(0),
        ceil_ms: retry.get("ceil").and_then(|v| v.as_u64()).unwrap_or(0),
        max_duration_ms: retry
            .get("max-duration")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    })
}

fn request(opcode: Opcode, key: Bytes, value: Bytes) -> Frame {
    Frame {
        magic: Magic::Request,
        opcode,
        data_type: DataType::empty(),
        vbucket_or_status: 0,
        opaque: 0,
        cas: 0,
        framing_extras: FramingExtras::default(),
        extras: Bytes::new(),
        key,
        value,
    }
}

/// Send `HELLO` advertising every feature in [`ADVERTISED_FEATURES`], under
/// the given client identification string.
pub async fn say_hello(conn: &mut Connection, client_id: &str) -> Result<NegotiatedFeatures, Error> {
    let mut value = BytesMut::with_capacity(ADVERTISED_FEATURES.len() * 2);
    for feature in ADVERTISED_FEATURES {
        value.extend_from_slice(&(*feature as u16).to_be_bytes());
    }
    let response = conn
        .send_and_recv(request(Opcode::Hello, Bytes::copy_from_slice(client_id.as_bytes()), value.freeze()))
        .await?;
    if !response.status().is_success() {
        return Err(Error::NegotiationFailed);
    }
    let codes: Vec<u16> = response
        .value
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    Ok(NegotiatedFeatures::from_wire_codes(&codes))
}

/// Fetch the server's error map (format version 2), used to interpret any
/// status code the client does not already recognise.
pub async fn fetch_error_map(conn: &mut Connection) -> Result<ErrorMap, Error> {
    let version = Bytes::copy_from_slice(&2u16.to_be_bytes());
    let response = conn
        .send_and_recv(request(Opcode::GetErrorMap, Bytes::new(), version))
        .await?;
    if !response.status().is_success() {
        return Ok(ErrorMap::default());
    }
    let parsed: serde_json::Value = serde_json::from_slice(&response.value).unwrap_or_default();
    Ok(ErrorMap::from_json(&parsed))
}

/// `SELECT_BUCKET`, issued once a session is scoped to a specific bucket.
pub async fn select_bucket(conn: &mut Connection, bucket: &str) -> Result<(), Error> {
    let response = conn
        .send_and_recv(request(Opcode::SelectBucket, Bytes::copy_from_slice(bucket.as_bytes()), Bytes::new()))
        .await?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(Error::NegotiationFailed)
    }
}
