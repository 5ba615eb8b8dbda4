use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A structured log record (timestamp, level, message, supplemental fields)
/// used by the orphan-response and threshold reporters to emit one
/// JSON-serializable record per finding instead of free-form string
/// interpolation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLog {
    pub ts_unix_nanos: u128,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl OperationLog {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        OperationLog {
            ts_unix_nanos: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos(),
            level,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}
