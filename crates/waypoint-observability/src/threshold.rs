use crate::log::{LogLevel, OperationLog};
use crate::queue::FixedCapacityQueue;
use std::sync::Arc;
use std::time::Duration;

/// A single operation whose latency exceeded the configured threshold for
/// its service.
#[derive(Debug, Clone)]
pub struct SlowOperation {
    pub service: String,
    pub operation: String,
    pub latency: Duration,
    pub threshold: Duration,
    pub peer: String,
}

/// Per-service threshold and fixed-capacity ring of recent slow operations,
/// reported on an interval. One `ThresholdLogReporter` instance per service
/// (kv, query, search, analytics, ...) rather than a single global one.
pub struct ThresholdLogReporter {
    service: String,
    threshold: Duration,
    queue: FixedCapacityQueue<SlowOperation>,
}

impl ThresholdLogReporter {
    pub fn new(service: impl Into<String>, threshold: Duration, capacity: usize) -> Self {
        ThresholdLogReporter {
            service: service.into(),
            threshold,
            queue: FixedCapacityQueue::new(capacity),
        }
    }

    /// Record `latency` for `operation` against `peer` if it exceeds this
    /// reporter's threshold. No-op otherwise.
    pub fn observe(&self, operation: &str, latency: Duration, peer: &str) {
        if latency < self.threshold {
            return;
        }
        self.queue.push(SlowOperation {
            service: self.service.clone(),
            operation: operation.to_string(),
            latency,
            threshold: self.threshold,
            peer: peer.to_string(),
        });
    }

    pub fn drain_logs(&self) -> Vec<OperationLog> {
        self.queue
            .drain()
            .into_iter()
            .map(|slow| {
                OperationLog::new(
                    LogLevel::Warn,
                    format!("slow operation {}.{}", slow.service, slow.operation),
                )
                .with_field("operation", slow.operation)
                .with_field("peer", slow.peer)
                .with_field("latency_us", slow.latency.as_micros() as u64)
                .with_field("threshold_us", slow.threshold.as_micros() as u64)
            })
            .collect()
    }

    pub fn spawn_reporting(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for log in self.drain_logs() {
                    tracing::warn!(message = %log.message, fields = ?log.fields, "slow operation");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_threshold_is_not_recorded() {
        let reporter = ThresholdLogReporter::new("kv", Duration::from_millis(100), 4);
        reporter.observe("get", Duration::from_millis(10), "10.0.0.1:11210");
        assert!(reporter.drain_logs().is_empty());
    }

    #[test]
    fn above_threshold_is_recorded() {
        let reporter = ThresholdLogReporter::new("kv", Duration::from_millis(100), 4);
        reporter.observe("get", Duration::from_millis(150), "10.0.0.1:11210");
        let logs = reporter.drain_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(
            logs[0].fields.get("latency_us").unwrap(),
            &serde_json::json!(150_000u64)
        );
    }
}
