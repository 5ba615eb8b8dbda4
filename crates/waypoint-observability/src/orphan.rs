use crate::log::{LogLevel, OperationLog};
use crate::queue::FixedCapacityQueue;
use std::sync::Arc;
use std::time::Duration;

/// A response that arrived after its request's deadline already lapsed (the
/// caller stopped waiting, or retried onto another node) -- tracked so
/// unexpectedly high orphan rates against one service are visible without
/// needing a full tracing backend.
#[derive(Debug, Clone)]
pub struct OrphanedResponse {
    pub service: String,
    pub operation: String,
    pub opaque: Option<u32>,
    pub server_duration: Option<Duration>,
    pub peer: String,
}

/// Fixed-capacity record of recent orphaned responses, reported on an
/// interval by a background task spawned with `spawn_reporting`. Shares the
/// same "bounded ring buffer + periodic log flush" shape as
/// [`crate::ThresholdLogReporter`].
pub struct OrphanResponseReporter {
    queue: FixedCapacityQueue<OrphanedResponse>,
}

impl OrphanResponseReporter {
    pub fn new(capacity: usize) -> Self {
        OrphanResponseReporter {
            queue: FixedCapacityQueue::new(capacity),
        }
    }

    pub fn record(&self, orphan: OrphanedResponse) {
        self.queue.push(orphan);
    }

    pub fn drain_logs(&self) -> Vec<OperationLog> {
        self.queue
            .drain()
            .into_iter()
            .map(|orphan| {
                let mut log = OperationLog::new(
                    LogLevel::Warn,
                    format!("orphan response for {}.{}", orphan.service, orphan.operation),
                )
                .with_field("service", orphan.service)
                .with_field("operation", orphan.operation)
                .with_field("peer", orphan.peer);
                if let Some(opaque) = orphan.opaque {
                    log = log.with_field("opaque", opaque);
                }
                if let Some(duration) = orphan.server_duration {
                    log = log.with_field("server_duration_us", duration.as_micros() as u64);
                }
                log
            })
            .collect()
    }

    /// Spawn a task that drains and logs accumulated orphans every `interval`.
    pub fn spawn_reporting(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for log in self.drain_logs() {
                    tracing::warn!(message = %log.message, fields = ?log.fields, "orphaned response");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_logs_produces_one_record_per_orphan() {
        let reporter = OrphanResponseReporter::new(4);
        reporter.record(OrphanedResponse {
            service: "kv".to_string(),
            operation: "get".to_string(),
            opaque: Some(7),
            server_duration: Some(Duration::from_micros(500)),
            peer: "10.0.0.1:11210".to_string(),
        });
        let logs = reporter.drain_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].fields.get("opaque").unwrap(), &serde_json::json!(7));
        assert!(reporter.drain_logs().is_empty());
    }
}
