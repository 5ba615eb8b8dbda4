use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use waypoint_observability::{LatencyHistograms, OrphanResponseReporter, ThresholdLogReporter};

const HISTOGRAM_FLUSH_INTERVAL: Duration = Duration::from_secs(600);
const REPORTER_INTERVAL: Duration = Duration::from_secs(60);
const REPORTER_CAPACITY: usize = 256;
const SLOW_OPERATION_THRESHOLD: Duration = Duration::from_millis(500);

/// Latency histograms plus one slow-operation threshold reporter per
/// service, owned by the top-level [`crate::Cluster`] and fed by every KV
/// and HTTP dispatch path. The orphaned-response reporter is constructed
/// and reported on the same interval, and is fed from `waypoint-net`'s
/// session via the dependency-free `OrphanHandler` callback (see
/// `bucket.rs::session_for`), so `waypoint-net` itself never needs to
/// depend on `waypoint-observability`.
pub(crate) struct Metrics {
    pub histograms: Arc<LatencyHistograms>,
    pub orphans: Arc<OrphanResponseReporter>,
    thresholds: HashMap<&'static str, Arc<ThresholdLogReporter>>,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        let mut thresholds = HashMap::new();
        for service in ["kv", "query", "analytics", "search", "views"] {
            thresholds.insert(
                service,
                Arc::new(ThresholdLogReporter::new(
                    service,
                    SLOW_OPERATION_THRESHOLD,
                    REPORTER_CAPACITY,
                )),
            );
        }
        Arc::new(Metrics {
            histograms: Arc::new(LatencyHistograms::new()),
            orphans: Arc::new(OrphanResponseReporter::new(REPORTER_CAPACITY)),
            thresholds,
        })
    }

    pub fn record(&self, service: &str, operation: &str, peer: &str, latency: Duration) {
        self.histograms.record(service, operation, latency);
        if let Some(reporter) = self.thresholds.get(service) {
            reporter.observe(operation, latency, peer);
        }
    }

    /// Spawn the background tasks that periodically flush and log every
    /// reporter. Called once from [`crate::Cluster::connect`].
    pub fn spawn_reporting(self: &Arc<Self>) {
        self.orphans.clone().spawn_reporting(REPORTER_INTERVAL);
        for reporter in self.thresholds.values() {
            reporter.clone().spawn_reporting(REPORTER_INTERVAL);
        }
        let histograms = self.histograms.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HISTOGRAM_FLUSH_INTERVAL);
            loop {
                ticker.tick().await;
                for ((service, operation), report) in histograms.flush() {
                    tracing::info!(
                        service,
                        operation,
                        count = report.count,
                        mean_us = report.mean.as_micros() as u64,
                        min_us = report.min.as_micros() as u64,
                        max_us = report.max.as_micros() as u64,
                        "latency histogram flush"
                    );
                }
            }
        });
    }
}
