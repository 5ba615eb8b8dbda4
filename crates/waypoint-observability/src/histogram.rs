use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// Running latency aggregate for one (service, operation) pair. Tracks
/// count/min/max/sum so a `HistogramReport` can be produced without keeping
/// every individual sample.
#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    count: u64,
    sum_micros: u128,
    min_micros: u64,
    max_micros: u64,
}

impl Bucket {
    fn observe(&mut self, latency: Duration) {
        let micros = latency.as_micros() as u64;
        if self.count == 0 {
            self.min_micros = micros;
            self.max_micros = micros;
        } else {
            self.min_micros = self.min_micros.min(micros);
            self.max_micros = self.max_micros.max(micros);
        }
        self.count += 1;
        self.sum_micros += micros as u128;
    }

    fn report(&self) -> HistogramReport {
        let mean_micros = if self.count == 0 {
            0
        } else {
            (self.sum_micros / self.count as u128) as u64
        };
        HistogramReport {
            count: self.count,
            min: Duration::from_micros(self.min_micros),
            max: Duration::from_micros(self.max_micros),
            mean: Duration::from_micros(mean_micros),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HistogramReport {
    pub count: u64,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
}

/// Per-(service, operation) latency aggregation, flushed periodically by the
/// caller (an interval task in the top-level cluster handle) and reset on
/// each flush rather than accumulating forever.
#[derive(Default)]
pub struct LatencyHistograms {
    buckets: Mutex<BTreeMap<(String, String), Bucket>>,
}

impl LatencyHistograms {
    pub fn new() -> Self {
        LatencyHistograms::default()
    }

    pub fn record(&self, service: &str, operation: &str, latency: Duration) {
        let mut buckets = self.buckets.lock().unwrap();
        buckets
            .entry((service.to_string(), operation.to_string()))
            .or_default()
            .observe(latency);
    }

    /// Snapshot current aggregates and reset them to empty.
    pub fn flush(&self) -> BTreeMap<(String, String), HistogramReport> {
        let mut buckets = self.buckets.lock().unwrap();
        std::mem::take(&mut *buckets)
            .into_iter()
            .map(|(key, bucket)| (key, bucket.report()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_min_max_mean() {
        let histograms = LatencyHistograms::new();
        histograms.record("kv", "get", Duration::from_millis(10));
        histograms.record("kv", "get", Duration::from_millis(20));
        histograms.record("kv", "get", Duration::from_millis(30));

        let report = histograms.flush();
        let stats = report.get(&("kv".to_string(), "get".to_string())).unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, Duration::from_millis(10));
        assert_eq!(stats.max, Duration::from_millis(30));
        assert_eq!(stats.mean, Duration::from_millis(20));
    }

    #[test]
    fn flush_resets_state() {
        let histograms = LatencyHistograms::new();
        histograms.record("kv", "get", Duration::from_millis(1));
        assert_eq!(histograms.flush().len(), 1);
        assert!(histograms.flush().is_empty());
    }
}
