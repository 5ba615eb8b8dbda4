//! Tracing conventions, latency aggregation, and the two fixed-capacity
//! reporters (orphaned responses, slow-operation thresholds) the core uses to
//! surface operational signal without depending on any particular metrics
//! backend. Wires a plain `tracing-subscriber` `registry()` with an
//! `EnvFilter` and a `fmt` layer, with a compact structured log record shape
//! (timestamp, level, message, fields) shared by the two reporters.

mod histogram;
mod init;
mod log;
mod orphan;
mod queue;
mod span;
mod threshold;

pub use histogram::{HistogramReport, LatencyHistograms};
pub use init::init_tracing;
pub use log::OperationLog;
pub use orphan::{OrphanResponseReporter, OrphanedResponse};
pub use queue::FixedCapacityQueue;
pub use span::attempt_span;
pub use threshold::{SlowOperation, ThresholdLogReporter};
