//! A native client for a distributed document database: a binary
//! key-value protocol over [`waypoint_net`], HTTP query/analytics/search/
//! views services over [`waypoint_http`], cluster topology and routing via
//! [`waypoint_topology`], retry and circuit-breaking via [`waypoint_retry`],
//! and multi-document ACID transactions via [`waypoint_txn`].
//!
//! [`Cluster`] is the single entry point: it dials a seed node, learns the
//! cluster topology, and hands out [`BucketHandle`]s for key-value access,
//! streaming readers for the HTTP services, and a [`waypoint_txn::Transactions`]
//! runner wired to a [`WireDocumentStore`] for transactions spanning
//! multiple documents and buckets.

mod bucket;
mod cluster;
mod cluster_map;
mod diagnostics;
mod error;
mod metrics;
mod model;
mod txn_store;

pub use bucket::BucketHandle;
pub use cluster::{Cluster, ServiceRequest};
pub use error::Error;
pub use model::{
    Cas, CollectionManifestEntry, CollectionsManifest, CommonFlag, Credentials, DiagnosticsReport,
    DocumentId, EncodedValue, MutationToken, PingResult, PingState, ScopeManifest,
    SessionDiagnostics,
};
pub use txn_store::WireDocumentStore;

pub use waypoint_http::RowReader;
pub use waypoint_txn::{
    AtrEntry, AttemptContext, DurabilityLevel, OperationError, StoreError, TransactionConfig,
    TransactionError, Transactions, TxnDocument,
};

use std::sync::Arc;

impl Cluster {
    /// Build a [`waypoint_txn::Transactions`] runner over this cluster's
    /// buckets. The runner drives every attempt through a
    /// [`WireDocumentStore`] wrapping this same `Cluster`, so staged
    /// mutations are ordinary KV operations against the buckets already
    /// opened through [`Cluster::bucket`]. Pass a [`TransactionConfig`] to
    /// each [`Transactions::run`] call.
    pub fn transactions(self: &Arc<Self>) -> Transactions<WireDocumentStore> {
        let store = Arc::new(WireDocumentStore::new(self.clone()));
        Transactions::new(store)
    }
}
