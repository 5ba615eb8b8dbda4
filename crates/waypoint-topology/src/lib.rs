//! Cluster topology: the per-bucket configuration document, key-to-node
//! routing, HTTP service endpoint selection, and the connection-string /
//! configuration-profile layer that seeds a cluster's [`ClusterOptions`].

mod map;
mod options;
mod router;

pub use map::{ClusterMap, Node, Revision, ServiceType, VbucketMap};
pub use options::{
    configuration_profile, parse_connection_string, ClusterOptions, ConnectionSpec, Error,
};
pub use router::Router;

pub const DEFAULT_NUM_VBUCKETS: u16 = 1024;
