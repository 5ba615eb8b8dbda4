use crate::map::ServiceType;
use crate::ClusterMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

/// Owns the current `ClusterMap` for one bucket (or the pre-bucket-open
/// cluster-level config) and resolves routing decisions against it.
///
/// Reads are wait-free: callers clone the held `Arc` for the duration of one
/// operation. Updates are serialized by whichever task calls
/// [`Router::update`] (normally the session that received the new config on
/// its server-push channel).
pub struct Router {
    state: RwLock<Arc<ClusterMap>>,
    changed: watch::Sender<Arc<ClusterMap>>,
    round_robin: AtomicUsize,
    tls: bool,
}

impl Router {
    pub fn new(initial: ClusterMap, tls: bool) -> Self {
        let initial = Arc::new(initial);
        let (changed, _) = watch::channel(initial.clone());
        Router {
            state: RwLock::new(initial),
            changed,
            round_robin: AtomicUsize::new(0),
            tls,
        }
    }

    pub fn current(&self) -> Arc<ClusterMap> {
        self.state.read().unwrap().clone()
    }

    /// Subscribe to topology changes, used by sessions (`waypoint-net`) to
    /// notice when the node list they're attached to has moved.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ClusterMap>> {
        self.changed.subscribe()
    }

    /// Apply `new` if its revision is strictly greater than the held map's.
    /// Returns whether the swap happened.
    #[tracing::instrument(skip(self, new), fields(new_revision = ?new.revision))]
    pub fn update(&self, new: ClusterMap) -> bool {
        let mut guard = self.state.write().unwrap();
        if !guard.should_replace_with(&new) {
            tracing::debug!(held = ?guard.revision, "discarding stale cluster map");
            return false;
        }
        let new = Arc::new(new);
        *guard = new.clone();
        drop(guard);
        let _ = self.changed.send(new);
        true
    }

    pub fn select_node_for_key(&self, key: &[u8]) -> Option<(usize, u16)> {
        self.current().select_node_for_key(key)
    }

    /// Pick one endpoint of `service` among nodes reported healthy by
    /// `is_healthy` (normally backed by a per-node `CircuitBreaker`), using
    /// round robin to spread load across the remainder.
    pub fn select_endpoint(
        &self,
        service: ServiceType,
        is_healthy: impl Fn(usize) -> bool,
    ) -> Option<String> {
        let map = self.current();
        let candidates: Vec<(usize, &crate::map::Node)> = map
            .nodes
            .iter()
            .enumerate()
            .filter(|(idx, node)| node.endpoint(service, self.tls).is_some() && is_healthy(*idx))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let pick = self.round_robin.fetch_add(1, Ordering::Relaxed) % candidates.len();
        let (_, node) = candidates[pick];
        node.endpoint(service, self.tls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{Node, Revision};
    use std::collections::HashMap;

    fn node_with(service: ServiceType, port: u16) -> Node {
        let mut ports = HashMap::new();
        ports.insert(service, port);
        Node {
            hostname: "127.0.0.1".to_string(),
            ports,
            tls_ports: HashMap::new(),
        }
    }

    fn map(rev: u64, nodes: Vec<Node>) -> ClusterMap {
        ClusterMap {
            revision: Revision { epoch: 0, rev },
            nodes,
            vbuckets: None,
            cluster_capabilities: vec![],
            bucket_capabilities: vec![],
        }
    }

    #[test]
    fn update_discards_non_increasing_revisions() {
        let router = Router::new(map(5, vec![]), false);
        assert!(!router.update(map(5, vec![])));
        assert!(!router.update(map(4, vec![])));
        assert!(router.update(map(6, vec![])));
        assert_eq!(router.current().revision.rev, 6);
    }

    #[test]
    fn select_endpoint_round_robins_over_healthy_nodes() {
        let nodes = vec![
            node_with(ServiceType::Query, 8093),
            node_with(ServiceType::Query, 8094),
        ];
        let router = Router::new(map(1, nodes), false);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..4 {
            seen.insert(router.select_endpoint(ServiceType::Query, |_| true).unwrap());
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn select_endpoint_skips_unhealthy_nodes() {
        let nodes = vec![
            node_with(ServiceType::Query, 8093),
            node_with(ServiceType::Query, 8094),
        ];
        let router = Router::new(map(1, nodes), false);
        let endpoint = router
            .select_endpoint(ServiceType::Query, |idx| idx == 1)
            .unwrap();
        assert!(endpoint.ends_with("8094"));
    }
}
