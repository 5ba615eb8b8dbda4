use std::collections::HashMap;

/// `(epoch, rev)`, compared lexicographically. A cluster map received with a
/// strictly greater revision replaces the held one; an equal or lower
/// revision is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision {
    pub epoch: u64,
    pub rev: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    KeyValue,
    Query,
    Analytics,
    Search,
    Views,
    Management,
    Eventing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub hostname: String,
    /// Port per service, absent for services this node does not run.
    pub ports: HashMap<ServiceType, u16>,
    pub tls_ports: HashMap<ServiceType, u16>,
}

impl Node {
    pub fn endpoint(&self, service: ServiceType, tls: bool) -> Option<String> {
        let port_map = if tls { &self.tls_ports } else { &self.ports };
        let port = port_map.get(&service)?;
        let scheme = if tls { "https" } else { "http" };
        Some(format!("{scheme}://{}:{port}", self.hostname))
    }
}

/// Maps a vbucket id to its active node index and, for replica reads, the
/// ordered list of replica node indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VbucketMap {
    pub num_vbuckets: u16,
    pub num_replicas: u8,
    /// `vbucket_id -> [active_index, replica_index, ...]`. A `-1` entry means
    /// "not currently assigned".
    pub map: Vec<Vec<i32>>,
}

impl VbucketMap {
    pub fn vbucket_for(&self, key: &[u8]) -> u16 {
        (crc32fast::hash(key) as u64 % self.num_vbuckets as u64) as u16
    }

    pub fn active_node(&self, vbucket_id: u16) -> Option<usize> {
        let row = self.map.get(vbucket_id as usize)?;
        match row.first() {
            Some(&idx) if idx >= 0 => Some(idx as usize),
            _ => None,
        }
    }

    pub fn replica_node(&self, vbucket_id: u16, replica: usize) -> Option<usize> {
        let row = self.map.get(vbucket_id as usize)?;
        match row.get(replica + 1) {
            Some(&idx) if idx >= 0 => Some(idx as usize),
            _ => None,
        }
    }
}

/// A per-bucket configuration document: revision, node list, and the
/// vbucket map. Bucket-level and cluster-level (pre-bucket-open) capability
/// lists are represented as plain string sets, since the core only ever
/// needs to test membership (e.g. `"collections"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMap {
    pub revision: Revision,
    pub nodes: Vec<Node>,
    pub vbuckets: Option<VbucketMap>,
    pub cluster_capabilities: Vec<String>,
    pub bucket_capabilities: Vec<String>,
}

impl ClusterMap {
    pub fn has_bucket_capability(&self, name: &str) -> bool {
        self.bucket_capabilities.iter().any(|c| c == name)
    }

    pub fn has_cluster_capability(&self, name: &str) -> bool {
        self.cluster_capabilities.iter().any(|c| c == name)
    }

    /// Resolve the active node index for `key`, per the vbucket map.
    /// Returns `None` if this map carries no vbucket map (e.g. a memcached
    /// bucket or pre-open cluster-level config).
    pub fn select_node_for_key(&self, key: &[u8]) -> Option<(usize, u16)> {
        let vbuckets = self.vbuckets.as_ref()?;
        let vbucket_id = vbuckets.vbucket_for(key);
        let node = vbuckets.active_node(vbucket_id)?;
        Some((node, vbucket_id))
    }

    /// Whether `new` should replace `self` per the revision-ordering
    /// invariant. Equal or lower revisions are discarded.
    pub fn should_replace_with(&self, new: &ClusterMap) -> bool {
        new.revision > self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(vbuckets: VbucketMap) -> ClusterMap {
        ClusterMap {
            revision: Revision { epoch: 0, rev: 1 },
            nodes: vec![],
            vbuckets: Some(vbuckets),
            cluster_capabilities: vec![],
            bucket_capabilities: vec!["collections".into()],
        }
    }

    #[test]
    fn routing_is_a_pure_function_of_key_and_vbucket_map() {
        let vbuckets = VbucketMap {
            num_vbuckets: 4,
            num_replicas: 1,
            map: vec![vec![0, 1], vec![1, 0], vec![0, 1], vec![1, 0]],
        };
        let map = map_with(vbuckets.clone());
        let other = map_with(vbuckets);
        assert_eq!(
            map.select_node_for_key(b"widget-1"),
            other.select_node_for_key(b"widget-1")
        );
    }

    #[test]
    fn higher_revision_replaces_lower() {
        let older = Revision { epoch: 0, rev: 3 };
        let newer = Revision { epoch: 0, rev: 4 };
        assert!(newer > older);
        let epoch_bump = Revision { epoch: 1, rev: 0 };
        assert!(epoch_bump > newer);
    }

    #[test]
    fn bucket_capability_lookup() {
        let map = map_with(VbucketMap {
            num_vbuckets: 1,
            num_replicas: 0,
            map: vec![vec![0]],
        });
        assert!(map.has_bucket_capability("collections"));
        assert!(!map.has_bucket_capability("durableWrite"));
    }
}
