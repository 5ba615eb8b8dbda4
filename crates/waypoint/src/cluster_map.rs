use crate::Error;
use waypoint_topology::{ClusterMap, Node, Revision, ServiceType, VbucketMap};

/// Decode a GET_CLUSTER_CONFIG response body into a [`ClusterMap`]. The
/// server's JSON carries `nodesExt[].hostname` only for nodes other than the
/// one serving the config; an absent hostname means "this node", filled in
/// with `fallback_hostname` (the address this config was fetched from).
pub fn parse_cluster_config(body: &[u8], fallback_hostname: &str) -> Result<ClusterMap, Error> {
    let doc: serde_json::Value = serde_json::from_slice(body)?;

    let rev = doc.get("rev").and_then(|v| v.as_u64()).unwrap_or(0);
    let rev_epoch = doc.get("revEpoch").and_then(|v| v.as_u64()).unwrap_or(0);

    let nodes_ext = doc
        .get("nodesExt")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::MalformedClusterConfig("missing nodesExt".to_string()))?;

    let nodes = nodes_ext
        .iter()
        .map(|entry| parse_node(entry, fallback_hostname))
        .collect::<Result<Vec<_>, _>>()?;

    let vbuckets = doc
        .get("vBucketServerMap")
        .map(parse_vbucket_map)
        .transpose()?;

    let cluster_capabilities = string_list(doc.get("clusterCapabilities"));
    let bucket_capabilities = string_list(doc.get("bucketCapabilities"));

    Ok(ClusterMap {
        revision: Revision {
            epoch: rev_epoch,
            rev,
        },
        nodes,
        vbuckets,
        cluster_capabilities,
        bucket_capabilities,
    })
}

fn parse_node(entry: &serde_json::Value, fallback_hostname: &str) -> Result<Node, Error> {
    let hostname = entry
        .get("hostname")
        .and_then(|v| v.as_str())
        .unwrap_or(fallback_hostname)
        .to_string();

    let services = entry
        .get("services")
        .and_then(|v| v.as_object())
        .ok_or_else(|| Error::MalformedClusterConfig("node missing services".to_string()))?;

    let mut ports = std::collections::HashMap::new();
    let mut tls_ports = std::collections::HashMap::new();
    for (key, service, tls) in [
        ("kv", ServiceType::KeyValue, false),
        ("kvSSL", ServiceType::KeyValue, true),
        ("n1ql", ServiceType::Query, false),
        ("n1qlSSL", ServiceType::Query, true),
        ("cbas", ServiceType::Analytics, false),
        ("cbasSSL", ServiceType::Analytics, true),
        ("fts", ServiceType::Search, false),
        ("ftsSSL", ServiceType::Search, true),
        ("capi", ServiceType::Views, false),
        ("capiSSL", ServiceType::Views, true),
        ("mgmt", ServiceType::Management, false),
        ("mgmtSSL", ServiceType::Management, true),
        ("eventingAdminPort", ServiceType::Eventing, false),
        ("eventingSSL", ServiceType::Eventing, true),
    ] {
        if let Some(port) = services.get(key).and_then(|v| v.as_u64()) {
            let target = if tls { &mut tls_ports } else { &mut ports };
            target.insert(service, port as u16);
        }
    }

    Ok(Node {
        hostname,
        ports,
        tls_ports,
    })
}

fn parse_vbucket_map(doc: &serde_json::Value) -> Result<VbucketMap, Error> {
    let map = doc
        .get("vBucketMap")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::MalformedClusterConfig("missing vBucketMap".to_string()))?
        .iter()
        .map(|row| {
            row.as_array()
                .map(|row| {
                    row.iter()
                        .filter_map(|idx| idx.as_i64())
                        .map(|idx| idx as i32)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        })
        .collect::<Vec<_>>();

    let num_replicas = doc
        .get("numReplicas")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u8;

    Ok(VbucketMap {
        num_vbuckets: map.len() as u16,
        num_replicas,
        map,
    })
}

fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(serde_json::Value::Object(map)) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_single_node_config() {
        let body = serde_json::json!({
            "rev": 12,
            "revEpoch": 1,
            "nodesExt": [
                { "services": { "kv": 11210, "n1ql": 8093 } }
            ],
            "vBucketServerMap": {
                "numReplicas": 1,
                "vBucketMap": [[0, -1], [0, -1]]
            },
            "bucketCapabilities": ["collections", "durableWrite"]
        })
        .to_string();

        let map = parse_cluster_config(body.as_bytes(), "127.0.0.1").unwrap();
        assert_eq!(map.revision, Revision { epoch: 1, rev: 12 });
        assert_eq!(map.nodes.len(), 1);
        assert_eq!(map.nodes[0].hostname, "127.0.0.1");
        assert_eq!(
            map.nodes[0].ports.get(&ServiceType::KeyValue),
            Some(&11210)
        );
        assert!(map.has_bucket_capability("collections"));
        assert_eq!(map.vbuckets.unwrap().num_vbuckets, 2);
    }

    #[test]
    fn missing_vbucket_map_yields_none() {
        let body = serde_json::json!({
            "rev": 1,
            "nodesExt": [{ "services": { "kv": 11210 } }],
        })
        .to_string();
        let map = parse_cluster_config(body.as_bytes(), "127.0.0.1").unwrap();
        assert!(map.vbuckets.is_none());
    }
}
