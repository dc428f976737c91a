//! Hashing utilities for replikv
//!
//! - HRW (Highest Random Weight) for consistent replica placement

fn weight(key: &str, node: &str) -> u64 {
    let combined = format!("{}{}", key, node);
    let hash = blake3::hash(combined.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(buf)
}

/// HRW (Highest Random Weight) hashing for replica placement
///
/// Given a key and a set of nodes, returns nodes sorted by their weight
/// (deterministic based on key). This ensures consistent placement even
/// as the cluster changes.
pub fn hrw_hash(key: &str, nodes: &[String]) -> Vec<String> {
    let mut weights: Vec<(String, u64)> = nodes
        .iter()
        .map(|node| (node.clone(), weight(key, node)))
        .collect();

    // Sort by weight (descending), node name breaks ties
    weights.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    weights.into_iter().map(|(node, _)| node).collect()
}

/// Select N replicas using HRW hashing
pub fn select_replicas(key: &str, nodes: &[String], n: usize) -> Vec<String> {
    let sorted = hrw_hash(key, nodes);
    sorted.into_iter().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("node{}", i)).collect()
    }

    #[test]
    fn test_hrw_hash_consistent() {
        let nodes = nodes(3);
        let sorted1 = hrw_hash("my-key", &nodes);
        let sorted2 = hrw_hash("my-key", &nodes);

        assert_eq!(sorted1, sorted2);
        assert_eq!(sorted1.len(), 3);
    }

    #[test]
    fn test_hrw_hash_different_keys() {
        let nodes = nodes(8);
        let orderings: std::collections::HashSet<Vec<String>> = (0..16)
            .map(|i| hrw_hash(&format!("key{}", i), &nodes))
            .collect();

        // Different keys should produce different orderings
        assert!(orderings.len() > 1);
    }

    #[test]
    fn test_select_replicas() {
        let replicas = select_replicas("test-key", &nodes(4), 2);
        assert_eq!(replicas.len(), 2);
        assert_ne!(replicas[0], replicas[1]);
    }

    #[test]
    fn test_select_replicas_stable_when_node_removed() {
        let all = nodes(5);
        let chosen = select_replicas("stable-key", &all, 2);
        let survivors: Vec<String> = all
            .iter()
            .filter(|n| **n != chosen[1])
            .cloned()
            .collect();

        // Removing the second choice keeps the first one in place
        assert_eq!(select_replicas("stable-key", &survivors, 1)[0], chosen[0]);
    }
}
