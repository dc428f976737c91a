//! Replica placement using HRW hashing
//!
//! Every object key maps to the same ordered replica set on every
//! coordinator, as long as they agree on the node list.

use crate::common::{select_replicas, ObjectKey, Result};

/// Selects the nodes holding a key
#[derive(Debug, Clone)]
pub struct PlacementManager {
    nodes: Vec<String>,
}

impl PlacementManager {
    pub fn new(mut nodes: Vec<String>) -> Self {
        nodes.sort();
        nodes.dedup();
        Self { nodes }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Select `factor` nodes for `key`, tenant scoped.
    pub fn select(&self, key: &ObjectKey, tenant: Option<&str>, factor: usize) -> Result<Vec<String>> {
        if self.nodes.len() < factor {
            return Err(crate::Error::InsufficientReplicas {
                needed: factor,
                available: self.nodes.len(),
            });
        }
        Ok(select_replicas(
            &key.placement_key(tenant),
            &self.nodes,
            factor,
        ))
    }
}
