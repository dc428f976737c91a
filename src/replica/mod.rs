//! Replica node
//!
//! The node side of replication: an in-memory, version-comparing object
//! store plus the internal HTTP API coordinators use to reach it. A node
//! only applies a write or repair when it supersedes the stored record, so
//! replaying a repair is a no-op.

pub mod http;
pub mod store;

use crate::common::{DeletionStrategy, Object, ObjectKey, Version};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

pub use store::ReplicaStore;

/// How a node applies an incoming object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Store as is (put, repair)
    #[default]
    Upsert,
    /// Replace a live object, keeping its incarnation
    Update,
    /// Merge properties into a live object
    Merge,
}

/// Put sub-request sent to one replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutRequest {
    pub object: Object,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub mode: WriteMode,
    pub strategy: DeletionStrategy,
}

/// Delete sub-request sent to one replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub key: ObjectKey,
    pub version: Version,
    #[serde(default)]
    pub tenant: Option<String>,
    pub strategy: DeletionStrategy,
}

/// Replica acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
    /// False when the stored record already superseded the write
    pub applied: bool,
    /// Version held by the node after the write
    pub version: Version,
}

/// One replica node: its store and whether it is reachable
#[derive(Debug)]
pub struct ReplicaNode {
    id: String,
    store: ReplicaStore,
    online: AtomicBool,
}

impl ReplicaNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            store: ReplicaStore::new(),
            online: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn store(&self) -> &ReplicaStore {
        &self.store
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Take the node off the network (its data survives) or bring it back
    pub fn set_online(&self, online: bool) {
        tracing::info!(node = %self.id, online, "replica availability changed");
        self.online.store(online, Ordering::Release);
    }
}
