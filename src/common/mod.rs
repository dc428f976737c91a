//! Common utilities and types shared across replikv

pub mod auth;
pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod object;
pub mod replication;
pub mod utils;

pub use auth::{AllowAll, Authorizer, Principal, Role, RoleAuthorizer, Verb};
pub use config::{Config, PeerConfig, ReplicationSettings};
pub use error::{Error, Result};
pub use hash::{hrw_hash, select_replicas};
pub use metrics::ReplicationMetrics;
pub use object::{
    CrossRef, Object, ObjectKey, PropertyValue, Record, RecordDigest, Reference, Version,
};
pub use replication::{ConsistencyLevel, DeletionStrategy, ReplicationConfig};
pub use utils::{
    parse_duration, timestamp_now_millis, validate_class_name, validate_property_name,
    validate_tenant, VersionClock,
};
