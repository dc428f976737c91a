//! Replica-consistency coordinator
//!
//! The coordinator is responsible for:
//! - Placement decisions (HRW over the known nodes)
//! - Quorum reads and writes at a requested consistency level
//! - Conflict resolution between diverging replicas
//! - Read repair of stale replicas
//! - Holding writes until the local schema caught up

pub mod consistency;
pub mod http;
pub mod placement;
pub mod quorum;
pub mod repair;
pub mod replica_client;
pub mod resolver;
pub mod schema;
pub mod server;

pub use consistency::{Coordinator, OpContext, Operation, OperationOutput};
pub use replica_client::{
    HttpReplicaClient, LocalReplicaClient, ReplicaClient, ReplicaError, ReplicaSet,
};
pub use resolver::{resolve, Outcome, Reply, ReplicaResponse, Resolution, Verdict, Winner};
pub use schema::{ClassDef, DataType, PropertyDef, SchemaBarrier, SchemaCache, SchemaReader};
pub use server::NodeServer;
