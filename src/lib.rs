//! # replikv
//!
//! Replica-consistency coordination for replicated objects:
//! - Quorum reads and writes at ONE, QUORUM or ALL
//! - Conflict resolution with per-class deletion strategies
//! - Background read repair of stale replicas
//! - A schema version barrier in front of every write
//!
//! ## Architecture
//!
//! ```text
//!             caller (HTTP /v1/objects or Coordinator API)
//!                          │
//! ┌────────────────────────▼────────────────────────┐
//! │                  Coordinator                    │
//! │  validate + authorize → schema barrier          │
//! │  HRW placement → fan-out → quorum → resolve     │
//! └───────┬──────────────────┬─────────────┬────────┘
//!         │ replica API      │             │  read repair
//! ┌───────▼────┐   ┌─────────▼──┐   ┌──────▼─────┐  (background,
//! │  Node 1    │   │  Node 2    │   │  Node 3    │   bounded)
//! │  records + │   │  records + │   │  records + │
//! │ tombstones │   │ tombstones │   │ tombstones │
//! └────────────┘   └────────────┘   └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a three node cluster
//! ```bash
//! replikv-node serve --id node1 --bind 0.0.0.0:7001 \
//!   --peers node2=http://localhost:7002,node3=http://localhost:7003 \
//!   --config ./replikv.toml
//! ```
//!
//! ### Talk to any node
//! ```bash
//! curl -X POST 'localhost:7001/v1/objects?consistency_level=ALL' -d @paragraph.json
//! curl 'localhost:7002/v1/objects/Paragraph/<uuid>?consistency_level=ONE'
//! curl -X DELETE 'localhost:7003/v1/objects/Paragraph/<uuid>'
//! ```

#![allow(clippy::result_large_err)]

pub mod common;
pub mod coordinator;
pub mod replica;

// Re-export commonly used types
pub use common::{Config, ConsistencyLevel, DeletionStrategy, Error, Object, ObjectKey, Result};
pub use coordinator::{Coordinator, NodeServer, OpContext};
pub use replica::ReplicaNode;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
