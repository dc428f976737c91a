//! Replication settings attached to classes and requests

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Consistency level requested by the caller, never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsistencyLevel {
    One,
    #[default]
    Quorum,
    All,
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyLevel::One => write!(f, "ONE"),
            ConsistencyLevel::Quorum => write!(f, "QUORUM"),
            ConsistencyLevel::All => write!(f, "ALL"),
        }
    }
}

impl FromStr for ConsistencyLevel {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ONE" => Ok(ConsistencyLevel::One),
            "QUORUM" => Ok(ConsistencyLevel::Quorum),
            "ALL" => Ok(ConsistencyLevel::All),
            other => Err(crate::Error::ValidationFailed(format!(
                "unknown consistency level: {}",
                other
            ))),
        }
    }
}

/// How delete-vs-update conflicts are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeletionStrategy {
    #[default]
    NoAutomatedResolution,
    DeleteOnConflict,
    TimeBasedResolution,
}

impl fmt::Display for DeletionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeletionStrategy::NoAutomatedResolution => "NoAutomatedResolution",
            DeletionStrategy::DeleteOnConflict => "DeleteOnConflict",
            DeletionStrategy::TimeBasedResolution => "TimeBasedResolution",
        };
        f.write_str(s)
    }
}

impl FromStr for DeletionStrategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "NoAutomatedResolution" => Ok(DeletionStrategy::NoAutomatedResolution),
            "DeleteOnConflict" => Ok(DeletionStrategy::DeleteOnConflict),
            "TimeBasedResolution" => Ok(DeletionStrategy::TimeBasedResolution),
            other => Err(crate::Error::ValidationFailed(format!(
                "unknown deletion strategy: {}",
                other
            ))),
        }
    }
}

/// Per-class replication config, part of the versioned class definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Number of replicas
    #[serde(default = "default_factor")]
    pub factor: usize,

    #[serde(default)]
    pub deletion_strategy: DeletionStrategy,
}

fn default_factor() -> usize {
    1
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            factor: default_factor(),
            deletion_strategy: DeletionStrategy::default(),
        }
    }
}

impl ReplicationConfig {
    pub fn new(factor: usize, deletion_strategy: DeletionStrategy) -> Self {
        Self {
            factor,
            deletion_strategy,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.factor < 1 {
            return Err(crate::Error::ValidationFailed(
                "replication factor must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
