//! Configuration for a replikv node
//!
//! Loaded from an optional TOML file, then `REPLIKV__*` environment
//! variables (e.g. `REPLIKV__REPLICATION__REQUEST_TIMEOUT=2s`).

use crate::common::{parse_duration, ConsistencyLevel, Result};
use crate::coordinator::schema::ClassDef;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier, also the replica name)
    pub node_id: String,

    /// Bind address for the public and replica HTTP APIs
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Other replica nodes
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    #[serde(default)]
    pub replication: ReplicationSettings,

    /// Class definitions loaded into the schema cache at startup
    #[serde(default)]
    pub classes: Vec<ClassDef>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// A remote replica node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: String,
    /// Base URL, e.g. `http://10.0.0.2:7000`
    pub url: String,
}

impl std::str::FromStr for PeerConfig {
    type Err = crate::Error;

    /// Parse `id=url`
    fn from_str(s: &str) -> Result<Self> {
        let (id, url) = s
            .split_once('=')
            .ok_or_else(|| crate::Error::InvalidConfig(format!("peer must be id=url: {}", s)))?;
        if id.is_empty() || url.is_empty() {
            return Err(crate::Error::InvalidConfig(format!(
                "peer must be id=url: {}",
                s
            )));
        }
        Ok(Self {
            id: id.to_string(),
            url: url.trim_end_matches('/').to_string(),
        })
    }
}

/// Coordinator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// Deadline applied to every coordinated operation
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    /// How long a write waits for the local schema to catch up
    #[serde(default = "default_schema_wait_timeout")]
    pub schema_wait_timeout: String,

    /// Maximum concurrent repair writes
    #[serde(default = "default_repair_concurrency")]
    pub repair_concurrency: usize,

    /// Maximum background repairs waiting or running
    #[serde(default = "default_repair_queue_capacity")]
    pub repair_queue_capacity: usize,

    /// Level used when a request does not name one
    #[serde(default)]
    pub default_level: ConsistencyLevel,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7000))
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_request_timeout() -> String {
    "5s".to_string()
}
fn default_schema_wait_timeout() -> String {
    "2s".to_string()
}
fn default_repair_concurrency() -> usize {
    8
}
fn default_repair_queue_capacity() -> usize {
    1024
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            schema_wait_timeout: default_schema_wait_timeout(),
            repair_concurrency: default_repair_concurrency(),
            repair_queue_capacity: default_repair_queue_capacity(),
            default_level: ConsistencyLevel::default(),
        }
    }
}

impl ReplicationSettings {
    pub fn request_timeout(&self) -> Result<Duration> {
        parse_duration(&self.request_timeout)
    }

    pub fn schema_wait_timeout(&self) -> Result<Duration> {
        parse_duration(&self.schema_wait_timeout)
    }

    pub fn validate(&self) -> Result<()> {
        self.request_timeout()?;
        self.schema_wait_timeout()?;
        if self.repair_concurrency == 0 || self.repair_queue_capacity == 0 {
            return Err(crate::Error::InvalidConfig(
                "repair_concurrency and repair_queue_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Minimal config for a node with no file
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            bind_addr: default_bind_addr(),
            peers: Vec::new(),
            replication: ReplicationSettings::default(),
            classes: Vec::new(),
            log_level: default_log_level(),
        }
    }

    /// Load from an optional TOML file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("REPLIKV")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(crate::Error::InvalidConfig("node_id is required".into()));
        }
        if self.peers.iter().any(|p| p.id == self.node_id) {
            return Err(crate::Error::InvalidConfig(format!(
                "node {} is listed as its own peer",
                self.node_id
            )));
        }
        self.replication.validate()?;
        for class in &self.classes {
            class.validate()?;
        }
        Ok(())
    }
}
