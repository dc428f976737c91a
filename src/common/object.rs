//! Object data model shared by the coordinator and the replica nodes
//!
//! - `Object`: class + UUID, typed property map, vectors, versions
//! - `Record`: what a node stores for one key (live object or tombstone)
//! - `RecordDigest`: record metadata without the payload

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Logical version of a record (milliseconds, strictly increasing per coordinator)
pub type Version = u64;

/// Scheme used by reference beacons
pub const BEACON_SCHEME: &str = "replikv://localhost/";

/// Identity of an object inside a shard
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub class: String,
    pub id: Uuid,
}

impl ObjectKey {
    pub fn new(class: impl Into<String>, id: Uuid) -> Self {
        Self {
            class: class.into(),
            id,
        }
    }

    /// Placement key, tenant scoped when a tenant is given
    pub fn placement_key(&self, tenant: Option<&str>) -> String {
        match tenant {
            Some(t) => format!("{}/{}/{}", t, self.class, self.id),
            None => format!("{}/{}", self.class, self.id),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class, self.id)
    }
}

/// A cross reference to another object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub beacon: String,
}

/// Parsed form of a reference beacon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossRef {
    pub class: Option<String>,
    pub id: Uuid,
}

impl Reference {
    pub fn to(class: &str, id: Uuid) -> Self {
        Self {
            beacon: format!("{}{}/{}", BEACON_SCHEME, class, id),
        }
    }

    /// Parse `replikv://localhost/<Class>/<uuid>` or the class-less
    /// `replikv://localhost/<uuid>`
    pub fn parse(&self) -> crate::Result<CrossRef> {
        let rest = self.beacon.strip_prefix(BEACON_SCHEME).ok_or_else(|| {
            crate::Error::ValidationFailed(format!("invalid beacon: {}", self.beacon))
        })?;
        let parts: Vec<&str> = rest.split('/').collect();
        let (class, id) = match parts.as_slice() {
            [id] => (None, *id),
            [class, id] if !class.is_empty() => (Some(class.to_string()), *id),
            _ => {
                return Err(crate::Error::ValidationFailed(format!(
                    "invalid beacon: {}",
                    self.beacon
                )))
            }
        };
        let id = Uuid::parse_str(id).map_err(|e| {
            crate::Error::ValidationFailed(format!("invalid beacon id {}: {}", id, e))
        })?;
        Ok(CrossRef { class, id })
    }
}

/// Closed set of property value variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Text(String),
    Int(i64),
    Number(f64),
    Bool(bool),
    References(Vec<Reference>),
    Vector(Vec<f32>),
}

/// A data object as stored on a replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub class: String,
    pub id: Uuid,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vectors: BTreeMap<String, Vec<f32>>,
    /// Version at which this incarnation was created
    #[serde(default)]
    pub created_at: Version,
    /// Version of the last write
    #[serde(default)]
    pub last_update: Version,
}

impl Object {
    pub fn new(class: impl Into<String>, id: Uuid) -> Self {
        Self {
            class: class.into(),
            id,
            properties: BTreeMap::new(),
            vector: None,
            vectors: BTreeMap::new(),
            created_at: 0,
            last_update: 0,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.class.clone(), self.id)
    }

    pub fn digest(&self) -> RecordDigest {
        RecordDigest {
            version: self.last_update,
            created_at: self.created_at,
            deleted: false,
        }
    }
}

/// What a node holds for a key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Record {
    Live(Object),
    Tombstone { deleted_at: Version },
}

impl Record {
    pub fn version(&self) -> Version {
        match self {
            Record::Live(obj) => obj.last_update,
            Record::Tombstone { deleted_at } => *deleted_at,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, Record::Tombstone { .. })
    }

    pub fn digest(&self) -> RecordDigest {
        match self {
            Record::Live(obj) => obj.digest(),
            Record::Tombstone { deleted_at } => RecordDigest::tombstone(*deleted_at),
        }
    }

    pub fn into_object(self) -> Option<Object> {
        match self {
            Record::Live(obj) => Some(obj),
            Record::Tombstone { .. } => None,
        }
    }
}

/// Record metadata, enough to resolve conflicts without the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDigest {
    pub version: Version,
    pub created_at: Version,
    pub deleted: bool,
}

impl RecordDigest {
    pub fn live(version: Version, created_at: Version) -> Self {
        Self {
            version,
            created_at,
            deleted: false,
        }
    }

    pub fn tombstone(deleted_at: Version) -> Self {
        Self {
            version: deleted_at,
            created_at: deleted_at,
            deleted: true,
        }
    }
}
