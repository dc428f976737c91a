//! Versioned class definitions and the schema version barrier
//!
//! The coordinator validates writes against a class definition tagged with
//! the schema version it belongs to. Before fanning out it waits until the
//! locally applied schema has caught up with that version, so replicas never
//! receive data for a class version they cannot interpret yet.

use crate::common::{
    validate_class_name, validate_property_name, Object, PropertyValue, ReplicationConfig, Result,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Property data types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Text,
    Int,
    Number,
    Bool,
    Vector,
    /// Cross reference to objects of the listed classes
    Reference { targets: Vec<String> },
}

impl DataType {
    fn accepts(&self, value: &PropertyValue) -> bool {
        matches!(
            (self, value),
            (DataType::Text, PropertyValue::Text(_))
                | (DataType::Int, PropertyValue::Int(_))
                | (DataType::Number, PropertyValue::Number(_) | PropertyValue::Int(_))
                | (DataType::Bool, PropertyValue::Bool(_))
                | (DataType::Vector, PropertyValue::Vector(_))
                | (DataType::Reference { .. }, PropertyValue::References(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub data_type: DataType,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    /// Allowed target classes, `None` for non-reference properties
    pub fn reference_targets(&self) -> Option<&[String]> {
        match &self.data_type {
            DataType::Reference { targets } => Some(targets),
            _ => None,
        }
    }
}

/// A class definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub replication: ReplicationConfig,
    /// Objects of a multi-tenant class are always addressed with a tenant
    #[serde(default)]
    pub multi_tenancy: bool,
}

impl ClassDef {
    pub fn new(name: impl Into<String>, replication: ReplicationConfig) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            replication,
            multi_tenancy: false,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.properties.push(PropertyDef::new(name, data_type));
        self
    }

    pub fn with_multi_tenancy(mut self, enabled: bool) -> Self {
        self.multi_tenancy = enabled;
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        validate_class_name(&self.name)?;
        self.replication.validate()?;
        for (i, prop) in self.properties.iter().enumerate() {
            validate_property_name(&prop.name)?;
            if self.properties[..i].iter().any(|p| p.name == prop.name) {
                return Err(crate::Error::ValidationFailed(format!(
                    "class {} declares property {} twice",
                    self.name, prop.name
                )));
            }
            for target in prop.reference_targets().unwrap_or_default() {
                validate_class_name(target)?;
            }
        }
        Ok(())
    }

    /// Check tenant presence against the multi-tenancy flag
    pub fn check_tenant(&self, tenant: Option<&str>) -> Result<()> {
        match (self.multi_tenancy, tenant) {
            (true, None) => Err(crate::Error::ValidationFailed(format!(
                "class {} has multi-tenancy enabled, but request was without tenant",
                self.name
            ))),
            (false, Some(t)) => Err(crate::Error::ValidationFailed(format!(
                "class {} has multi-tenancy disabled, but request was with tenant {}",
                self.name, t
            ))),
            _ => Ok(()),
        }
    }

    /// Validate an object payload. Only the supplied properties are checked.
    pub fn validate_object(&self, obj: &Object) -> Result<()> {
        if obj.class != self.name {
            return Err(crate::Error::ValidationFailed(format!(
                "object class {} does not match {}",
                obj.class, self.name
            )));
        }
        for (name, value) in &obj.properties {
            let prop = self.property(name).ok_or_else(|| {
                crate::Error::ValidationFailed(format!(
                    "no such property {} in class {}",
                    name, self.name
                ))
            })?;
            if !prop.data_type.accepts(value) {
                return Err(crate::Error::ValidationFailed(format!(
                    "property {} of class {} expects {:?}",
                    name, self.name, prop.data_type
                )));
            }
            if let (Some(targets), PropertyValue::References(refs)) =
                (prop.reference_targets(), value)
            {
                for reference in refs {
                    let target = reference.parse()?;
                    if let Some(class) = &target.class {
                        if !targets.contains(class) {
                            return Err(crate::Error::ValidationFailed(format!(
                                "property {} does not accept references to class {}",
                                name, class
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// A class definition and the schema version it belongs to
#[derive(Debug, Clone)]
pub struct VersionedClass {
    pub class: Arc<ClassDef>,
    pub version: u64,
}

/// Read side of the schema manager
#[async_trait]
pub trait SchemaReader: Send + Sync {
    /// Latest known definition of `name`, possibly ahead of the applied version
    fn cached_class(&self, name: &str) -> Option<VersionedClass>;

    /// Locally applied schema version
    fn version(&self) -> u64;

    /// Resolve once the applied version reaches `version`
    async fn wait_for_version(&self, version: u64, deadline: Instant) -> Result<()>;
}

/// In-memory schema cache
#[derive(Debug)]
pub struct SchemaCache {
    classes: RwLock<HashMap<String, VersionedClass>>,
    latest: AtomicU64,
    applied: watch::Sender<u64>,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaCache {
    pub fn new() -> Self {
        let (applied, _) = watch::channel(0);
        Self {
            classes: RwLock::new(HashMap::new()),
            latest: AtomicU64::new(0),
            applied,
        }
    }

    /// Insert or replace a class and apply it immediately
    pub fn put_class(&self, class: ClassDef) -> Result<u64> {
        let version = self.stage_class(class)?;
        self.mark_applied(version);
        Ok(version)
    }

    /// Insert or replace a class at a new version without applying it
    pub fn stage_class(&self, class: ClassDef) -> Result<u64> {
        class.validate()?;
        let mut classes = self.classes.write().unwrap_or_else(PoisonError::into_inner);
        let version = self.latest.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(class = %class.name, version, "class staged");
        classes.insert(
            class.name.clone(),
            VersionedClass {
                class: Arc::new(class),
                version,
            },
        );
        Ok(version)
    }

    /// Advance the applied version, waking barrier waiters
    pub fn mark_applied(&self, version: u64) {
        let advanced = self.applied.send_if_modified(|current| {
            if version > *current {
                *current = version;
                true
            } else {
                false
            }
        });
        if advanced {
            tracing::debug!(version, "schema version applied");
        }
    }

    pub fn class_names(&self) -> Vec<String> {
        let classes = self.classes.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = classes.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl SchemaReader for SchemaCache {
    fn cached_class(&self, name: &str) -> Option<VersionedClass> {
        let classes = self.classes.read().unwrap_or_else(PoisonError::into_inner);
        classes.get(name).cloned()
    }

    fn version(&self) -> u64 {
        *self.applied.borrow()
    }

    async fn wait_for_version(&self, version: u64, deadline: Instant) -> Result<()> {
        let mut rx = self.applied.subscribe();
        let caught_up = async { rx.wait_for(|v| *v >= version).await.map(|_| ()) };
        match tokio::time::timeout_at(deadline, caught_up).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(crate::Error::Internal("schema cache dropped".into())),
            Err(_) => Err(crate::Error::SchemaVersionTimeout {
                version,
                current: self.version(),
            }),
        }
    }
}

/// Blocks writes until the local schema has caught up
#[derive(Clone)]
pub struct SchemaBarrier {
    schema: Arc<dyn SchemaReader>,
    max_wait: Duration,
}

impl SchemaBarrier {
    pub fn new(schema: Arc<dyn SchemaReader>, max_wait: Duration) -> Self {
        Self { schema, max_wait }
    }

    /// Wait for `version`, giving up at the earlier of `deadline` and the
    /// configured maximum wait
    pub async fn wait_for(&self, version: u64, deadline: Instant) -> Result<()> {
        if self.schema.version() >= version {
            return Ok(());
        }
        let deadline = deadline.min(Instant::now() + self.max_wait);
        tracing::debug!(version, current = self.schema.version(), "waiting for schema");
        self.schema.wait_for_version(version, deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{DeletionStrategy, Reference};
    use tokio_test::{assert_pending, assert_ready_ok, task};
    use uuid::Uuid;

    fn paragraph() -> ClassDef {
        ClassDef::new(
            "Paragraph",
            ReplicationConfig::new(3, DeletionStrategy::DeleteOnConflict),
        )
        .with_property("contents", DataType::Text)
        .with_property(
            "ofArticle",
            DataType::Reference {
                targets: vec!["Article".into()],
            },
        )
    }

    #[test]
    fn test_class_validation() {
        assert!(paragraph().validate().is_ok());
        assert!(ClassDef::new("paragraph", ReplicationConfig::default())
            .validate()
            .is_err());
        assert!(paragraph()
            .with_property("contents", DataType::Int)
            .validate()
            .is_err());
        assert!(ClassDef::new("Paragraph", ReplicationConfig::default())
            .with_property("_id", DataType::Text)
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_object() {
        let class = paragraph();
        let id = Uuid::new_v4();

        let ok = Object::new("Paragraph", id)
            .with_property("contents", PropertyValue::Text("x".into()))
            .with_property(
                "ofArticle",
                PropertyValue::References(vec![Reference::to("Article", Uuid::new_v4())]),
            );
        assert!(class.validate_object(&ok).is_ok());

        let wrong_type =
            Object::new("Paragraph", id).with_property("contents", PropertyValue::Int(1));
        assert!(class.validate_object(&wrong_type).is_err());

        let unknown =
            Object::new("Paragraph", id).with_property("nope", PropertyValue::Bool(true));
        assert!(class.validate_object(&unknown).is_err());

        let wrong_target = Object::new("Paragraph", id).with_property(
            "ofArticle",
            PropertyValue::References(vec![Reference::to("Paragraph", Uuid::new_v4())]),
        );
        assert!(class.validate_object(&wrong_target).is_err());
    }

    #[test]
    fn test_check_tenant() {
        let single = paragraph();
        let multi = paragraph().with_multi_tenancy(true);
        assert!(single.check_tenant(None).is_ok());
        assert!(single.check_tenant(Some("t1")).is_err());
        assert!(multi.check_tenant(Some("t1")).is_ok());
        assert!(multi.check_tenant(None).is_err());
    }

    #[test]
    fn test_versions_increase() {
        let cache = SchemaCache::new();
        let v1 = cache.put_class(paragraph()).unwrap();
        let v2 = cache
            .put_class(ClassDef::new("Article", ReplicationConfig::default()))
            .unwrap();
        assert!(v2 > v1);
        assert_eq!(cache.version(), v2);
        assert_eq!(cache.cached_class("Paragraph").unwrap().version, v1);
        assert!(cache.cached_class("Missing").is_none());
        assert_eq!(cache.class_names(), vec!["Article", "Paragraph"]);
    }

    #[tokio::test]
    async fn test_barrier_waits_for_apply() {
        let cache = Arc::new(SchemaCache::new());
        let staged = cache.stage_class(paragraph()).unwrap();
        assert_eq!(cache.version(), 0);

        let barrier = SchemaBarrier::new(cache.clone(), Duration::from_secs(5));
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut wait = task::spawn(barrier.wait_for(staged, deadline));
        assert_pending!(wait.poll());

        cache.mark_applied(staged);
        assert!(wait.is_woken());
        assert_ready_ok!(wait.poll());
    }

    #[tokio::test]
    async fn test_barrier_times_out() {
        let cache = Arc::new(SchemaCache::new());
        let staged = cache.stage_class(paragraph()).unwrap();

        let barrier = SchemaBarrier::new(cache.clone(), Duration::from_millis(20));
        let far = Instant::now() + Duration::from_secs(60);
        match barrier.wait_for(staged, far).await {
            Err(crate::Error::SchemaVersionTimeout { version, current }) => {
                assert_eq!(version, staged);
                assert_eq!(current, 0);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_mark_applied_never_regresses() {
        let cache = SchemaCache::new();
        cache.mark_applied(5);
        cache.mark_applied(3);
        assert_eq!(cache.version(), 5);
    }
}
