//! Shared helpers for replikv integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use replikv::common::{
    DeletionStrategy, Object, ObjectKey, PropertyValue, Record, RecordDigest, ReplicationConfig,
    ReplicationSettings,
};
use replikv::coordinator::{
    ClassDef, Coordinator, DataType, LocalReplicaClient, ReplicaClient, ReplicaError, ReplicaSet,
    SchemaCache,
};
use replikv::replica::{DeleteRequest, PutRequest, WriteAck};
use replikv::ReplicaNode;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

type ReplicaResult<T> = std::result::Result<T, ReplicaError>;

/// In-process replica client that can be slowed down or made to hang
pub struct GatedReplicaClient {
    inner: LocalReplicaClient,
    hang: AtomicBool,
    delay_ms: AtomicU64,
    started: AtomicUsize,
    active: AtomicUsize,
}

/// Counts a call as active until it finishes or is dropped
struct ActiveCall<'a>(&'a AtomicUsize);

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl GatedReplicaClient {
    pub fn new(node: Arc<ReplicaNode>) -> Self {
        Self {
            inner: LocalReplicaClient::new(node),
            hang: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            started: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
        }
    }

    async fn enter(&self) -> ActiveCall<'_> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        let call = ActiveCall(&self.active);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        call
    }
}

#[async_trait]
impl ReplicaClient for GatedReplicaClient {
    fn node(&self) -> &str {
        self.inner.node()
    }

    async fn get_object(
        &self,
        key: &ObjectKey,
        tenant: Option<&str>,
    ) -> ReplicaResult<Option<Record>> {
        let _call = self.enter().await;
        self.inner.get_object(key, tenant).await
    }

    async fn digest(
        &self,
        key: &ObjectKey,
        tenant: Option<&str>,
    ) -> ReplicaResult<Option<RecordDigest>> {
        let _call = self.enter().await;
        self.inner.digest(key, tenant).await
    }

    async fn put_object(&self, req: &PutRequest) -> ReplicaResult<WriteAck> {
        let _call = self.enter().await;
        self.inner.put_object(req).await
    }

    async fn delete_object(&self, req: &DeleteRequest) -> ReplicaResult<WriteAck> {
        let _call = self.enter().await;
        self.inner.delete_object(req).await
    }
}

pub struct TestCluster {
    pub nodes: Vec<Arc<ReplicaNode>>,
    pub gates: Vec<Arc<GatedReplicaClient>>,
    pub schema: Arc<SchemaCache>,
    pub coordinator: Coordinator,
}

impl TestCluster {
    /// In-process cluster of `n` nodes with the given classes applied
    pub fn new(n: usize, classes: Vec<ClassDef>) -> Self {
        let mut settings = ReplicationSettings::default();
        settings.schema_wait_timeout = "100ms".into();
        Self::with_settings(n, classes, &settings)
    }

    pub fn with_settings(n: usize, classes: Vec<ClassDef>, settings: &ReplicationSettings) -> Self {
        let nodes: Vec<Arc<ReplicaNode>> = (1..=n)
            .map(|i| Arc::new(ReplicaNode::new(format!("node{}", i))))
            .collect();
        let gates: Vec<Arc<GatedReplicaClient>> = nodes
            .iter()
            .map(|node| Arc::new(GatedReplicaClient::new(node.clone())))
            .collect();
        let mut replicas = ReplicaSet::new();
        for gate in &gates {
            replicas.insert(gate.clone());
        }

        let schema = Arc::new(SchemaCache::new());
        for class in classes {
            schema.put_class(class).unwrap();
        }

        let coordinator = Coordinator::new(replicas, schema.clone(), settings).unwrap();

        Self {
            nodes,
            gates,
            schema,
            coordinator,
        }
    }

    /// node1 is index 0
    pub fn node(&self, n: usize) -> &Arc<ReplicaNode> {
        &self.nodes[n - 1]
    }

    pub fn down(&self, n: usize) {
        self.node(n).set_online(false);
    }

    pub fn up(&self, n: usize) {
        self.node(n).set_online(true);
    }

    /// Calls to node `n` that start from now on never answer
    pub fn hang(&self, n: usize) {
        self.gates[n - 1].hang.store(true, Ordering::SeqCst);
    }

    /// New calls to node `n` answer again; already hung calls stay hung
    pub fn release(&self, n: usize) {
        self.gates[n - 1].hang.store(false, Ordering::SeqCst);
    }

    pub fn delay(&self, n: usize, delay: Duration) {
        self.gates[n - 1]
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Calls to node `n` currently in progress
    pub fn active_calls(&self, n: usize) -> usize {
        self.gates[n - 1].active.load(Ordering::SeqCst)
    }

    /// Calls ever made to node `n`
    pub fn started_calls(&self, n: usize) -> usize {
        self.gates[n - 1].started.load(Ordering::SeqCst)
    }

    /// Wait for write stragglers and repairs
    pub async fn settle(&self) {
        self.coordinator.repairer().wait_idle().await;
    }

    pub fn record_count(&self) -> usize {
        self.nodes.iter().map(|n| n.store().len()).sum()
    }
}

pub fn paragraph_class(factor: usize, strategy: DeletionStrategy) -> ClassDef {
    ClassDef::new("Paragraph", ReplicationConfig::new(factor, strategy))
        .with_property("contents", DataType::Text)
        .with_property(
            "ofArticle",
            DataType::Reference {
                targets: vec!["Article".into()],
            },
        )
}

pub fn article_class(factor: usize) -> ClassDef {
    ClassDef::new(
        "Article",
        ReplicationConfig::new(factor, DeletionStrategy::TimeBasedResolution),
    )
    .with_property("title", DataType::Text)
}

pub fn paragraph(id: Uuid, text: &str) -> Object {
    Object::new("Paragraph", id).with_property("contents", PropertyValue::Text(text.into()))
}

pub fn contents(obj: &Object) -> Option<&str> {
    match obj.properties.get("contents") {
        Some(PropertyValue::Text(text)) => Some(text),
        _ => None,
    }
}
