//! Clients for reaching replica nodes
//!
//! `LocalReplicaClient` talks to an in-process node, `HttpReplicaClient` to
//! a remote node's internal HTTP API. Transport errors never leave this
//! module as `crate::Error`: they are `ReplicaError`s which the coordinator
//! turns into failed responses.

use crate::common::{ObjectKey, Record, RecordDigest};
use crate::replica::{DeleteRequest, PutRequest, ReplicaNode, WriteAck};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplicaError {
    #[error("node {node} unavailable: {reason}")]
    Unavailable { node: String, reason: String },

    #[error("object not found on node {0}")]
    NotFound(String),

    #[error("node {node} rejected request: {reason}")]
    Rejected { node: String, reason: String },

    #[error("protocol error from node {node}: {reason}")]
    Protocol { node: String, reason: String },
}

pub type ReplicaResult<T> = std::result::Result<T, ReplicaError>;

/// Per-node replica interface
#[async_trait]
pub trait ReplicaClient: Send + Sync {
    /// Name of the node this client reaches
    fn node(&self) -> &str;

    async fn get_object(
        &self,
        key: &ObjectKey,
        tenant: Option<&str>,
    ) -> ReplicaResult<Option<Record>>;

    async fn digest(
        &self,
        key: &ObjectKey,
        tenant: Option<&str>,
    ) -> ReplicaResult<Option<RecordDigest>>;

    async fn put_object(&self, req: &PutRequest) -> ReplicaResult<WriteAck>;

    async fn delete_object(&self, req: &DeleteRequest) -> ReplicaResult<WriteAck>;
}

/// The known replica nodes, by name
#[derive(Clone, Default)]
pub struct ReplicaSet {
    clients: BTreeMap<String, Arc<dyn ReplicaClient>>,
}

impl ReplicaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, client: Arc<dyn ReplicaClient>) -> Self {
        self.insert(client);
        self
    }

    pub fn insert(&mut self, client: Arc<dyn ReplicaClient>) {
        self.clients.insert(client.node().to_string(), client);
    }

    pub fn get(&self, node: &str) -> Option<Arc<dyn ReplicaClient>> {
        self.clients.get(node).cloned()
    }

    pub fn nodes(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for ReplicaSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.clients.keys()).finish()
    }
}

/// Client for a node living in this process
#[derive(Debug, Clone)]
pub struct LocalReplicaClient {
    node: Arc<ReplicaNode>,
}

impl LocalReplicaClient {
    pub fn new(node: Arc<ReplicaNode>) -> Self {
        Self { node }
    }

    fn ensure_online(&self) -> ReplicaResult<()> {
        if self.node.is_online() {
            Ok(())
        } else {
            Err(ReplicaError::Unavailable {
                node: self.node.id().to_string(),
                reason: "node is offline".into(),
            })
        }
    }
}

#[async_trait]
impl ReplicaClient for LocalReplicaClient {
    fn node(&self) -> &str {
        self.node.id()
    }

    async fn get_object(
        &self,
        key: &ObjectKey,
        tenant: Option<&str>,
    ) -> ReplicaResult<Option<Record>> {
        self.ensure_online()?;
        Ok(self.node.store().get(key, tenant))
    }

    async fn digest(
        &self,
        key: &ObjectKey,
        tenant: Option<&str>,
    ) -> ReplicaResult<Option<RecordDigest>> {
        self.ensure_online()?;
        Ok(self.node.store().digest(key, tenant))
    }

    async fn put_object(&self, req: &PutRequest) -> ReplicaResult<WriteAck> {
        self.ensure_online()?;
        self.node.store().put(req.clone()).map_err(|e| match e {
            crate::Error::NotFound(_) => ReplicaError::NotFound(self.node.id().to_string()),
            other => ReplicaError::Rejected {
                node: self.node.id().to_string(),
                reason: other.to_string(),
            },
        })
    }

    async fn delete_object(&self, req: &DeleteRequest) -> ReplicaResult<WriteAck> {
        self.ensure_online()?;
        Ok(self.node.store().delete(req.clone()))
    }
}

/// Client for a remote node's internal HTTP API
#[derive(Debug, Clone)]
pub struct HttpReplicaClient {
    node: String,
    base_url: String,
    http: reqwest::Client,
}

impl HttpReplicaClient {
    pub fn new(
        node: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| crate::Error::Http(e.to_string()))?;
        Ok(Self {
            node: node.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn object_url(&self, key: &ObjectKey) -> String {
        format!("{}/replica/objects/{}/{}", self.base_url, key.class, key.id)
    }

    fn unavailable(&self, e: impl std::fmt::Display) -> ReplicaError {
        ReplicaError::Unavailable {
            node: self.node.clone(),
            reason: e.to_string(),
        }
    }

    fn protocol(&self, e: impl std::fmt::Display) -> ReplicaError {
        ReplicaError::Protocol {
            node: self.node.clone(),
            reason: e.to_string(),
        }
    }

    /// Map a non-success status to an error
    async fn failure(&self, resp: reqwest::Response) -> ReplicaError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => ReplicaError::NotFound(self.node.clone()),
            StatusCode::SERVICE_UNAVAILABLE => self.unavailable(body),
            _ => ReplicaError::Rejected {
                node: self.node.clone(),
                reason: format!("{}: {}", status, body),
            },
        }
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        tenant: Option<&str>,
    ) -> ReplicaResult<Option<T>> {
        let mut req = self.http.get(url);
        if let Some(tenant) = tenant {
            req = req.query(&[("tenant", tenant)]);
        }
        let resp = req.send().await.map_err(|e| self.unavailable(e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(self.failure(resp).await);
        }
        resp.json::<T>()
            .await
            .map(Some)
            .map_err(|e| self.protocol(e))
    }

    async fn ack(&self, resp: reqwest::Response) -> ReplicaResult<WriteAck> {
        if !resp.status().is_success() {
            return Err(self.failure(resp).await);
        }
        resp.json::<WriteAck>().await.map_err(|e| self.protocol(e))
    }
}

#[async_trait]
impl ReplicaClient for HttpReplicaClient {
    fn node(&self) -> &str {
        &self.node
    }

    async fn get_object(
        &self,
        key: &ObjectKey,
        tenant: Option<&str>,
    ) -> ReplicaResult<Option<Record>> {
        self.fetch(self.object_url(key), tenant).await
    }

    async fn digest(
        &self,
        key: &ObjectKey,
        tenant: Option<&str>,
    ) -> ReplicaResult<Option<RecordDigest>> {
        self.fetch(format!("{}/digest", self.object_url(key)), tenant)
            .await
    }

    async fn put_object(&self, req: &PutRequest) -> ReplicaResult<WriteAck> {
        let resp = self
            .http
            .put(self.object_url(&req.object.key()))
            .json(req)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;
        self.ack(resp).await
    }

    async fn delete_object(&self, req: &DeleteRequest) -> ReplicaResult<WriteAck> {
        let version = req.version.to_string();
        let strategy = req.strategy.to_string();
        let mut query = vec![("version", version.as_str()), ("strategy", strategy.as_str())];
        if let Some(tenant) = &req.tenant {
            query.push(("tenant", tenant.as_str()));
        }
        let resp = self
            .http
            .delete(self.object_url(&req.key))
            .query(&query)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;
        self.ack(resp).await
    }
}
