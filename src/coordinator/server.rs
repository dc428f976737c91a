//! Node server: a replica plus a coordinator on one HTTP listener

use crate::common::{Config, Result};
use crate::coordinator::consistency::Coordinator;
use crate::coordinator::http::{create_router, ApiState};
use crate::coordinator::replica_client::{HttpReplicaClient, LocalReplicaClient, ReplicaSet};
use crate::coordinator::schema::SchemaCache;
use crate::replica::ReplicaNode;
use axum::Router;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub struct NodeServer {
    config: Config,
    node: Arc<ReplicaNode>,
    schema: Arc<SchemaCache>,
    coordinator: Arc<Coordinator>,
}

impl NodeServer {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let node = Arc::new(ReplicaNode::new(config.node_id.clone()));
        let timeout = config.replication.request_timeout()?;
        let mut replicas = ReplicaSet::new();
        replicas.insert(Arc::new(LocalReplicaClient::new(node.clone())));
        for peer in &config.peers {
            replicas.insert(Arc::new(HttpReplicaClient::new(
                peer.id.clone(),
                peer.url.clone(),
                timeout,
            )?));
        }

        let schema = Arc::new(SchemaCache::new());
        for class in &config.classes {
            schema.put_class(class.clone())?;
        }

        let coordinator = Arc::new(Coordinator::new(
            replicas,
            schema.clone(),
            &config.replication,
        )?);

        Ok(Self {
            config,
            node,
            schema,
            coordinator,
        })
    }

    pub fn node(&self) -> &Arc<ReplicaNode> {
        &self.node
    }

    pub fn schema(&self) -> &Arc<SchemaCache> {
        &self.schema
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Replica API and public API behind one router
    pub fn router(&self) -> Router {
        let api = create_router(ApiState {
            coordinator: self.coordinator.clone(),
            node_id: self.config.node_id.clone(),
        });
        crate::replica::http::create_router(self.node.clone())
            .merge(api)
            .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until Ctrl-C, then let background repairs drain
    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting replikv node: {}", self.config.node_id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Peers: {}", self.config.peers.len());
        tracing::info!("  Classes: {:?}", self.schema.class_names());

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        let router = self.router();

        tracing::info!("✓ Node ready");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Waiting for background repairs");
        self.coordinator.repairer().wait_idle().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
