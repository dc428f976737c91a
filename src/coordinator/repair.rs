//! Read repair
//!
//! Pushes a resolved winner to every replica that does not hold it. Each
//! target gets a single put (live winner) or delete (tombstone winner)
//! carrying the winner's version. Every repair call is bounded by the
//! request timeout. There is no retry; failures are logged and counted.
//! A target that already moved past the winner acknowledges without
//! applying and is counted as superseded.
//!
//! Background work is bounded twice: a semaphore caps concurrent repair
//! writes and a pending counter caps queued repairs. Everything spawned
//! through the engine is tracked so `wait_idle` can observe quiescence.

use crate::common::{DeletionStrategy, Object, ObjectKey, Record, ReplicationMetrics, Version};
use crate::coordinator::replica_client::{ReplicaError, ReplicaSet};
use crate::coordinator::resolver::{Resolution, Winner};
use crate::replica::{DeleteRequest, PutRequest, WriteMode};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::time::timeout;

/// What a stale replica must apply
#[derive(Debug, Clone, PartialEq)]
pub enum RepairAction {
    Put(Object),
    Delete { deleted_at: Version },
}

/// One repair write to one node
#[derive(Debug, Clone, PartialEq)]
pub struct RepairTask {
    pub node: String,
    pub key: ObjectKey,
    pub tenant: Option<String>,
    pub strategy: DeletionStrategy,
    pub action: RepairAction,
}

struct Inner {
    replicas: Arc<ReplicaSet>,
    permits: Semaphore,
    capacity: usize,
    timeout: Duration,
    queued: AtomicUsize,
    tracked: AtomicUsize,
    idle: Notify,
    metrics: Arc<ReplicationMetrics>,
}

/// Decrements the tracked count when a background task ends, even on panic
struct Tracked(Arc<Inner>);

impl Drop for Tracked {
    fn drop(&mut self) {
        if self.0.tracked.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

#[derive(Clone)]
pub struct RepairEngine {
    inner: Arc<Inner>,
}

impl RepairEngine {
    pub fn new(
        replicas: Arc<ReplicaSet>,
        concurrency: usize,
        capacity: usize,
        timeout: Duration,
        metrics: Arc<ReplicationMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                replicas,
                permits: Semaphore::new(concurrency.max(1)),
                capacity: capacity.max(1),
                timeout,
                queued: AtomicUsize::new(0),
                tracked: AtomicUsize::new(0),
                idle: Notify::new(),
                metrics,
            }),
        }
    }

    /// Number of tracked background tasks still running
    pub fn in_flight(&self) -> usize {
        self.inner.tracked.load(Ordering::Acquire)
    }

    /// Resolve once every tracked background task has finished
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Spawn `fut` as a tracked background task
    pub fn track<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tracked.fetch_add(1, Ordering::AcqRel);
        let guard = Tracked(self.inner.clone());
        tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        });
    }

    /// Run `repair` in the background. Returns false when nothing needed
    /// repairing or the queue was full.
    pub fn schedule(
        &self,
        key: ObjectKey,
        tenant: Option<String>,
        strategy: DeletionStrategy,
        resolution: Resolution,
    ) -> bool {
        if !resolution.needs_repair() {
            return false;
        }
        let inner = &self.inner;
        if inner.queued.fetch_add(1, Ordering::AcqRel) >= inner.capacity {
            inner.queued.fetch_sub(1, Ordering::AcqRel);
            inner.metrics.repairs_dropped.inc();
            tracing::warn!(%key, "repair queue full, dropping repair");
            return false;
        }
        inner.metrics.repairs_scheduled.inc();
        inner.metrics.repairs_in_flight.inc();

        let engine = self.clone();
        self.track(async move {
            engine
                .repair(&key, tenant.as_deref(), strategy, &resolution)
                .await;
            engine.inner.queued.fetch_sub(1, Ordering::AcqRel);
            engine.inner.metrics.repairs_in_flight.dec();
        });
        true
    }

    /// Push the winner to every stale or missing node. Returns the number
    /// of nodes that applied it.
    pub async fn repair(
        &self,
        key: &ObjectKey,
        tenant: Option<&str>,
        strategy: DeletionStrategy,
        resolution: &Resolution,
    ) -> usize {
        if !resolution.needs_repair() {
            return 0;
        }
        let Some(action) = self.winning_action(key, tenant, &resolution.winner).await else {
            self.inner.metrics.repairs_failed.inc();
            return 0;
        };

        let tasks: Vec<RepairTask> = resolution
            .stale_nodes()
            .map(|node| RepairTask {
                node: node.to_string(),
                key: key.clone(),
                tenant: tenant.map(str::to_string),
                strategy,
                action: action.clone(),
            })
            .collect();

        let mut pending: FuturesUnordered<_> =
            tasks.into_iter().map(|task| self.apply(task)).collect();
        let mut committed = 0;
        while let Some(ok) = pending.next().await {
            if ok {
                committed += 1;
            }
        }
        tracing::debug!(%key, committed, "repair finished");
        committed
    }

    /// Materialize the winner; digest-only winners are fetched from their
    /// source node and must still match the resolved digest.
    async fn winning_action(
        &self,
        key: &ObjectKey,
        tenant: Option<&str>,
        winner: &Winner,
    ) -> Option<RepairAction> {
        match winner {
            Winner::Tombstone { deleted_at } => Some(RepairAction::Delete {
                deleted_at: *deleted_at,
            }),
            Winner::Live {
                object: Some(obj), ..
            } => Some(RepairAction::Put(obj.clone())),
            Winner::Live {
                object: None,
                digest,
                source,
            } => {
                let client = self.inner.replicas.get(source)?;
                let fetched = timeout(self.inner.timeout, client.get_object(key, tenant)).await;
                match fetched {
                    Ok(Ok(Some(Record::Live(obj)))) if obj.digest() == *digest => {
                        Some(RepairAction::Put(obj))
                    }
                    Ok(Ok(other)) => {
                        tracing::warn!(
                            %key,
                            node = %source,
                            found = ?other.map(|r| r.digest()),
                            "repair source changed, abandoning repair"
                        );
                        None
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(%key, node = %source, error = %e, "repair fetch failed");
                        None
                    }
                    Err(_) => {
                        tracing::warn!(%key, node = %source, "repair fetch timed out");
                        None
                    }
                }
            }
            Winner::Absent => None,
        }
    }

    async fn apply(&self, task: RepairTask) -> bool {
        let Some(client) = self.inner.replicas.get(&task.node) else {
            tracing::warn!(node = %task.node, "repair target is not a known node");
            self.inner.metrics.repairs_failed.inc();
            return false;
        };
        let Ok(_permit) = self.inner.permits.acquire().await else {
            return false;
        };

        let call = async {
            match &task.action {
                RepairAction::Put(object) => {
                    client
                        .put_object(&PutRequest {
                            object: object.clone(),
                            tenant: task.tenant.clone(),
                            mode: WriteMode::Upsert,
                            strategy: task.strategy,
                        })
                        .await
                }
                RepairAction::Delete { deleted_at } => {
                    client
                        .delete_object(&DeleteRequest {
                            key: task.key.clone(),
                            version: *deleted_at,
                            tenant: task.tenant.clone(),
                            strategy: task.strategy,
                        })
                        .await
                }
            }
        };

        let result = match timeout(self.inner.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ReplicaError::Unavailable {
                node: task.node.clone(),
                reason: format!("no answer within {:?}", self.inner.timeout),
            }),
        };

        match result {
            Ok(ack) if ack.applied => {
                tracing::debug!(key = %task.key, node = %task.node, "repair applied");
                self.inner.metrics.repairs_committed.inc();
                true
            }
            Ok(ack) => {
                tracing::debug!(
                    key = %task.key,
                    node = %task.node,
                    version = ack.version,
                    "repair target already superseded"
                );
                self.inner.metrics.repairs_superseded.inc();
                false
            }
            Err(e) => {
                tracing::warn!(key = %task.key, node = %task.node, error = %e, "repair failed");
                self.inner.metrics.repairs_failed.inc();
                false
            }
        }
    }
}
