//! Consistency coordinator
//!
//! Runs one logical operation across the replica set of an object:
//!
//! 1. validate names and authorize (no node I/O before this passes)
//! 2. look up the class and its schema version
//! 3. compute the quorum threshold and the HRW replica set
//! 4. fan out one sub-request per node, each bounded by the deadline
//! 5. reads return at quorum, the stragglers finish in a tracked background
//!    task that feeds read repair; writes pass the schema barrier, stamp a
//!    fresh version and need `threshold` acknowledgements
//!
//! Dropping an operation future cancels every sub-request it still owns.
//! Work already handed to the background (write stragglers, repairs) keeps
//! running.

use crate::common::{
    validate_class_name, validate_property_name, validate_tenant, AllowAll, Authorizer,
    ConsistencyLevel, DeletionStrategy, Object, ObjectKey, Principal, PropertyValue, Reference,
    ReplicationMetrics, ReplicationSettings, Result, Verb, Version, VersionClock,
};
use crate::coordinator::placement::PlacementManager;
use crate::coordinator::quorum::min_acks;
use crate::coordinator::repair::RepairEngine;
use crate::coordinator::replica_client::{ReplicaError, ReplicaSet};
use crate::coordinator::resolver::{resolve, Reply, ReplicaResponse, Resolution, Winner};
use crate::coordinator::schema::{SchemaBarrier, SchemaReader, VersionedClass};
use crate::replica::{DeleteRequest, PutRequest, WriteAck, WriteMode};
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Per-request context
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    pub principal: Option<Principal>,
    pub tenant: Option<String>,
    /// Falls back to the configured default level
    pub level: Option<ConsistencyLevel>,
    /// Falls back to the configured request timeout
    pub timeout: Option<Duration>,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: ConsistencyLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A coordinated operation
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Get {
        key: ObjectKey,
    },
    Exists {
        key: ObjectKey,
    },
    Put {
        object: Object,
    },
    Update {
        object: Object,
    },
    Merge {
        object: Object,
    },
    Delete {
        key: ObjectKey,
    },
    AddReferences {
        key: ObjectKey,
        property: String,
        references: Vec<Reference>,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Get { .. } => "get",
            Operation::Exists { .. } => "exists",
            Operation::Put { .. } => "put",
            Operation::Update { .. } => "update",
            Operation::Merge { .. } => "merge",
            Operation::Delete { .. } => "delete",
            Operation::AddReferences { .. } => "add_references",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput {
    Object(Object),
    Exists(bool),
    Written { version: Version },
    Deleted,
}

/// Everything decided before the first node is contacted
struct Plan {
    class: VersionedClass,
    nodes: Vec<String>,
    threshold: usize,
    strategy: DeletionStrategy,
    deadline: Instant,
}

enum WriteRequest {
    Put(PutRequest),
    Delete(DeleteRequest),
}

enum WriteReply {
    Acked(WriteAck),
    NotFound,
    Failed(String),
}

type ReadFutures = FuturesUnordered<BoxFuture<'static, ReplicaResponse>>;
type WriteFutures = FuturesUnordered<BoxFuture<'static, (String, WriteReply)>>;

pub struct Coordinator {
    replicas: Arc<ReplicaSet>,
    placement: PlacementManager,
    schema: Arc<dyn SchemaReader>,
    barrier: SchemaBarrier,
    authorizer: Arc<dyn Authorizer>,
    repair: RepairEngine,
    clock: VersionClock,
    metrics: Arc<ReplicationMetrics>,
    default_level: ConsistencyLevel,
    request_timeout: Duration,
}

impl Coordinator {
    pub fn new(
        replicas: ReplicaSet,
        schema: Arc<dyn SchemaReader>,
        settings: &ReplicationSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let replicas = Arc::new(replicas);
        let metrics = Arc::new(ReplicationMetrics::new());
        let request_timeout = settings.request_timeout()?;
        let repair = RepairEngine::new(
            replicas.clone(),
            settings.repair_concurrency,
            settings.repair_queue_capacity,
            request_timeout,
            metrics.clone(),
        );
        Ok(Self {
            placement: PlacementManager::new(replicas.nodes()),
            barrier: SchemaBarrier::new(schema.clone(), settings.schema_wait_timeout()?),
            replicas,
            schema,
            authorizer: Arc::new(AllowAll),
            repair,
            clock: VersionClock::new(),
            metrics,
            default_level: settings.default_level,
            request_timeout,
        })
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn repairer(&self) -> &RepairEngine {
        &self.repair
    }

    pub fn metrics(&self) -> &Arc<ReplicationMetrics> {
        &self.metrics
    }

    pub fn schema(&self) -> &Arc<dyn SchemaReader> {
        &self.schema
    }

    pub fn nodes(&self) -> &[String] {
        self.placement.nodes()
    }

    /// Run any operation
    pub async fn execute(&self, op: Operation, ctx: &OpContext) -> Result<OperationOutput> {
        tracing::debug!(op = op.name(), tenant = ?ctx.tenant, level = ?ctx.level, "execute");
        match op {
            Operation::Get { key } => self.get(&key, ctx).await.map(OperationOutput::Object),
            Operation::Exists { key } => self.exists(&key, ctx).await.map(OperationOutput::Exists),
            Operation::Put { object } => self
                .put(object, ctx)
                .await
                .map(|version| OperationOutput::Written { version }),
            Operation::Update { object } => self
                .update(object, ctx)
                .await
                .map(|version| OperationOutput::Written { version }),
            Operation::Merge { object } => self
                .merge(object, ctx)
                .await
                .map(|version| OperationOutput::Written { version }),
            Operation::Delete { key } => self
                .delete(&key, ctx)
                .await
                .map(|()| OperationOutput::Deleted),
            Operation::AddReferences {
                key,
                property,
                references,
            } => self
                .add_references(&key, &property, references, ctx)
                .await
                .map(|version| OperationOutput::Written { version }),
        }
    }

    pub async fn get(&self, key: &ObjectKey, ctx: &OpContext) -> Result<Object> {
        let deadline = self.deadline(ctx);
        self.observe("get", self.get_object(key, ctx, deadline)).await
    }

    pub async fn exists(&self, key: &ObjectKey, ctx: &OpContext) -> Result<bool> {
        let deadline = self.deadline(ctx);
        self.observe("exists", self.object_exists(key, ctx, deadline))
            .await
    }

    /// Create or fully replace an object, starting a new incarnation
    pub async fn put(&self, object: Object, ctx: &OpContext) -> Result<Version> {
        self.observe("put", self.create(object, ctx)).await
    }

    /// Replace properties and vectors of an existing object
    pub async fn update(&self, object: Object, ctx: &OpContext) -> Result<Version> {
        self.observe("update", self.modify(object, WriteMode::Update, ctx))
            .await
    }

    /// Merge properties into an existing object
    pub async fn merge(&self, object: Object, ctx: &OpContext) -> Result<Version> {
        self.observe("merge", self.modify(object, WriteMode::Merge, ctx))
            .await
    }

    /// Write a tombstone. Deleting an absent object succeeds.
    pub async fn delete(&self, key: &ObjectKey, ctx: &OpContext) -> Result<()> {
        let fut = async {
            let deadline = self.deadline(ctx);
            let plan = self.plan(Verb::Delete, key, ctx, deadline)?;
            self.barrier.wait_for(plan.class.version, deadline).await?;

            let version = self.clock.next();
            self.replicate(
                &plan,
                key,
                WriteRequest::Delete(DeleteRequest {
                    key: key.clone(),
                    version,
                    tenant: ctx.tenant.clone(),
                    strategy: plan.strategy,
                }),
            )
            .await
        };
        self.observe("delete", fut).await
    }

    /// Append references to a reference property of an existing object
    pub async fn add_references(
        &self,
        key: &ObjectKey,
        property: &str,
        references: Vec<Reference>,
        ctx: &OpContext,
    ) -> Result<Version> {
        self.observe(
            "add_references",
            self.link_references(key, property, references, ctx),
        )
        .await
    }

    async fn create(&self, mut object: Object, ctx: &OpContext) -> Result<Version> {
        let deadline = self.deadline(ctx);
        let plan = self.plan(Verb::Create, &object.key(), ctx, deadline)?;
        plan.class.class.validate_object(&object)?;
        self.barrier.wait_for(plan.class.version, deadline).await?;

        let version = self.clock.next();
        object.created_at = version;
        object.last_update = version;
        let tenant = ctx.tenant.clone();
        self.replicate(
            &plan,
            &object.key(),
            WriteRequest::Put(PutRequest {
                object,
                tenant,
                mode: WriteMode::Upsert,
                strategy: plan.strategy,
            }),
        )
        .await?;
        Ok(version)
    }

    async fn link_references(
        &self,
        key: &ObjectKey,
        property: &str,
        references: Vec<Reference>,
        ctx: &OpContext,
    ) -> Result<Version> {
        let deadline = self.deadline(ctx);
        let plan = self.plan(Verb::Update, key, ctx, deadline)?;
        validate_property_name(property)?;
        let class = plan.class.class.clone();
        let prop = class.property(property).ok_or_else(|| {
            crate::Error::ValidationFailed(format!(
                "no such property {} in class {}",
                property, class.name
            ))
        })?;
        let targets = prop.reference_targets().ok_or_else(|| {
            crate::Error::ValidationFailed(format!(
                "property {} of class {} is not a reference property",
                property, class.name
            ))
        })?;

        for reference in &references {
            let target = reference.parse()?;
            let target_class = match (target.class, targets) {
                (Some(c), _) if targets.contains(&c) => c,
                (Some(c), _) => {
                    return Err(crate::Error::ValidationFailed(format!(
                        "property {} does not accept references to class {}",
                        property, c
                    )))
                }
                (None, [only]) => only.clone(),
                (None, _) => {
                    return Err(crate::Error::ValidationFailed(format!(
                        "beacon {} must name one of the classes {:?}",
                        reference.beacon, targets
                    )))
                }
            };
            let target_key = ObjectKey::new(target_class, target.id);
            if !self.object_exists(&target_key, ctx, deadline).await? {
                return Err(crate::Error::ValidationFailed(format!(
                    "reference target {} does not exist",
                    target_key
                )));
            }
        }

        let mut object = self.get_object(key, ctx, deadline).await?;
        match object.properties.get_mut(property) {
            Some(PropertyValue::References(existing)) => existing.extend(references),
            Some(_) => {
                return Err(crate::Error::ValidationFailed(format!(
                    "stored value of {} is not a reference list",
                    property
                )))
            }
            None => {
                object
                    .properties
                    .insert(property.to_string(), PropertyValue::References(references));
            }
        }

        self.barrier.wait_for(plan.class.version, deadline).await?;
        let version = self.clock.next();
        object.last_update = version;
        self.replicate(
            &plan,
            key,
            WriteRequest::Put(PutRequest {
                object,
                tenant: ctx.tenant.clone(),
                mode: WriteMode::Update,
                strategy: plan.strategy,
            }),
        )
        .await?;
        Ok(version)
    }

    async fn modify(&self, mut object: Object, mode: WriteMode, ctx: &OpContext) -> Result<Version> {
        let deadline = self.deadline(ctx);
        let plan = self.plan(Verb::Update, &object.key(), ctx, deadline)?;
        plan.class.class.validate_object(&object)?;
        self.barrier.wait_for(plan.class.version, deadline).await?;

        let version = self.clock.next();
        object.last_update = version;
        let key = object.key();
        self.replicate(
            &plan,
            &key,
            WriteRequest::Put(PutRequest {
                object,
                tenant: ctx.tenant.clone(),
                mode,
                strategy: plan.strategy,
            }),
        )
        .await?;
        Ok(version)
    }

    async fn get_object(&self, key: &ObjectKey, ctx: &OpContext, deadline: Instant) -> Result<Object> {
        let resolution = self.read(key, ctx, deadline, false).await?;
        match resolution.winner {
            Winner::Live {
                object: Some(object),
                ..
            } => Ok(object),
            Winner::Live { object: None, .. } => Err(crate::Error::Internal(format!(
                "full read of {} resolved without a payload",
                key
            ))),
            Winner::Tombstone { .. } | Winner::Absent => Err(crate::Error::NotFound(key.to_string())),
        }
    }

    async fn object_exists(&self, key: &ObjectKey, ctx: &OpContext, deadline: Instant) -> Result<bool> {
        let resolution = self.read(key, ctx, deadline, true).await?;
        Ok(resolution.winner.is_live())
    }

    fn deadline(&self, ctx: &OpContext) -> Instant {
        Instant::now() + ctx.timeout.unwrap_or(self.request_timeout)
    }

    fn plan(&self, verb: Verb, key: &ObjectKey, ctx: &OpContext, deadline: Instant) -> Result<Plan> {
        validate_class_name(&key.class)?;
        if let Some(tenant) = &ctx.tenant {
            validate_tenant(tenant)?;
        }
        self.authorizer
            .authorize(ctx.principal.as_ref(), verb, &key.class, ctx.tenant.as_deref())?;

        let class = self.schema.cached_class(&key.class).ok_or_else(|| {
            crate::Error::ValidationFailed(format!("class {} does not exist", key.class))
        })?;
        class.class.check_tenant(ctx.tenant.as_deref())?;

        let replication = class.class.replication;
        let level = ctx.level.unwrap_or(self.default_level);
        let threshold = min_acks(replication.factor, level)?;
        let nodes = self
            .placement
            .select(key, ctx.tenant.as_deref(), replication.factor)?;

        tracing::debug!(
            %key,
            ?verb,
            %level,
            threshold,
            nodes = ?nodes,
            schema_version = class.version,
            "planned operation"
        );
        Ok(Plan {
            class,
            nodes,
            threshold,
            strategy: replication.deletion_strategy,
            deadline,
        })
    }

    /// Fan out a read and resolve once `threshold` replicas answered
    async fn read(
        &self,
        key: &ObjectKey,
        ctx: &OpContext,
        deadline: Instant,
        digest_only: bool,
    ) -> Result<Resolution> {
        let plan = self.plan(Verb::Read, key, ctx, deadline)?;
        let mut pending = self.read_futures(&plan, key, ctx.tenant.as_deref(), digest_only);

        let mut responses = Vec::with_capacity(plan.nodes.len());
        let mut successes = 0;
        while successes < plan.threshold {
            let Some(response) = pending.next().await else {
                break;
            };
            if response.reply.is_success() {
                successes += 1;
            } else if let Reply::Failed(reason) = &response.reply {
                tracing::warn!(%key, node = %response.node, %reason, "replica read failed");
            }
            responses.push(response);
        }

        if successes < plan.threshold {
            return Err(crate::Error::QuorumUnreachable {
                needed: plan.threshold,
                got: successes,
                detail: read_diagnostics(&responses),
            });
        }

        let resolution = resolve(plan.strategy, &responses);
        self.finish_read(key, ctx.tenant.clone(), plan.strategy, responses, pending);

        if resolution.conflict {
            return Err(crate::Error::DeleteConflict(format!(
                "{} was deleted on some replicas and updated on others",
                key
            )));
        }
        Ok(resolution)
    }

    fn read_futures(
        &self,
        plan: &Plan,
        key: &ObjectKey,
        tenant: Option<&str>,
        digest_only: bool,
    ) -> ReadFutures {
        plan.nodes
            .iter()
            .map(|node| {
                let client = self.replicas.get(node);
                let node = node.clone();
                let key = key.clone();
                let tenant = tenant.map(str::to_string);
                let deadline = plan.deadline;
                async move {
                    let Some(client) = client else {
                        return ReplicaResponse::new(node, Reply::Failed("unknown node".into()));
                    };
                    let call = async {
                        if digest_only {
                            client
                                .digest(&key, tenant.as_deref())
                                .await
                                .map(Reply::from_digest)
                        } else {
                            client
                                .get_object(&key, tenant.as_deref())
                                .await
                                .map(Reply::from_record)
                        }
                    };
                    let reply = match tokio::time::timeout_at(deadline, call).await {
                        Ok(Ok(reply)) => reply,
                        Ok(Err(e)) => Reply::Failed(e.to_string()),
                        Err(_) => Reply::Failed("deadline exceeded".into()),
                    };
                    ReplicaResponse::new(node, reply)
                }
                .boxed()
            })
            .collect()
    }

    /// Collect the stragglers in the background and repair from the full
    /// response set
    fn finish_read(
        &self,
        key: &ObjectKey,
        tenant: Option<String>,
        strategy: DeletionStrategy,
        mut responses: Vec<ReplicaResponse>,
        mut pending: ReadFutures,
    ) {
        if pending.is_empty() {
            let resolution = resolve(strategy, &responses);
            self.repair.schedule(key.clone(), tenant, strategy, resolution);
            return;
        }
        let engine = self.repair.clone();
        let key = key.clone();
        self.repair.track(async move {
            while let Some(response) = pending.next().await {
                responses.push(response);
            }
            let resolution = resolve(strategy, &responses);
            engine.schedule(key, tenant, strategy, resolution);
        });
    }

    /// Fan out a write and wait for `threshold` acknowledgements
    async fn replicate(&self, plan: &Plan, key: &ObjectKey, request: WriteRequest) -> Result<()> {
        let mut pending = self.write_futures(plan, Arc::new(request));
        let tolerable = plan.nodes.len().saturating_sub(plan.threshold);

        let mut acks = 0;
        let mut not_found = 0;
        let mut failures = Vec::new();
        while acks < plan.threshold && failures.len() <= tolerable {
            let Some((node, reply)) = pending.next().await else {
                break;
            };
            match reply {
                WriteReply::Acked(ack) => {
                    tracing::debug!(%key, %node, applied = ack.applied, "replica acknowledged");
                    acks += 1;
                }
                WriteReply::NotFound => {
                    not_found += 1;
                    failures.push(format!("{}: not found", node));
                }
                WriteReply::Failed(reason) => {
                    tracing::warn!(%key, %node, %reason, "replica write failed");
                    failures.push(format!("{}: {}", node, reason));
                }
            }
        }

        if !pending.is_empty() {
            let key = key.clone();
            self.repair.track(async move {
                while let Some((node, reply)) = pending.next().await {
                    if let WriteReply::Failed(reason) = reply {
                        tracing::warn!(%key, %node, %reason, "late replica write failed");
                    }
                }
            });
        }

        if acks >= plan.threshold {
            return Ok(());
        }
        if not_found >= plan.threshold {
            return Err(crate::Error::NotFound(key.to_string()));
        }
        Err(crate::Error::QuorumUnreachable {
            needed: plan.threshold,
            got: acks,
            detail: failures.join("; "),
        })
    }

    fn write_futures(&self, plan: &Plan, request: Arc<WriteRequest>) -> WriteFutures {
        plan.nodes
            .iter()
            .map(|node| {
                let client = self.replicas.get(node);
                let node = node.clone();
                let request = request.clone();
                let deadline = plan.deadline;
                async move {
                    let Some(client) = client else {
                        return (node, WriteReply::Failed("unknown node".into()));
                    };
                    let call = async {
                        match request.as_ref() {
                            WriteRequest::Put(req) => client.put_object(req).await,
                            WriteRequest::Delete(req) => client.delete_object(req).await,
                        }
                    };
                    let reply = match tokio::time::timeout_at(deadline, call).await {
                        Ok(Ok(ack)) => WriteReply::Acked(ack),
                        Ok(Err(ReplicaError::NotFound(_))) => WriteReply::NotFound,
                        Ok(Err(e)) => WriteReply::Failed(e.to_string()),
                        Err(_) => WriteReply::Failed("deadline exceeded".into()),
                    };
                    (node, reply)
                }
                .boxed()
            })
            .collect()
    }

    /// Record latency and outcome counters for one operation
    async fn observe<T>(&self, op: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let started = std::time::Instant::now();
        let result = fut.await;
        let success = match &result {
            Ok(_) | Err(crate::Error::NotFound(_)) => true,
            Err(e) => {
                match e {
                    crate::Error::QuorumUnreachable { .. } => self.metrics.quorum_failures.inc(),
                    crate::Error::SchemaVersionTimeout { .. } => {
                        self.metrics.schema_timeouts.inc()
                    }
                    crate::Error::DeleteConflict(_) => self.metrics.delete_conflicts.inc(),
                    _ => {}
                }
                tracing::debug!(op, error = %e, "operation failed");
                false
            }
        };
        self.metrics.record(op, started.elapsed(), success);
        result
    }
}

fn read_diagnostics(responses: &[ReplicaResponse]) -> String {
    responses
        .iter()
        .filter_map(|r| match &r.reply {
            Reply::Failed(reason) => Some(format!("{}: {}", r.node, reason)),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("; ")
}
