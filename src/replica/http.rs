//! Internal HTTP API served by every replica node
//!
//! - `GET    /replica/objects/:class/:id`        stored record
//! - `GET    /replica/objects/:class/:id/digest` record metadata
//! - `PUT    /replica/objects/:class/:id`        apply a `PutRequest`
//! - `DELETE /replica/objects/:class/:id`        apply a tombstone
//!
//! A node taken offline answers 503 to everything.

use crate::common::{DeletionStrategy, ObjectKey, Version};
use crate::replica::{DeleteRequest, PutRequest, ReplicaNode};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub version: Version,
    pub strategy: DeletionStrategy,
    pub tenant: Option<String>,
}

pub fn create_router(node: Arc<ReplicaNode>) -> Router {
    Router::new()
        .route(
            "/replica/objects/:class/:id",
            axum::routing::get(get_record)
                .put(put_record)
                .delete(delete_record),
        )
        .route(
            "/replica/objects/:class/:id/digest",
            axum::routing::get(get_digest),
        )
        .with_state(node)
}

fn offline(node: &ReplicaNode) -> Option<Response> {
    if node.is_online() {
        return None;
    }
    Some(
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": format!("node {} is offline", node.id()) })),
        )
            .into_response(),
    )
}

async fn get_record(
    State(node): State<Arc<ReplicaNode>>,
    Path((class, id)): Path<(String, Uuid)>,
    Query(query): Query<TenantQuery>,
) -> Response {
    if let Some(resp) = offline(&node) {
        return resp;
    }
    let key = ObjectKey::new(class, id);
    match node.store().get(&key, query.tenant.as_deref()) {
        Some(record) => Json(record).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_digest(
    State(node): State<Arc<ReplicaNode>>,
    Path((class, id)): Path<(String, Uuid)>,
    Query(query): Query<TenantQuery>,
) -> Response {
    if let Some(resp) = offline(&node) {
        return resp;
    }
    let key = ObjectKey::new(class, id);
    match node.store().digest(&key, query.tenant.as_deref()) {
        Some(digest) => Json(digest).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put_record(
    State(node): State<Arc<ReplicaNode>>,
    Path((class, id)): Path<(String, Uuid)>,
    Json(req): Json<PutRequest>,
) -> Response {
    if let Some(resp) = offline(&node) {
        return resp;
    }
    if req.object.class != class || req.object.id != id {
        return crate::Error::ValidationFailed(format!(
            "body object {} does not match path {}/{}",
            req.object.key(),
            class,
            id
        ))
        .into_response();
    }
    match node.store().put(req) {
        Ok(ack) => Json(ack).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn delete_record(
    State(node): State<Arc<ReplicaNode>>,
    Path((class, id)): Path<(String, Uuid)>,
    Query(query): Query<DeleteQuery>,
) -> Response {
    if let Some(resp) = offline(&node) {
        return resp;
    }
    let ack = node.store().delete(DeleteRequest {
        key: ObjectKey::new(class, id),
        version: query.version,
        tenant: query.tenant,
        strategy: query.strategy,
    });
    Json(ack).into_response()
}
