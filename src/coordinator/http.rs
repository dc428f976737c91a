//! Public HTTP API
//!
//! Every request is one coordinated operation. The consistency level and
//! tenant come from the query string:
//! `?consistency_level=ONE|QUORUM|ALL&tenant=<name>`.

use crate::common::{ConsistencyLevel, Object, ObjectKey, Reference, Version};
use crate::coordinator::consistency::{Coordinator, OpContext};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<Coordinator>,
    pub node_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ObjectQuery {
    pub consistency_level: Option<String>,
    pub tenant: Option<String>,
}

impl ObjectQuery {
    fn context(&self) -> crate::Result<OpContext> {
        let mut ctx = OpContext::new();
        if let Some(level) = &self.consistency_level {
            ctx = ctx.with_level(level.parse::<ConsistencyLevel>()?);
        }
        if let Some(tenant) = &self.tenant {
            ctx = ctx.with_tenant(tenant.clone());
        }
        Ok(ctx)
    }
}

/// Response for successful writes
#[derive(Debug, Serialize, Deserialize)]
pub struct WriteResponse {
    pub class: String,
    pub id: Uuid,
    pub version: Version,
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/metrics", axum::routing::get(metrics))
        .route("/v1/objects", axum::routing::post(create_object))
        .route(
            "/v1/objects/:class/:id",
            axum::routing::get(get_object)
                .head(head_object)
                .put(update_object)
                .patch(merge_object)
                .delete(delete_object),
        )
        .route(
            "/v1/objects/:class/:id/references/:property",
            axum::routing::put(add_references),
        )
        .with_state(state)
}

fn ensure_path_matches(obj: &Object, class: &str, id: Uuid) -> crate::Result<()> {
    if obj.class != class || obj.id != id {
        return Err(crate::Error::ValidationFailed(format!(
            "body object {} does not match path {}/{}",
            obj.key(),
            class,
            id
        )));
    }
    Ok(())
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "node_id": state.node_id,
        "nodes": state.coordinator.nodes(),
        "schema_version": state.coordinator.schema().version(),
        "repairs_in_flight": state.coordinator.repairer().in_flight(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Prometheus text exposition
async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    (StatusCode::OK, state.coordinator.metrics().to_prometheus())
}

async fn create_object(
    State(state): State<ApiState>,
    Query(query): Query<ObjectQuery>,
    Json(obj): Json<Object>,
) -> crate::Result<Response> {
    let ctx = query.context()?;
    let (class, id) = (obj.class.clone(), obj.id);
    let version = state.coordinator.put(obj, &ctx).await?;
    Ok((StatusCode::OK, Json(WriteResponse { class, id, version })).into_response())
}

async fn get_object(
    State(state): State<ApiState>,
    Path((class, id)): Path<(String, Uuid)>,
    Query(query): Query<ObjectQuery>,
) -> crate::Result<Json<Object>> {
    let ctx = query.context()?;
    let obj = state
        .coordinator
        .get(&ObjectKey::new(class, id), &ctx)
        .await?;
    Ok(Json(obj))
}

async fn head_object(
    State(state): State<ApiState>,
    Path((class, id)): Path<(String, Uuid)>,
    Query(query): Query<ObjectQuery>,
) -> crate::Result<StatusCode> {
    let ctx = query.context()?;
    let exists = state
        .coordinator
        .exists(&ObjectKey::new(class, id), &ctx)
        .await?;
    Ok(if exists {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    })
}

async fn update_object(
    State(state): State<ApiState>,
    Path((class, id)): Path<(String, Uuid)>,
    Query(query): Query<ObjectQuery>,
    Json(obj): Json<Object>,
) -> crate::Result<Json<WriteResponse>> {
    ensure_path_matches(&obj, &class, id)?;
    let ctx = query.context()?;
    let version = state.coordinator.update(obj, &ctx).await?;
    Ok(Json(WriteResponse { class, id, version }))
}

async fn merge_object(
    State(state): State<ApiState>,
    Path((class, id)): Path<(String, Uuid)>,
    Query(query): Query<ObjectQuery>,
    Json(obj): Json<Object>,
) -> crate::Result<Json<WriteResponse>> {
    ensure_path_matches(&obj, &class, id)?;
    let ctx = query.context()?;
    let version = state.coordinator.merge(obj, &ctx).await?;
    Ok(Json(WriteResponse { class, id, version }))
}

async fn delete_object(
    State(state): State<ApiState>,
    Path((class, id)): Path<(String, Uuid)>,
    Query(query): Query<ObjectQuery>,
) -> crate::Result<StatusCode> {
    let ctx = query.context()?;
    state
        .coordinator
        .delete(&ObjectKey::new(class, id), &ctx)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_references(
    State(state): State<ApiState>,
    Path((class, id, property)): Path<(String, Uuid, String)>,
    Query(query): Query<ObjectQuery>,
    Json(references): Json<Vec<Reference>>,
) -> crate::Result<Json<WriteResponse>> {
    let ctx = query.context()?;
    let version = state
        .coordinator
        .add_references(&ObjectKey::new(class.clone(), id), &property, references, &ctx)
        .await?;
    Ok(Json(WriteResponse { class, id, version }))
}
