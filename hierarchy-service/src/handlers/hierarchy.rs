//! Hierarchy handlers.
//!
//! One set of routes serves every entity kind; the `{kind}` path segment
//! picks the manager. Mutations require an `x-actor-id` header.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::models::{
    AssembledTree, EntityKind, FlatTree, HierarchyNode, NewNode, NodeId, NodeStatus,
    OperationContext, TreeStats,
};
use crate::services::{
    BatchDeleteOutcome, DeletionCheck, HierarchyManager, IntegrityReport, MoveOutcome,
    ReorderOutcome,
};
use crate::AppState;
use service_core::error::AppError;

pub const ACTOR_HEADER: &str = "x-actor-id";

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Create a node under `parent_id`; absent or `0` creates a root.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateNodeRequest {
    #[validate(range(min = 0))]
    pub parent_id: Option<NodeId>,
    pub attributes: serde_json::Value,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub is_protected: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MoveNodeRequest {
    #[validate(range(min = 0))]
    pub parent_id: Option<NodeId>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: NodeStatus,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SortOrderRequest {
    #[validate(range(min = 0))]
    pub sort_order: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAttributesRequest {
    pub attributes: serde_json::Value,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BatchDeleteRequest {
    #[validate(length(min = 1, max = 500))]
    pub ids: Vec<NodeId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TreeQuery {
    pub root: Option<NodeId>,
    #[serde(default)]
    pub enabled_only: bool,
}

#[derive(Debug, Serialize)]
pub struct NodeListResponse {
    pub kind: EntityKind,
    pub count: usize,
    pub nodes: Vec<HierarchyNode>,
}

impl NodeListResponse {
    fn new(kind: EntityKind, nodes: Vec<HierarchyNode>) -> Self {
        Self {
            kind,
            count: nodes.len(),
            nodes,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolve the manager for a `{kind}` path segment.
fn manager_for(state: &AppState, kind: &str) -> Result<Arc<HierarchyManager>, AppError> {
    let parsed: EntityKind = kind
        .parse()
        .map_err(|e: String| AppError::NotFound(anyhow::anyhow!(e)))?;
    state.hierarchies.get(parsed).ok_or_else(|| {
        AppError::NotFound(anyhow::anyhow!("{} hierarchy is not served here", parsed))
    })
}

/// Build the operation context from the acting user header.
fn actor_context(headers: &HeaderMap) -> Result<OperationContext, AppError> {
    let raw = headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing {} header", ACTOR_HEADER)))?;

    let actor_id: i64 = raw
        .trim()
        .parse()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid {} header", ACTOR_HEADER)))?;

    Ok(OperationContext::now(actor_id))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /hierarchies/:kind/nodes
pub async fn create_node(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CreateNodeRequest>,
) -> Result<(StatusCode, Json<HierarchyNode>), AppError> {
    req.validate()?;
    let manager = manager_for(&state, &kind)?;
    let ctx = actor_context(&headers)?;

    let new = NewNode {
        parent_id: req.parent_id,
        attributes: req.attributes,
        status: req.status,
        is_protected: req.is_protected,
    };
    let node = manager.create(new, &ctx).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

/// GET /hierarchies/:kind/nodes/:id
pub async fn get_node(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, NodeId)>,
) -> Result<Json<HierarchyNode>, AppError> {
    let manager = manager_for(&state, &kind)?;
    Ok(Json(manager.get_by_id(id).await?))
}

/// PATCH /hierarchies/:kind/nodes/:id
pub async fn update_node_attributes(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, NodeId)>,
    headers: HeaderMap,
    Json(req): Json<UpdateAttributesRequest>,
) -> Result<Json<HierarchyNode>, AppError> {
    let manager = manager_for(&state, &kind)?;
    let ctx = actor_context(&headers)?;
    Ok(Json(manager.update_attributes(id, req.attributes, &ctx).await?))
}

/// DELETE /hierarchies/:kind/nodes/:id
pub async fn delete_node(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, NodeId)>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let manager = manager_for(&state, &kind)?;
    let ctx = actor_context(&headers)?;
    manager.delete(id, &ctx).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /hierarchies/:kind/nodes/:id/move
pub async fn move_node(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, NodeId)>,
    headers: HeaderMap,
    Json(req): Json<MoveNodeRequest>,
) -> Result<Json<MoveOutcome>, AppError> {
    req.validate()?;
    let manager = manager_for(&state, &kind)?;
    let ctx = actor_context(&headers)?;
    Ok(Json(manager.move_node(id, req.parent_id, &ctx).await?))
}

/// POST /hierarchies/:kind/nodes/:id/restore
pub async fn restore_node(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, NodeId)>,
    headers: HeaderMap,
) -> Result<Json<HierarchyNode>, AppError> {
    let manager = manager_for(&state, &kind)?;
    let ctx = actor_context(&headers)?;
    Ok(Json(manager.restore(id, &ctx).await?))
}

/// PUT /hierarchies/:kind/nodes/:id/status
pub async fn set_node_status(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, NodeId)>,
    headers: HeaderMap,
    Json(req): Json<StatusRequest>,
) -> Result<Json<HierarchyNode>, AppError> {
    let manager = manager_for(&state, &kind)?;
    let ctx = actor_context(&headers)?;
    Ok(Json(manager.set_status(id, req.status, &ctx).await?))
}

/// PUT /hierarchies/:kind/nodes/:id/sort-order
pub async fn reorder_node(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, NodeId)>,
    headers: HeaderMap,
    Json(req): Json<SortOrderRequest>,
) -> Result<Json<ReorderOutcome>, AppError> {
    req.validate()?;
    let manager = manager_for(&state, &kind)?;
    let ctx = actor_context(&headers)?;
    Ok(Json(manager.reorder(id, req.sort_order, &ctx).await?))
}

/// POST /hierarchies/:kind/nodes/batch-delete
pub async fn batch_delete_nodes(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Json(req): Json<BatchDeleteRequest>,
) -> Result<Json<BatchDeleteOutcome>, AppError> {
    req.validate()?;
    let manager = manager_for(&state, &kind)?;
    let ctx = actor_context(&headers)?;
    Ok(Json(manager.batch_delete(&req.ids, &ctx).await?))
}

/// GET /hierarchies/:kind/nodes/:id/children
pub async fn list_children(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, NodeId)>,
) -> Result<Json<NodeListResponse>, AppError> {
    let manager = manager_for(&state, &kind)?;
    let nodes = manager.get_children(Some(id)).await?;
    Ok(Json(NodeListResponse::new(manager.kind(), nodes)))
}

/// GET /hierarchies/:kind/roots
pub async fn list_roots(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<NodeListResponse>, AppError> {
    let manager = manager_for(&state, &kind)?;
    let nodes = manager.get_children(None).await?;
    Ok(Json(NodeListResponse::new(manager.kind(), nodes)))
}

/// GET /hierarchies/:kind/nodes/:id/ancestors
pub async fn list_ancestors(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, NodeId)>,
) -> Result<Json<NodeListResponse>, AppError> {
    let manager = manager_for(&state, &kind)?;
    let nodes = manager.get_ancestors(id).await?;
    Ok(Json(NodeListResponse::new(manager.kind(), nodes)))
}

/// GET /hierarchies/:kind/nodes/:id/descendants
pub async fn list_descendants(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, NodeId)>,
) -> Result<Json<NodeListResponse>, AppError> {
    let manager = manager_for(&state, &kind)?;
    let nodes = manager.get_descendants(id).await?;
    Ok(Json(NodeListResponse::new(manager.kind(), nodes)))
}

/// GET /hierarchies/:kind/nodes/:id/deletion-check
pub async fn deletion_check(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, NodeId)>,
) -> Result<Json<DeletionCheck>, AppError> {
    let manager = manager_for(&state, &kind)?;
    Ok(Json(manager.check_deletion(id).await?))
}

/// GET /hierarchies/:kind/tree?root=&enabled_only=
pub async fn get_tree(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<TreeQuery>,
) -> Result<Json<AssembledTree>, AppError> {
    let manager = manager_for(&state, &kind)?;
    Ok(Json(manager.get_tree(query.root, query.enabled_only).await?))
}

/// GET /hierarchies/:kind/tree/flat
pub async fn get_flat_tree(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<TreeQuery>,
) -> Result<Json<FlatTree>, AppError> {
    let manager = manager_for(&state, &kind)?;
    Ok(Json(manager.get_flat_tree(query.root, query.enabled_only).await?))
}

/// GET /hierarchies/:kind/stats
pub async fn get_stats(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<TreeStats>, AppError> {
    let manager = manager_for(&state, &kind)?;
    Ok(Json(manager.stats().await?))
}

/// GET /hierarchies/:kind/integrity
pub async fn verify_integrity(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<IntegrityReport>, AppError> {
    let manager = manager_for(&state, &kind)?;
    Ok(Json(manager.verify_integrity().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn actor_header_is_required() {
        let headers = HeaderMap::new();
        let err = actor_context(&headers).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn actor_header_must_be_a_positive_id() {
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_HEADER, HeaderValue::from_static("-3"));
        assert!(actor_context(&headers).is_err());

        headers.insert(ACTOR_HEADER, HeaderValue::from_static(" 42 "));
        assert_eq!(actor_context(&headers).unwrap().actor_id, 42);
    }

    #[test]
    fn batch_delete_requires_ids() {
        let req = BatchDeleteRequest { ids: vec![] };
        assert!(req.validate().is_err());
    }

    #[test]
    fn negative_parent_is_rejected() {
        let req = MoveNodeRequest { parent_id: Some(-1) };
        assert!(req.validate().is_err());
        let req = MoveNodeRequest { parent_id: Some(0) };
        assert!(req.validate().is_ok());
    }
}
