// GET handlers: version, nodes, metrics history. PUT: probe target reassignment.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::models::{Ack, MetricSnapshot, NodeStatus, Target};
use crate::version::{NAME, VERSION};

/// GET /version: returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/nodes: every known node with liveness derived now.
pub(super) async fn list_nodes_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<NodeStatus>>, ApiError> {
    Ok(Json(state.store.list_nodes().await?))
}

#[derive(Debug, Deserialize)]
pub(super) struct MetricsQuery {
    node_id: Option<String>,
    limit: Option<usize>,
}

/// GET /api/metrics?node_id=..&limit=..: oldest-first history for one node.
pub(super) async fn metrics_handler(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<Vec<MetricSnapshot>>, ApiError> {
    let node_id = query
        .node_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing node_id".into()))?;
    let limit = query.limit.unwrap_or(state.default_history_limit);
    Ok(Json(state.store.history(&node_id, limit).await?))
}

/// PUT /api/nodes/{node_id}/targets: pushes a replacement target set down the node's stream.
pub(super) async fn assign_targets_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(targets): Json<Vec<Target>>,
) -> Result<impl IntoResponse, ApiError> {
    if targets.is_empty() {
        return Err(ApiError::BadRequest("target list must not be empty".into()));
    }
    let count = targets.len();
    if !state.downlinks.send(&node_id, Ack::reassign(targets)) {
        return Err(ApiError::NotFound(format!(
            "node {} has no live report stream",
            node_id
        )));
    }
    tracing::info!(node_id = %node_id, targets = count, "probe targets queued for node");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "nodeId": node_id, "targets": count })),
    ))
}
