// HTTP + WebSocket routes: report stream ingestion and the read-only dashboard API

mod error;
mod http;
mod ws;

use axum::{
    Router,
    routing::{get, put},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::ingest::{DownlinkRegistry, IngestStats};
use crate::storage::Store;

pub use error::ApiError;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) downlinks: Arc<DownlinkRegistry>,
    pub(crate) stats: Arc<IngestStats>,
    /// `limit` used by /api/metrics when the query omits it.
    pub(crate) default_history_limit: usize,
}

pub fn app(
    store: Arc<dyn Store>,
    downlinks: Arc<DownlinkRegistry>,
    stats: Arc<IngestStats>,
    default_history_limit: usize,
) -> Router {
    let state = AppState {
        store,
        downlinks,
        stats,
        default_history_limit,
    };
    Router::new()
        .route("/", get(|| async { "fleetwatch controller" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/nodes", get(http::list_nodes_handler)) // GET /api/nodes
        .route("/api/metrics", get(http::metrics_handler)) // GET /api/metrics?node_id=&limit=
        .route(
            "/api/nodes/{node_id}/targets",
            put(http::assign_targets_handler),
        ) // PUT /api/nodes/{node_id}/targets
        .route("/ws/report", get(ws::ws_report)) // WS /ws/report
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
