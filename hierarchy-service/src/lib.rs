//! Hierarchy Service - materialized-path trees for departments, categories,
//! permissions and roles.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

use axum::{
    middleware::from_fn,
    routing::{get, post, put},
    Router,
};
use service_core::middleware::request_id_middleware;
use tower_http::trace::TraceLayer;

use crate::services::Hierarchies;

#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    pub hierarchies: Hierarchies,
}

/// Build the HTTP router over the given state.
pub fn build_router(state: AppState) -> Router {
    let hierarchy_routes = Router::new()
        .route("/nodes", post(handlers::create_node))
        .route("/nodes/batch-delete", post(handlers::batch_delete_nodes))
        .route(
            "/nodes/:id",
            get(handlers::get_node)
                .patch(handlers::update_node_attributes)
                .delete(handlers::delete_node),
        )
        .route("/nodes/:id/move", post(handlers::move_node))
        .route("/nodes/:id/restore", post(handlers::restore_node))
        .route("/nodes/:id/status", put(handlers::set_node_status))
        .route("/nodes/:id/sort-order", put(handlers::reorder_node))
        .route("/nodes/:id/children", get(handlers::list_children))
        .route("/nodes/:id/ancestors", get(handlers::list_ancestors))
        .route("/nodes/:id/descendants", get(handlers::list_descendants))
        .route("/nodes/:id/deletion-check", get(handlers::deletion_check))
        .route("/roots", get(handlers::list_roots))
        .route("/tree", get(handlers::get_tree))
        .route("/tree/flat", get(handlers::get_flat_tree))
        .route("/stats", get(handlers::get_stats))
        .route("/integrity", get(handlers::verify_integrity));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .nest("/hierarchies/:kind", hierarchy_routes)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
