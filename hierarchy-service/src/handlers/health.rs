use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::AppState;

/// Liveness plus a store round trip for every served hierarchy.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut failing = Vec::new();
    for kind in state.hierarchies.kinds() {
        if let Some(manager) = state.hierarchies.get(kind) {
            if let Err(e) = manager.health_check().await {
                tracing::warn!(kind = %kind, error = %e, "Health check failed");
                failing.push(kind.to_string());
            }
        }
    }

    let status = if failing.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = Json(json!({
        "status": if failing.is_empty() { "ok" } else { "degraded" },
        "service": state.service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "failing": failing,
    }));
    (status, body)
}
