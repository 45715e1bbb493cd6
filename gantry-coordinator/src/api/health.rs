//! Health Check API Handler
//!
//! Simple liveness endpoint for monitoring the coordinator itself.

use axum::{Json, http::StatusCode, response::IntoResponse};

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ok", "service": "gantry-coordinator" })),
    )
}
