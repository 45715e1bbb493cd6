//! API Module
//!
//! HTTP API layer for the coordinator.
//! Each submodule handles endpoints for a specific domain.

pub mod agent;
pub mod error;
pub mod execution;
pub mod health;
pub mod heartbeat;
pub mod result;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Execution endpoints
        .route("/api/executions", post(execution::start_execution))
        .route("/api/executions", get(execution::list_executions))
        .route("/api/executions/{id}", get(execution::get_execution))
        // Agent endpoints
        .route("/api/heartbeat", post(heartbeat::accept_heartbeat))
        .route("/api/agents/{id}/data", post(agent::report_agent_data))
        .route("/api/agents/{id}/status", get(agent::get_agent_status))
        // Results-backend endpoints
        .route("/api/results", post(result::submit_results))
        .route("/api/results/logs", post(result::submit_logs))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
