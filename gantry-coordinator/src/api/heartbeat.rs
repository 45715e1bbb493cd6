//! Heartbeat API Handler
//!
//! The endpoint every agent polls. One heartbeat in, exactly one directive
//! out; a heartbeat is never left unanswered with anything but an error
//! status the agent treats as a transport failure.

use axum::{Json, extract::State};

use gantry_core::dto::heartbeat::{Heartbeat, HeartbeatResponse};

use crate::api::error::{ApiError, ApiResult};
use crate::service::heartbeat_service;
use crate::state::AppState;

/// POST /api/heartbeat
/// Accept one agent heartbeat and answer with a directive
pub async fn accept_heartbeat(
    State(state): State<AppState>,
    Json(heartbeat): Json<Heartbeat>,
) -> ApiResult<Json<HeartbeatResponse>> {
    tracing::debug!(
        "Heartbeat from agent {} (state {})",
        heartbeat.agent_id,
        heartbeat.state
    );

    let response = heartbeat_service::accept_heartbeat(&state, heartbeat)
        .await
        .map_err(|e| match e {
            heartbeat_service::HeartbeatError::UnknownAgent(id) => {
                ApiError::NotFound(format!("Agent {} not found", id))
            }
            heartbeat_service::HeartbeatError::StorageError(err) => ApiError::StorageError(err),
        })?;

    Ok(Json(response))
}
