//! Agent API Handlers
//!
//! HTTP endpoints for agent metadata and fleet inspection.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use gantry_core::dto::agent::{AgentData, AgentStatusDetail};

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

/// POST /api/agents/{id}/data
/// Record agent metadata (version info)
pub async fn report_agent_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(data): Json<AgentData>,
) -> ApiResult<StatusCode> {
    tracing::debug!("Additional data from agent {}: version {}", id, data.version);

    let updated = state.agents.update_version(&id, &data.version).await?;
    if !updated {
        return Err(ApiError::NotFound(format!("Agent {} not found", id)));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/agents/{id}/status
/// Get one agent with its full status history
pub async fn get_agent_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<AgentStatusDetail>> {
    tracing::debug!("Getting status of agent {}", id);

    let agent = state
        .agents
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Agent {} not found", id)))?;

    let history = state.agents.history(&id).await?;

    Ok(Json(AgentStatusDetail {
        state: history.last().map(|sample| sample.state),
        watched: state.liveness.is_tracked(&agent.id),
        agent,
        history,
    }))
}
