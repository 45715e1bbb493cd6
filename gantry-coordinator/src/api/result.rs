//! Result API Handlers
//!
//! The results-backend surface the agents submit to. The contract is thin
//! on purpose: an OK-class status means accepted.

use axum::{Json, extract::State, http::StatusCode};

use gantry_core::dto::result::{TestResultReport, ToolLogUpload};

use crate::api::error::ApiResult;
use crate::state::AppState;

/// POST /api/results
/// Record per-test outcomes submitted by an agent
pub async fn submit_results(
    State(state): State<AppState>,
    Json(report): Json<TestResultReport>,
) -> ApiResult<StatusCode> {
    tracing::info!(
        "Result submission from agent {}: {} outcome(s) for batch {}",
        report.agent_id,
        report.outcomes.len(),
        report.batch_id
    );

    state.results.record(&report).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/results/logs
/// Store a raw tool-log upload
pub async fn submit_logs(
    State(state): State<AppState>,
    Json(upload): Json<ToolLogUpload>,
) -> ApiResult<StatusCode> {
    tracing::debug!(
        "Log upload from agent {} ({} bytes)",
        upload.agent_id,
        upload.content.len()
    );

    state.results.append_log(&upload).await?;

    Ok(StatusCode::NO_CONTENT)
}
