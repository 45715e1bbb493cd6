//! Execution API Handlers
//!
//! HTTP endpoints for starting and inspecting executions.

use axum::{
    Json,
    extract::{Path, State},
};
use uuid::Uuid;

use gantry_core::dto::execution::{ExecutionDetail, ExecutionSummary, StartExecution};

use crate::api::error::{ApiError, ApiResult};
use crate::service::execution_service;
use crate::state::AppState;

fn map_error(e: execution_service::ExecutionError) -> ApiError {
    match e {
        execution_service::ExecutionError::NotFound(id) => {
            ApiError::NotFound(format!("Execution {} not found", id))
        }
        execution_service::ExecutionError::ValidationError(msg) => ApiError::BadRequest(msg),
        execution_service::ExecutionError::ProvisioningFailed(err) => {
            ApiError::InternalError(format!("Provisioning failed: {}", err))
        }
        execution_service::ExecutionError::StorageError(err) => ApiError::StorageError(err),
    }
}

/// POST /api/executions
/// Create an execution and provision its agent fleet
pub async fn start_execution(
    State(state): State<AppState>,
    Json(req): Json<StartExecution>,
) -> ApiResult<Json<ExecutionDetail>> {
    tracing::info!(
        "Starting execution: {} test(s), {} replica(s)",
        req.tests.len(),
        req.replicas
    );

    let detail = execution_service::start_execution(&state, req)
        .await
        .map_err(map_error)?;

    Ok(Json(detail))
}

/// GET /api/executions/{id}
/// Get execution details including its agent fleet
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ExecutionDetail>> {
    tracing::debug!("Getting execution: {}", id);

    let detail = execution_service::get_execution(&state, id)
        .await
        .map_err(map_error)?;

    Ok(Json(detail))
}

/// GET /api/executions
/// List all executions
pub async fn list_executions(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ExecutionSummary>>> {
    tracing::debug!("Listing all executions");

    let executions = execution_service::list_executions(&state)
        .await
        .map_err(map_error)?;

    Ok(Json(executions))
}
