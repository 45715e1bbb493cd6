//! Execution service
//!
//! Creates executions: persists the record, chunks the requested tests into
//! batches, provisions the agent fleet, and moves the execution into
//! Running. Provisioning failure is fatal to the execution and surfaces as
//! a terminal Error with a human-readable reason.

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use gantry_core::domain::agent::Agent;
use gantry_core::domain::execution::{Execution, ExecutionStatus};
use gantry_core::domain::test::TestBatch;
use gantry_core::dto::execution::{AgentSummary, ExecutionDetail, ExecutionSummary, StartExecution};
use gantry_core::error::ProvisionError;

use crate::state::AppState;
use crate::storage::StorageError;

/// Service error type
#[derive(Debug)]
pub enum ExecutionError {
    NotFound(Uuid),
    ValidationError(String),
    ProvisioningFailed(ProvisionError),
    StorageError(StorageError),
}

impl From<StorageError> for ExecutionError {
    fn from(err: StorageError) -> Self {
        ExecutionError::StorageError(err)
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Create an execution and provision its agent fleet
pub async fn start_execution(state: &AppState, req: StartExecution) -> Result<ExecutionDetail> {
    validate_start_request(&req)?;

    let execution = Execution {
        id: Uuid::new_v4(),
        status: ExecutionStatus::Pending,
        requested_agents: req.replicas,
        failure_reason: None,
        requested_at: Utc::now(),
        completed_at: None,
    };
    let execution_id = execution.id;

    state.executions.create(execution).await?;
    state.results.init_pending(execution_id, &req.tests).await?;

    let batches: Vec<TestBatch> = req
        .tests
        .chunks(state.config.batch_size)
        .map(|tests| TestBatch {
            id: Uuid::new_v4(),
            execution_id,
            tests: tests.to_vec(),
        })
        .collect();

    info!(
        "Execution {} created: {} test(s) in {} batch(es), {} replica(s) requested",
        execution_id,
        req.tests.len(),
        batches.len(),
        req.replicas
    );

    state.batches.enqueue(batches).await?;

    let runtime_ids = match state
        .provisioner
        .create_and_start(execution_id, &req.configuration, req.replicas)
        .await
    {
        Ok(runtime_ids) => runtime_ids,
        Err(e) => {
            error!("Provisioning for execution {} failed: {}", execution_id, e);
            state
                .executions
                .try_complete(execution_id, ExecutionStatus::Error, Some(e.to_string()))
                .await?;
            state
                .results
                .mark_pending_failed(execution_id, "provisioning failed")
                .await?;
            return Err(ExecutionError::ProvisioningFailed(e));
        }
    };

    let now = Utc::now();
    let agents: Vec<Agent> = runtime_ids
        .iter()
        .map(|runtime_id| Agent {
            id: runtime_id.clone(),
            container_name: runtime_id.clone(),
            version: None,
            execution_id,
            registered_at: now,
        })
        .collect();

    state.agents.register(agents).await?;

    // Watch every agent from the moment it exists; a runtime that never
    // manages a single heartbeat still has to be crash-detected
    for runtime_id in &runtime_ids {
        state.liveness.record(runtime_id);
    }

    state.executions.set_running(execution_id).await?;

    info!(
        "Execution {} running with {} agent(s)",
        execution_id,
        runtime_ids.len()
    );

    get_execution(state, execution_id).await
}

/// Fetch one execution with its agent fleet
pub async fn get_execution(state: &AppState, id: Uuid) -> Result<ExecutionDetail> {
    let execution = state
        .executions
        .get(id)
        .await?
        .ok_or(ExecutionError::NotFound(id))?;

    let agents = state
        .agents
        .current_states(id)
        .await?
        .into_iter()
        .map(|(agent, agent_state)| AgentSummary {
            agent,
            state: agent_state,
        })
        .collect();

    let pending_tests = state.results.count_pending(id).await?;
    let remaining_batches = state.batches.remaining(id).await?;

    Ok(ExecutionDetail {
        execution,
        agents,
        pending_tests,
        remaining_batches,
    })
}

/// List all executions
pub async fn list_executions(state: &AppState) -> Result<Vec<ExecutionSummary>> {
    let executions = state.executions.list().await?;
    Ok(executions.into_iter().map(|e| e.into()).collect())
}

// =============================================================================
// Validation
// =============================================================================

fn validate_start_request(req: &StartExecution) -> Result<()> {
    if req.replicas == 0 {
        return Err(ExecutionError::ValidationError(
            "at least one agent replica is required".to_string(),
        ));
    }

    if req.configuration.tool_command.trim().is_empty() {
        return Err(ExecutionError::ValidationError(
            "tool_command cannot be empty".to_string(),
        ));
    }

    if req.configuration.image.trim().is_empty() {
        return Err(ExecutionError::ValidationError(
            "image cannot be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use gantry_core::dto::execution::RunConfiguration;
    use std::collections::HashMap;

    fn start_request(replicas: u32, tests: usize) -> StartExecution {
        StartExecution {
            configuration: RunConfiguration {
                image: "quay.io/gantry/agent:latest".to_string(),
                tool_command: "benchtool".to_string(),
                env: HashMap::new(),
            },
            tests: (0..tests)
                .map(|i| gantry_core::domain::test::TestCase {
                    id: Uuid::new_v4(),
                    name: format!("t{}", i),
                    arguments: vec![],
                })
                .collect(),
            replicas,
        }
    }

    #[tokio::test]
    async fn test_start_execution_provisions_and_runs() {
        let (state, _harness) = testutil::test_state().await;

        let detail = start_execution(&state, start_request(2, 7)).await.unwrap();

        assert_eq!(detail.execution.status, ExecutionStatus::Running);
        assert_eq!(detail.agents.len(), 2);
        assert_eq!(detail.pending_tests, 7);
        // batch_size is 3 in the test config: 7 tests make 3 batches
        assert_eq!(
            state
                .batches
                .remaining(detail.execution.id)
                .await
                .unwrap(),
            3
        );

        // Every agent is watched from the start
        for summary in &detail.agents {
            assert!(state.liveness.is_tracked(&summary.agent.id));
        }
    }

    #[tokio::test]
    async fn test_provisioning_failure_is_fatal() {
        let (state, harness) = testutil::test_state().await;
        harness.fail_provisioning(true);

        let err = start_execution(&state, start_request(3, 2)).await.unwrap_err();
        assert!(matches!(err, ExecutionError::ProvisioningFailed(_)));

        // The execution surfaces as Error with a reason, results are failed
        let executions = state.executions.list().await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Error);
        assert!(executions[0].failure_reason.is_some());
        assert_eq!(harness.pending_count(executions[0].id).await, 0);
    }

    #[tokio::test]
    async fn test_zero_replicas_rejected() {
        let (state, _harness) = testutil::test_state().await;
        let err = start_execution(&state, start_request(0, 1)).await.unwrap_err();
        assert!(matches!(err, ExecutionError::ValidationError(_)));
    }
}
