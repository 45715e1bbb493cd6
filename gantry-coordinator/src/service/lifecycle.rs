//! Execution lifecycle management
//!
//! Aggregates per-agent state into the execution status machine
//! `Pending -> Running -> {Finished | Error}` and owns the only code path
//! that moves an execution into a terminal status. Finalization is invoked
//! after every agent status change and is safe to run concurrently: the
//! terminal transition is a compare-and-set, so cleanup runs exactly once.

use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use gantry_core::domain::agent::AgentState;
use gantry_core::domain::execution::ExecutionStatus;
use gantry_core::error::LifecycleError;

use crate::state::AppState;
use crate::storage::StorageError;

/// Service error type
#[derive(Debug)]
pub enum FinalizeError {
    /// Agents ended in a combination with no defined final status
    Unsupported(LifecycleError),
    StorageError(StorageError),
}

impl From<StorageError> for FinalizeError {
    fn from(err: StorageError) -> Self {
        FinalizeError::StorageError(err)
    }
}

/// Finalize the execution if every agent has reached a terminal state
///
/// Re-checks once after a settle delay before deciding, to absorb racing
/// status writes from concurrent agents. No-op when agents are still
/// active, when the execution is already terminal, or when agents are
/// still in `Finished` (those are told to terminate on their next
/// heartbeat, or crash-marked by the liveness inspector).
pub async fn finalize_if_complete(
    state: &AppState,
    execution_id: Uuid,
) -> Result<(), FinalizeError> {
    let snapshot = state.agents.current_states(execution_id).await?;
    if snapshot.is_empty() || !all_terminal(&snapshot) {
        return Ok(());
    }

    // Absorb eventually-consistent writes before trusting the read
    time::sleep(state.config.finalize_settle_delay).await;

    let execution = match state.executions.get(execution_id).await? {
        Some(execution) => execution,
        None => return Ok(()),
    };
    if execution.status.is_terminal() {
        return Ok(());
    }

    let snapshot = state.agents.current_states(execution_id).await?;
    if !all_terminal(&snapshot) {
        return Ok(());
    }

    let terminated = count_state(&snapshot, AgentState::Terminated);
    let crashed = count_state(&snapshot, AgentState::Crashed);
    let finished = count_state(&snapshot, AgentState::Finished);

    if finished > 0 {
        debug!(
            "Execution {} has {} agent(s) still in Finished, waiting for termination",
            execution_id, finished
        );
        return Ok(());
    }

    let (status, reason) = if crashed == 0 {
        (ExecutionStatus::Finished, None)
    } else if terminated == 0 {
        (
            ExecutionStatus::Error,
            Some(format!("all {} agent(s) crashed", crashed)),
        )
    } else {
        let err = LifecycleError::UnsupportedStateCombination {
            execution_id,
            terminated,
            crashed,
        };
        error!("Refusing to finalize: {}", err);
        return Err(FinalizeError::Unsupported(err));
    };

    if !state
        .executions
        .try_complete(execution_id, status, reason)
        .await?
    {
        // Another finalization won the race
        return Ok(());
    }

    info!("Execution {} finalized as {}", execution_id, status);

    if status == ExecutionStatus::Error {
        match state
            .results
            .mark_pending_failed(execution_id, "execution failed: all agents crashed")
            .await
        {
            Ok(count) if count > 0 => {
                info!(
                    "Marked {} pending result(s) of execution {} as failed",
                    count, execution_id
                );
            }
            Ok(_) => {}
            Err(e) => error!(
                "Failed to mark pending results of {}: {:?}",
                execution_id, e
            ),
        }
    }

    cleanup_execution(state, execution_id).await;

    Ok(())
}

/// Tear down runtimes and drop liveness state for a finalized execution
///
/// Cleanup failures are logged and retried once, never escalated as
/// execution failures.
pub async fn cleanup_execution(state: &AppState, execution_id: Uuid) {
    if let Ok(snapshot) = state.agents.current_states(execution_id).await {
        for (agent, _) in &snapshot {
            state.liveness.forget(&agent.id);
        }
    }

    match state.provisioner.list_container_ids(execution_id).await {
        Ok(runtime_ids) => debug!(
            "Tearing down {} runtime(s) for execution {}",
            runtime_ids.len(),
            execution_id
        ),
        Err(e) => debug!("Could not list runtimes for execution {}: {}", execution_id, e),
    }

    const CLEANUP_ATTEMPTS: u32 = 2;

    for attempt in 1..=CLEANUP_ATTEMPTS {
        match state.provisioner.cleanup_all_by_execution(execution_id).await {
            Ok(()) => return,
            Err(e) => {
                warn!(
                    "Runtime cleanup for execution {} failed (attempt {}/{}): {}",
                    execution_id, attempt, CLEANUP_ATTEMPTS, e
                );
                if attempt < CLEANUP_ATTEMPTS {
                    time::sleep(state.config.finalize_settle_delay).await;
                }
            }
        }
    }
}

fn all_terminal(snapshot: &[(gantry_core::domain::agent::Agent, Option<AgentState>)]) -> bool {
    snapshot
        .iter()
        .all(|(_, state)| state.is_some_and(|s| s.is_terminal()))
}

fn count_state(
    snapshot: &[(gantry_core::domain::agent::Agent, Option<AgentState>)],
    wanted: AgentState,
) -> usize {
    snapshot
        .iter()
        .filter(|(_, state)| *state == Some(wanted))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[tokio::test]
    async fn test_all_terminated_finalizes_as_finished() {
        let (state, harness) = testutil::test_state().await;
        let execution_id = testutil::start_execution(&state, 2, &[]).await;

        for agent_id in harness.agent_ids(&state, execution_id).await {
            state
                .agents
                .append_forced(&agent_id, AgentState::Terminated)
                .await
                .unwrap();
        }

        finalize_if_complete(&state, execution_id).await.unwrap();

        let execution = state.executions.get(execution_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Finished);
        assert!(execution.failure_reason.is_none());
        assert_eq!(harness.cleanup_calls(), 1);
    }

    #[tokio::test]
    async fn test_finalization_and_cleanup_run_exactly_once() {
        let (state, harness) = testutil::test_state().await;
        let execution_id = testutil::start_execution(&state, 1, &[]).await;

        for agent_id in harness.agent_ids(&state, execution_id).await {
            state
                .agents
                .append_forced(&agent_id, AgentState::Terminated)
                .await
                .unwrap();
        }

        finalize_if_complete(&state, execution_id).await.unwrap();
        finalize_if_complete(&state, execution_id).await.unwrap();

        assert_eq!(harness.cleanup_calls(), 1);
    }

    #[tokio::test]
    async fn test_all_crashed_finalizes_as_error_with_failed_results() {
        let (state, harness) = testutil::test_state().await;
        let execution_id = testutil::start_execution(&state, 2, &["t1", "t2", "t3"]).await;

        for agent_id in harness.agent_ids(&state, execution_id).await {
            state
                .agents
                .append_forced(&agent_id, AgentState::Crashed)
                .await
                .unwrap();
        }

        finalize_if_complete(&state, execution_id).await.unwrap();

        let execution = state.executions.get(execution_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Error);
        assert!(execution.failure_reason.unwrap().contains("crashed"));
        assert_eq!(harness.pending_count(execution_id).await, 0);
        assert_eq!(harness.cleanup_calls(), 1);
    }

    #[tokio::test]
    async fn test_mixed_terminal_states_refuse_finalization() {
        let (state, harness) = testutil::test_state().await;
        let execution_id = testutil::start_execution(&state, 2, &[]).await;
        let agent_ids = harness.agent_ids(&state, execution_id).await;

        state
            .agents
            .append_forced(&agent_ids[0], AgentState::Terminated)
            .await
            .unwrap();
        state
            .agents
            .append_forced(&agent_ids[1], AgentState::Crashed)
            .await
            .unwrap();

        let err = finalize_if_complete(&state, execution_id)
            .await
            .unwrap_err();
        assert!(matches!(err, FinalizeError::Unsupported(_)));

        // The execution is left for operator attention, nothing is torn down
        let execution = state.executions.get(execution_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(harness.cleanup_calls(), 0);
    }

    #[tokio::test]
    async fn test_active_agents_block_finalization() {
        let (state, harness) = testutil::test_state().await;
        let execution_id = testutil::start_execution(&state, 2, &[]).await;
        let agent_ids = harness.agent_ids(&state, execution_id).await;

        state
            .agents
            .append_forced(&agent_ids[0], AgentState::Terminated)
            .await
            .unwrap();
        state
            .agents
            .append_forced(&agent_ids[1], AgentState::Busy)
            .await
            .unwrap();

        finalize_if_complete(&state, execution_id).await.unwrap();

        let execution = state.executions.get(execution_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(harness.cleanup_calls(), 0);
    }
}
