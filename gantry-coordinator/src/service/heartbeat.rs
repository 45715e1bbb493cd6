//! Heartbeat protocol handling
//!
//! The coordinator-side brain of the control plane: every heartbeat is
//! recorded, persisted, and answered with exactly one directive. Batch
//! assignment is idempotent; an agent re-sending a heartbeat gets its
//! outstanding batch again instead of a second one, and assignment is
//! side-effect-free when no work exists.

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use gantry_core::domain::agent::{Agent, AgentState};
use gantry_core::dto::heartbeat::{Heartbeat, HeartbeatResponse};

use crate::service::{lifecycle, liveness};
use crate::state::AppState;
use crate::storage::StorageError;

/// Service error type
#[derive(Debug)]
pub enum HeartbeatError {
    /// Heartbeat from an agent id no provisioner ever registered
    UnknownAgent(String),
    StorageError(StorageError),
}

impl From<StorageError> for HeartbeatError {
    fn from(err: StorageError) -> Self {
        HeartbeatError::StorageError(err)
    }
}

pub type Result<T> = std::result::Result<T, HeartbeatError>;

/// Accept one heartbeat and produce the directive for this cycle
pub async fn accept_heartbeat(
    state: &AppState,
    heartbeat: Heartbeat,
) -> Result<HeartbeatResponse> {
    // Feed the staleness watch before anything can fail
    state.liveness.record(&heartbeat.agent_id);

    let agent = state
        .agents
        .get(&heartbeat.agent_id)
        .await?
        .ok_or_else(|| HeartbeatError::UnknownAgent(heartbeat.agent_id.clone()))?;

    // An agent the coordinator already halted has no business talking.
    // Whatever it reports, the only answer is to go away.
    let current = state.agents.current_state(&agent.id).await?;
    if let Some(current) = current {
        if current.is_halted() {
            warn!(
                "Anomalous heartbeat from halted agent {} (recorded state {})",
                agent.id, current
            );
            state.liveness.forget(&agent.id);
            return Ok(HeartbeatResponse::Terminate);
        }

        if current != heartbeat.state && !current.may_transition(heartbeat.state) {
            warn!(
                "Agent {} reported {} after {}, outside the state graph",
                agent.id, heartbeat.state, current
            );
        }
    }

    // An agent claiming a terminal state while still able to talk violates
    // the state graph. Route it into the crash-watch path: terminate it and
    // let the shutdown watch crash-mark it if the runtime keeps running.
    if heartbeat.state.is_halted() {
        warn!(
            "Agent {} reported terminal state {} over a live heartbeat",
            agent.id, heartbeat.state
        );
        liveness::spawn_shutdown_watch(state.clone(), agent.id.clone());
        return Ok(HeartbeatResponse::Terminate);
    }

    let recorded = state
        .agents
        .append_reported(&agent.id, heartbeat.state, heartbeat.sequence)
        .await?;
    if !recorded {
        debug!(
            "Stale sample from agent {} ignored (state {}, sequence {})",
            agent.id, heartbeat.state, heartbeat.sequence
        );
    }

    let response = match heartbeat.state {
        AgentState::Starting | AgentState::Idle => assign_or_park(state, &agent).await?,

        AgentState::Finished => match state.batches.assigned_to(&agent.id).await? {
            Some(batch) => {
                if state
                    .results
                    .results_saved(agent.execution_id, &batch)
                    .await?
                {
                    state.batches.complete_assigned(&agent.id).await?;
                    assign_or_park(state, &agent).await?
                } else {
                    // Keep the batch bound to the agent so the same work is
                    // re-dispatched on its next idle heartbeat instead of
                    // terminating away the retry opportunity
                    warn!(
                        "Agent {} finished batch {} but its results were not durably saved",
                        agent.id, batch.id
                    );
                    let test_ids: Vec<Uuid> = batch.tests.iter().map(|t| t.id).collect();
                    state
                        .results
                        .mark_failed(
                            agent.execution_id,
                            &test_ids,
                            "results were not durably saved",
                        )
                        .await?;
                    HeartbeatResponse::Wait
                }
            }
            // Finished with nothing outstanding: treat like idle
            None => assign_or_park(state, &agent).await?,
        },

        AgentState::Busy => HeartbeatResponse::Continue,

        // The agent recovers on its own on the next cycle; keep it alive
        AgentState::BackendFailure | AgentState::BackendUnreachable | AgentState::CliFailed => {
            HeartbeatResponse::Wait
        }

        // Handled above, but the match stays exhaustive so a new state
        // cannot slip through silently
        AgentState::Crashed | AgentState::Terminated => HeartbeatResponse::Terminate,
    };

    debug!(
        "Heartbeat from agent {} ({}, {}/{} tests done) answered with {}",
        agent.id,
        heartbeat.state,
        heartbeat.progress.completed,
        heartbeat.progress.total,
        response.kind()
    );

    Ok(response)
}

/// Hand the agent work, or decide between waiting and terminating
async fn assign_or_park(state: &AppState, agent: &Agent) -> Result<HeartbeatResponse> {
    // An outstanding assignment is re-sent, never duplicated
    if let Some(batch) = state.batches.assigned_to(&agent.id).await? {
        debug!(
            "Re-sending outstanding batch {} to agent {}",
            batch.id, agent.id
        );
        return Ok(HeartbeatResponse::NewBatch {
            batch_id: batch.id,
            tests: batch.tests,
        });
    }

    if let Some(batch) = state
        .batches
        .claim_next(agent.execution_id, &agent.id)
        .await?
    {
        state
            .agents
            .append_forced(&agent.id, AgentState::Busy)
            .await?;
        info!(
            "Assigned batch {} ({} test(s)) to agent {}",
            batch.id,
            batch.tests.len(),
            agent.id
        );
        return Ok(HeartbeatResponse::NewBatch {
            batch_id: batch.id,
            tests: batch.tests,
        });
    }

    // No work left. Terminate once the whole fleet is idle or done;
    // otherwise park this agent while its siblings drain their batches.
    let snapshot = state.agents.current_states(agent.execution_id).await?;
    let all_done = snapshot.iter().all(|(sibling, sibling_state)| {
        sibling.id == agent.id || sibling_state.is_some_and(|s| s.is_idle_or_done())
    });

    if !all_done {
        return Ok(HeartbeatResponse::Wait);
    }

    state
        .agents
        .append_forced(&agent.id, AgentState::Terminated)
        .await?;
    info!(
        "No work left in execution {}, terminating agent {}",
        agent.execution_id, agent.id
    );

    liveness::spawn_shutdown_watch(state.clone(), agent.id.clone());

    // Finalization sleeps a settle delay; never block the heartbeat on it
    let finalize_state = state.clone();
    let execution_id = agent.execution_id;
    tokio::spawn(async move {
        if let Err(e) = lifecycle::finalize_if_complete(&finalize_state, execution_id).await {
            error!("Finalization of execution {} failed: {:?}", execution_id, e);
        }
    });

    Ok(HeartbeatResponse::Terminate)
}
