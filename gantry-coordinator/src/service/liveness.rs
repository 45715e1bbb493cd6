//! Liveness inspection
//!
//! Detects agents that have stopped communicating, independent of whatever
//! they last reported. Two watch mechanisms funnel into the same idempotent
//! crash marking:
//!
//! - the staleness scan declares any agent crashed whose last heartbeat is
//!   older than the configured timeout;
//! - the graceful-shutdown watch, started when the coordinator sends
//!   *terminate*, polls the provisioner a bounded number of times and
//!   declares the agent crashed if its runtime keeps running.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::time;
use tracing::{debug, error, info, warn};

use gantry_core::domain::agent::AgentState;

use crate::service::lifecycle;
use crate::state::AppState;

/// Last-seen bookkeeping for the agent fleet
///
/// Entries are inserted when agents are registered (so an agent that never
/// manages a single heartbeat is still caught), refreshed on every accepted
/// heartbeat, and removed when an agent halts or its execution is cleaned
/// up.
#[derive(Default)]
pub struct LivenessInspector {
    last_seen: DashMap<String, Instant>,
}

impl LivenessInspector {
    /// Creates an empty inspector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sign of life from the agent
    pub fn record(&self, agent_id: &str) {
        self.last_seen
            .insert(agent_id.to_string(), Instant::now());
    }

    /// Stop watching one agent
    pub fn forget(&self, agent_id: &str) {
        self.last_seen.remove(agent_id);
    }

    /// Whether the agent is currently being watched
    pub fn is_tracked(&self, agent_id: &str) -> bool {
        self.last_seen.contains_key(agent_id)
    }

    /// Agents whose last sign of life is older than `timeout`
    pub fn stale(&self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        self.last_seen
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) > timeout)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

/// Force one agent into Crashed and kick finalization
///
/// Idempotent: marking an already-halted agent is a no-op, so the staleness
/// scan and the shutdown watch can race on the same agent safely.
pub async fn mark_crashed(state: &AppState, agent_id: &str) {
    state.liveness.forget(agent_id);

    let agent = match state.agents.get(agent_id).await {
        Ok(Some(agent)) => agent,
        Ok(None) => {
            warn!("Cannot mark unknown agent {} as crashed", agent_id);
            return;
        }
        Err(e) => {
            error!("Failed to load agent {}: {:?}", agent_id, e);
            return;
        }
    };

    match state.agents.append_forced(agent_id, AgentState::Crashed).await {
        Ok(true) => {
            warn!(
                "Agent {} of execution {} marked as crashed",
                agent_id, agent.execution_id
            );

            if let Err(e) = lifecycle::finalize_if_complete(state, agent.execution_id).await {
                error!(
                    "Finalization after crash of {} failed: {:?}",
                    agent_id, e
                );
            }
        }
        Ok(false) => {
            debug!("Agent {} was already halted", agent_id);
        }
        Err(e) => {
            error!("Failed to record crash of {}: {:?}", agent_id, e);
        }
    }
}

/// Starts the periodic heartbeat-staleness scan
pub fn spawn_staleness_scan(state: AppState) -> tokio::task::JoinHandle<()> {
    let scan_interval = state.config.liveness_scan_interval;
    let timeout = state.config.liveness_timeout;

    info!(
        "Starting liveness scan (interval: {:?}, timeout: {:?})",
        scan_interval, timeout
    );

    tokio::spawn(async move {
        let mut ticker = time::interval(scan_interval);
        // The first tick fires immediately; skip it so freshly registered
        // agents get a full timeout before their first scan
        ticker.tick().await;

        loop {
            ticker.tick().await;

            for agent_id in state.liveness.stale(timeout) {
                warn!(
                    "No heartbeat from agent {} within {:?}, declaring crashed",
                    agent_id, timeout
                );
                mark_crashed(&state, &agent_id).await;
            }
        }
    })
}

/// Starts the bounded graceful-shutdown watch for one terminated agent
///
/// Polls the provisioner until the runtime reports stopped. If the runtime
/// is still running after `shutdown_max_checks` probes, the termination
/// directive was not honored in time and the agent is declared crashed.
pub fn spawn_shutdown_watch(state: AppState, agent_id: String) -> tokio::task::JoinHandle<()> {
    let poll_interval = state.config.shutdown_poll_interval;
    let max_checks = state.config.shutdown_max_checks;

    debug!(
        "Starting graceful-shutdown watch for agent {} ({} checks every {:?})",
        agent_id, max_checks, poll_interval
    );

    tokio::spawn(async move {
        for check in 1..=max_checks {
            time::sleep(poll_interval).await;

            if state.provisioner.is_stopped(&agent_id).await {
                debug!(
                    "Agent {} runtime stopped after {} check(s)",
                    agent_id, check
                );
                state.liveness.forget(&agent_id);
                return;
            }
        }

        warn!(
            "Agent {} did not honor termination within {} checks",
            agent_id, max_checks
        );
        mark_crashed(&state, &agent_id).await;
    })
}
