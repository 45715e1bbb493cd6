//! Agent domain model
//!
//! An agent is one worker process bound 1:1 to a provisioned runtime
//! (container or local process). The agent's identity is immutable; its
//! state is an append-only log of timestamped samples, and "current state"
//! means the sample with the highest sequence number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A worker bound to one provisioned runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Runtime identifier, stable for the runtime's lifetime. This is the
    /// opaque join key between the agent record and the provisioner's
    /// compute unit; never parse or compare it structurally.
    pub id: String,

    /// Container name as reported by the provisioner backend
    pub container_name: String,

    /// Agent software version, filled in by the additional-data report
    pub version: Option<String>,

    /// Execution this agent belongs to
    pub execution_id: Uuid,

    /// When the agent record was created
    pub registered_at: DateTime<Utc>,
}

/// State of an agent as reported over heartbeats or forced by the coordinator
///
/// The legal transitions form the graph
/// `Starting -> Idle <-> Busy -> Finished`, with `Crashed` and `Terminated`
/// reachable from any active state and absorbing, and the soft-failure
/// states reachable from `Busy` and recoverable on the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    /// Runtime started, agent has not received work yet
    Starting,

    /// Waiting for a batch
    Idle,

    /// A local test run is in flight
    Busy,

    /// Local run complete, results submitted (or submission abandoned)
    Finished,

    /// Liveness violation or unhonored termination; forced by the coordinator
    Crashed,

    /// Told to shut down gracefully
    Terminated,

    /// Results backend replied non-OK after all retries
    BackendFailure,

    /// Results backend was unreachable after all retries
    BackendUnreachable,

    /// The test tool exited non-zero without producing output
    CliFailed,
}

impl AgentState {
    /// Whether this state counts as terminal for execution finalization
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentState::Finished | AgentState::Crashed | AgentState::Terminated
        )
    }

    /// Whether this state is absorbing: once entered, the agent never
    /// re-enters an active state and any further heartbeat is anomalous
    pub fn is_halted(self) -> bool {
        matches!(self, AgentState::Crashed | AgentState::Terminated)
    }

    /// Soft failures the agent reports about itself; the coordinator keeps
    /// the agent alive so the next cycle can retry
    pub fn is_soft_failure(self) -> bool {
        matches!(
            self,
            AgentState::BackendFailure | AgentState::BackendUnreachable | AgentState::CliFailed
        )
    }

    /// Whether the agent is done with its work or waiting for more, i.e.
    /// not actively running anything and not in a retryable failure
    pub fn is_idle_or_done(self) -> bool {
        matches!(
            self,
            AgentState::Idle | AgentState::Finished | AgentState::Terminated | AgentState::Crashed
        )
    }

    /// Whether `next` is a legal successor of `self` in the state graph
    pub fn may_transition(self, next: AgentState) -> bool {
        use AgentState::*;

        if self.is_halted() {
            return false;
        }

        match next {
            // Absorbing states are reachable from any non-halted state
            Crashed | Terminated => true,
            Starting => false,
            Idle => matches!(
                self,
                Starting | Idle | Busy | Finished | BackendFailure | BackendUnreachable | CliFailed
            ),
            Busy => matches!(self, Starting | Idle | Busy | Finished),
            Finished => matches!(
                self,
                Busy | Finished | BackendFailure | BackendUnreachable
            ),
            BackendFailure | BackendUnreachable | CliFailed => matches!(self, Busy),
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AgentState::Starting => "Starting",
            AgentState::Idle => "Idle",
            AgentState::Busy => "Busy",
            AgentState::Finished => "Finished",
            AgentState::Crashed => "Crashed",
            AgentState::Terminated => "Terminated",
            AgentState::BackendFailure => "BackendFailure",
            AgentState::BackendUnreachable => "BackendUnreachable",
            AgentState::CliFailed => "CliFailed",
        };
        write!(f, "{}", name)
    }
}

/// One timestamped state sample for an agent
///
/// Samples form an append-only log per agent. The sequence number is
/// monotonically increasing per agent so that a late-arriving older sample
/// can never overwrite a newer one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusSample {
    /// The agent this sample belongs to
    pub agent_id: String,

    /// Reported or forced state
    pub state: AgentState,

    /// Monotonic per-agent sequence number
    pub sequence: u64,

    /// When the sample was recorded
    pub recorded_at: DateTime<Utc>,
}
