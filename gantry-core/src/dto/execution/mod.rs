//! Execution DTOs
//!
//! Request and response shapes for starting and inspecting executions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::agent::{Agent, AgentState};
use crate::domain::execution::Execution;
use crate::domain::test::TestCase;

/// Runtime configuration shared by all agents of an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfiguration {
    /// Container image hosting the agent (ignored by process runtimes)
    pub image: String,

    /// Command the agent invokes as the benchmark tool
    pub tool_command: String,

    /// Extra environment passed to every agent runtime
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Request to start a new execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartExecution {
    /// Runtime configuration for the agent fleet
    pub configuration: RunConfiguration,

    /// Tests to distribute across the fleet
    pub tests: Vec<TestCase>,

    /// Number of agent replicas to provision
    pub replicas: u32,
}

/// Execution detail including its agent fleet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDetail {
    /// The execution record
    pub execution: Execution,

    /// Agents with their current state, if any sample was recorded
    pub agents: Vec<AgentSummary>,

    /// Number of tests still without a recorded outcome
    pub pending_tests: u64,

    /// Number of batches not yet completed
    pub remaining_batches: u64,
}

/// One agent with its most recent state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    /// The agent record
    pub agent: Agent,

    /// Most recent recorded state
    pub state: Option<AgentState>,
}

/// Lightweight execution summary for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub id: Uuid,
    pub status: crate::domain::execution::ExecutionStatus,
    pub requested_agents: u32,
    pub failure_reason: Option<String>,
}

impl From<Execution> for ExecutionSummary {
    fn from(execution: Execution) -> Self {
        Self {
            id: execution.id,
            status: execution.status,
            requested_agents: execution.requested_agents,
            failure_reason: execution.failure_reason,
        }
    }
}
