//! Agent DTOs
//!
//! Data transfer objects for agent-related operations.

use serde::{Deserialize, Serialize};

use crate::domain::agent::{Agent, AgentState, AgentStatusSample};

/// Additional data reported once by each agent at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentData {
    /// Agent software version string
    pub version: String,
}

/// One agent with its full status history, for fleet inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusDetail {
    /// The agent record
    pub agent: Agent,

    /// Most recent recorded state
    pub state: Option<AgentState>,

    /// Whether the liveness inspector is currently watching this agent
    pub watched: bool,

    /// Status samples in append order
    pub history: Vec<AgentStatusSample>,
}
