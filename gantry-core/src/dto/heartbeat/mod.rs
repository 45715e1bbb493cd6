//! Heartbeat protocol DTOs
//!
//! A heartbeat is the only channel an agent has to the coordinator, and the
//! response directive is the only channel back. Exactly one directive is
//! produced per heartbeat; there is no partial or combined response.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::AgentState;
use crate::domain::test::TestCase;

/// Periodic status report sent by an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    /// The reporting agent
    pub agent_id: String,

    /// The agent's current in-memory state
    pub state: AgentState,

    /// Per-process monotonic counter; the coordinator ignores samples whose
    /// sequence is not newer than the last one recorded for the agent
    pub sequence: u64,

    /// Progress through the agent's assigned work
    pub progress: ExecutionProgress,
}

/// Progress through an agent's assigned work
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecutionProgress {
    /// Tests completed so far across all batches this agent has run
    pub completed: u32,

    /// Tests handed to this agent so far
    pub total: u32,
}

/// Directive returned for one heartbeat
///
/// Encoded as a tagged payload so every consumer dispatches exhaustively;
/// adding a variant breaks every match site at compile time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum HeartbeatResponse {
    /// Start running the given batch
    NewBatch {
        /// The batch being assigned
        batch_id: Uuid,
        /// Tests in assignment order
        tests: Vec<TestCase>,
    },

    /// No work available yet, stay idle
    Wait,

    /// No change, keep doing what you are doing
    Continue,

    /// Shut down gracefully
    Terminate,
}

impl HeartbeatResponse {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            HeartbeatResponse::NewBatch { .. } => "new_batch",
            HeartbeatResponse::Wait => "wait",
            HeartbeatResponse::Continue => "continue",
            HeartbeatResponse::Terminate => "terminate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_tagged_encoding() {
        let response = HeartbeatResponse::NewBatch {
            batch_id: Uuid::new_v4(),
            tests: vec![TestCase {
                id: Uuid::new_v4(),
                name: "lint-core".to_string(),
                arguments: vec![],
            }],
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["directive"], "new_batch");
        assert_eq!(json["tests"].as_array().unwrap().len(), 1);

        let wait = serde_json::to_value(HeartbeatResponse::Wait).unwrap();
        assert_eq!(wait["directive"], "wait");
    }

    #[test]
    fn test_directive_round_trip() {
        for response in [
            HeartbeatResponse::Wait,
            HeartbeatResponse::Continue,
            HeartbeatResponse::Terminate,
        ] {
            let json = serde_json::to_string(&response).unwrap();
            let back: HeartbeatResponse = serde_json::from_str(&json).unwrap();
            assert_eq!(back.kind(), response.kind());
        }
    }

    #[test]
    fn test_heartbeat_serialization() {
        let heartbeat = Heartbeat {
            agent_id: "agent-1".to_string(),
            state: AgentState::Idle,
            sequence: 7,
            progress: ExecutionProgress {
                completed: 3,
                total: 10,
            },
        };

        let json = serde_json::to_string(&heartbeat).unwrap();
        let back: Heartbeat = serde_json::from_str(&json).unwrap();
        assert_eq!(back.agent_id, "agent-1");
        assert_eq!(back.state, AgentState::Idle);
        assert_eq!(back.sequence, 7);
    }
}
