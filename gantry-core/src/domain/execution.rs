//! Execution domain model
//!
//! An execution is one request to run a batch of tests across a fleet of
//! agents. Its status is owned by the coordinator's lifecycle manager and
//! only ever moves forward: `Pending -> Running -> {Finished | Error}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One request to run a batch of tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Unique identifier for the execution
    pub id: Uuid,

    /// Current lifecycle status
    pub status: ExecutionStatus,

    /// Number of agent replicas requested for this execution
    pub requested_agents: u32,

    /// Human-readable failure reason, set when status is Error
    pub failure_reason: Option<String>,

    /// When the execution was requested
    pub requested_at: DateTime<Utc>,

    /// When the execution reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

/// Lifecycle status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Created, runtimes not yet provisioned
    Pending,

    /// Agents are provisioned and working
    Running,

    /// All agents terminated cleanly
    Finished,

    /// The execution could not converge to Finished
    Error,
}

impl ExecutionStatus {
    /// Whether this status is terminal (no further transitions)
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Finished | ExecutionStatus::Error)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "Pending"),
            ExecutionStatus::Running => write!(f, "Running"),
            ExecutionStatus::Finished => write!(f, "Finished"),
            ExecutionStatus::Error => write!(f, "Error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Finished.is_terminal());
        assert!(ExecutionStatus::Error.is_terminal());
    }
}
